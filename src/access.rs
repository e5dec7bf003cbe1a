//! Role-based access for administrative commands.
//!
//! The chat platform resolves who is calling and which roles they hold; this
//! module only decides whether those roles clear a command.

use serde::{Deserialize, Serialize};

use crate::types::{AccessConfig, Error, Result, RoleId, UserId};

/// Caller identity as handed over by the chat platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: UserId,
    pub name: String,
    #[serde(default)]
    pub roles: Vec<RoleId>,
}

impl Actor {
    pub fn has_role(&self, role: RoleId) -> bool {
        self.roles.contains(&role)
    }
}

/// Level a command demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Clearance {
    /// Main role or any allowed role.
    Operator,
    /// Main role only.
    Main,
}

/// Check `actor` against the configured roles.
pub fn authorize(access: &AccessConfig, actor: &Actor, clearance: Clearance) -> Result<()> {
    let is_main = access.main_role.map_or(false, |role| actor.has_role(role));
    let cleared = match clearance {
        Clearance::Main => is_main,
        Clearance::Operator => {
            is_main || access.allowed_roles.iter().any(|&role| actor.has_role(role))
        }
    };

    if cleared {
        Ok(())
    } else {
        Err(Error::unauthorized(format!(
            "User '{}' doesn't have access to the assistant module.",
            actor.name
        )))
    }
}

/// Add `role` to the allowed set. Adding a role twice is rejected.
pub fn grant(access: &mut AccessConfig, role: RoleId) -> Result<()> {
    if access.allowed_roles.contains(&role) {
        return Err(Error::validation(format!("role {} is already allowed", role)));
    }
    access.allowed_roles.push(role);
    Ok(())
}

/// Remove `role` from the allowed set.
pub fn revoke(access: &mut AccessConfig, role: RoleId) -> Result<()> {
    let before = access.allowed_roles.len();
    access.allowed_roles.retain(|&r| r != role);
    if access.allowed_roles.len() == before {
        return Err(Error::not_found(format!("role {} is not in the allowed list", role)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn actor(roles: &[u64]) -> Actor {
        Actor {
            id: UserId::from_string("u1".to_string()).unwrap(),
            name: "Alice".to_string(),
            roles: roles.iter().copied().map(RoleId).collect(),
        }
    }

    fn access() -> AccessConfig {
        AccessConfig {
            main_role: Some(RoleId(1)),
            allowed_roles: vec![RoleId(2), RoleId(3)],
        }
    }

    #[test]
    fn test_main_role_clears_everything() {
        assert!(authorize(&access(), &actor(&[1]), Clearance::Operator).is_ok());
        assert!(authorize(&access(), &actor(&[1]), Clearance::Main).is_ok());
    }

    #[test]
    fn test_allowed_role_is_operator_only() {
        assert!(authorize(&access(), &actor(&[3]), Clearance::Operator).is_ok());
        assert!(matches!(
            authorize(&access(), &actor(&[3]), Clearance::Main),
            Err(Error::Unauthorized(_))
        ));
    }

    #[test]
    fn test_no_roles_denied() {
        assert!(authorize(&access(), &actor(&[]), Clearance::Operator).is_err());
        assert!(authorize(&AccessConfig::default(), &actor(&[1]), Clearance::Main).is_err());
    }

    #[test]
    fn test_grant_and_revoke() {
        let mut access = access();
        grant(&mut access, RoleId(4)).unwrap();
        assert!(grant(&mut access, RoleId(4)).is_err());
        assert!(authorize(&access, &actor(&[4]), Clearance::Operator).is_ok());

        revoke(&mut access, RoleId(4)).unwrap();
        assert!(matches!(revoke(&mut access, RoleId(4)), Err(Error::NotFound(_))));
        assert!(authorize(&access, &actor(&[4]), Clearance::Operator).is_err());
    }
}
