//! Admission gate.
//!
//! Bounded counter in front of the queue. The count only goes up on
//! admission and only comes back down through an explicit reset, so the
//! capacity is a budget an operator refills, not a concurrency limit.

use serde::Serialize;

use super::status::{compute_status, Status};
use crate::types::{Error, Result};

/// Outcome of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Admitted,
    Disabled,
    Exhausted,
}

/// Point-in-time view of the gate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct GateSnapshot {
    pub enabled: bool,
    pub accepted: u32,
    pub capacity: u32,
}

impl GateSnapshot {
    pub fn status(&self) -> Status {
        compute_status(self.enabled, self.accepted, self.capacity)
    }
}

/// NOT shared directly - owned by the controller behind a short mutex.
#[derive(Debug)]
pub struct AdmissionGate {
    enabled: bool,
    accepted: u32,
    capacity: u32,
}

impl AdmissionGate {
    pub fn new(capacity: u32, enabled: bool) -> Result<Self> {
        if capacity == 0 {
            return Err(Error::validation("capacity must be greater than 0"));
        }
        Ok(Self {
            enabled,
            accepted: 0,
            capacity,
        })
    }

    /// Admit one request if the gate is open and budget remains.
    pub fn admit(&mut self) -> Admission {
        if !self.enabled {
            return Admission::Disabled;
        }
        if self.accepted >= self.capacity {
            return Admission::Exhausted;
        }
        self.accepted += 1;
        Admission::Admitted
    }

    pub fn try_admit(&mut self) -> bool {
        self.admit() == Admission::Admitted
    }

    /// Replace the capacity and start a fresh budget.
    ///
    /// Takes a signed value because it comes straight from user input.
    pub fn set_capacity(&mut self, n: i64) -> Result<()> {
        if n <= 0 {
            return Err(Error::validation(
                "The number of requests must be greater than 0.",
            ));
        }
        let capacity = u32::try_from(n)
            .map_err(|_| Error::validation(format!("capacity {} is too large", n)))?;
        self.capacity = capacity;
        self.accepted = 0;
        Ok(())
    }

    pub fn reset_count(&mut self) {
        self.accepted = 0;
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub fn snapshot(&self) -> GateSnapshot {
        GateSnapshot {
            enabled: self.enabled,
            accepted: self.accepted,
            capacity: self.capacity,
        }
    }
}
