//! Module controller - the command surface of the relay.
//!
//! Owns the admission gate and the request queue, checks roles for
//! administrative commands and keeps the status signal current. Cheap to
//! clone: every field is shared.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{oneshot, watch};

use crate::access::{self, Actor, Clearance};
use crate::backend::BackendSession;
use crate::pipeline::{
    Admission, AdmissionGate, GateSnapshot, Originator, Pending, Reply, Request, RequestQueue,
    Serializer, Status, StatusPublisher,
};
use crate::store::ConfigStore;
use crate::types::{Error, RequestId, Result, RoleId, SessionId};

/// Target for administrative action logs.
pub const AUDIT_TARGET: &str = "mind_relay::audit";

pub const DISABLED_MESSAGE: &str =
    "The assistant is resting right now. Try again once it is switched on.";

pub const EXHAUSTED_MESSAGE: &str =
    "The assistant has answered all it can for now. Please wait until the budget is refilled.";

macro_rules! audit {
    ($actor:expr, $action:expr) => {
        tracing::info!(
            target: AUDIT_TARGET,
            user = %$actor.name,
            user_id = %$actor.id,
            action = $action
        )
    };
    ($actor:expr, $action:expr, $($field:tt)+) => {
        tracing::info!(
            target: AUDIT_TARGET,
            user = %$actor.name,
            user_id = %$actor.id,
            action = $action,
            $($field)+
        )
    };
}

impl From<&Actor> for Originator {
    fn from(actor: &Actor) -> Self {
        Self {
            id: actor.id.clone(),
            display_name: actor.name.clone(),
        }
    }
}

/// Handle on a queued prompt.
#[derive(Debug)]
pub struct Ticket {
    pub request_id: RequestId,
    /// 1-based place in line at the time of enqueueing.
    pub position: usize,
    reply_rx: oneshot::Receiver<Reply>,
}

impl Ticket {
    /// Wait for the drain loop to answer.
    pub async fn wait(self) -> Result<Reply> {
        self.reply_rx
            .await
            .map_err(|_| Error::internal(format!("request {} was dropped", self.request_id)))
    }
}

/// Result of `submit`.
#[derive(Debug)]
pub enum Submission {
    /// Empty prompt: answered immediately, nothing queued.
    Greeting(String),
    Queued(Ticket),
}

/// Everything an observer may want to know about the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusReport {
    pub status: Status,
    #[serde(flatten)]
    pub gate: GateSnapshot,
    pub queued: usize,
    pub draining: bool,
    pub assistant: String,
}

#[derive(Debug, Clone)]
pub struct ModuleController {
    gate: Arc<Mutex<AdmissionGate>>,
    queue: Arc<RequestQueue>,
    serializer: Serializer,
    backend: Arc<BackendSession>,
    status: Arc<StatusPublisher>,
    store: Arc<ConfigStore>,
}

impl ModuleController {
    pub async fn new(backend: Arc<BackendSession>, store: Arc<ConfigStore>) -> Result<Self> {
        let config = store.snapshot().await;
        let gate = AdmissionGate::new(config.pipeline.capacity, config.pipeline.enabled_on_start)?;
        let status = StatusPublisher::new(gate.snapshot().status());
        let queue = Arc::new(RequestQueue::new());

        Ok(Self {
            gate: Arc::new(Mutex::new(gate)),
            serializer: Serializer::new(queue.clone(), backend.clone()),
            queue,
            backend,
            status: Arc::new(status),
            store,
        })
    }

    pub fn status_publisher(&self) -> &StatusPublisher {
        &self.status
    }

    pub fn subscribe_status(&self) -> watch::Receiver<Status> {
        self.status.subscribe()
    }

    pub fn assistant_name(&self) -> &str {
        self.backend.assistant_name()
    }

    pub fn report(&self) -> StatusReport {
        let gate = self.gate.lock().snapshot();
        StatusReport {
            status: gate.status(),
            gate,
            queued: self.queue.depth(),
            draining: self.queue.is_draining(),
            assistant: self.assistant_name().to_string(),
        }
    }

    // =========================================================================
    // Public command
    // =========================================================================

    /// Submit a prompt on behalf of `originator`.
    ///
    /// Admission, enqueueing and the drain decision happen under the gate
    /// lock with no `.await` in between, so concurrent submitters are queued
    /// in admission order and exactly one of them starts the drain loop.
    pub fn submit(&self, originator: Originator, prompt: &str) -> Result<Submission> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Ok(Submission::Greeting(format!(
                "Hi! I am {}. What would {} like to know?",
                self.assistant_name(),
                originator.display_name
            )));
        }

        let (ticket, start_drain, snapshot) = {
            let mut gate = self.gate.lock();
            match gate.admit() {
                Admission::Admitted => {}
                Admission::Disabled => return Err(Error::disabled(DISABLED_MESSAGE)),
                Admission::Exhausted => return Err(Error::capacity_exhausted(EXHAUSTED_MESSAGE)),
            }

            let request = Request::new(originator, prompt);
            tracing::info!(
                request_id = %request.id,
                originator = %request.originator.display_name,
                prompt = %request.prompt,
                "Prompt added to the queue"
            );
            let request_id = request.id.clone();
            let (pending, reply_rx) = Pending::new(request);
            let position = self.queue.enqueue(pending);
            let start_drain = self.queue.try_start_drain();

            let ticket = Ticket {
                request_id,
                position,
                reply_rx,
            };
            (ticket, start_drain, gate.snapshot())
        };

        self.status.publish(snapshot.status());
        if start_drain {
            self.spawn_drain();
        }
        Ok(Submission::Queued(ticket))
    }

    fn spawn_drain(&self) {
        let serializer = self.serializer.clone();
        let gate = self.gate.clone();
        let status = self.status.clone();
        tokio::spawn(async move {
            serializer.drain().await;
            let snapshot = gate.lock().snapshot();
            status.publish(snapshot.status());
        });
    }

    // =========================================================================
    // Administrative commands
    // =========================================================================

    async fn authorize(&self, actor: &Actor, clearance: Clearance) -> Result<()> {
        let access = self.store.access().await;
        access::authorize(&access, actor, clearance).map_err(|e| {
            tracing::warn!(user = %actor.name, ?clearance, "Command denied");
            e
        })
    }

    /// Apply `f` to the gate and publish the resulting status.
    fn with_gate<R>(&self, f: impl FnOnce(&mut AdmissionGate) -> Result<R>) -> Result<(R, GateSnapshot)> {
        let (out, snapshot) = {
            let mut gate = self.gate.lock();
            let out = f(&mut gate)?;
            (out, gate.snapshot())
        };
        self.status.publish(snapshot.status());
        Ok((out, snapshot))
    }

    pub async fn enable(&self, actor: &Actor) -> Result<Status> {
        self.authorize(actor, Clearance::Operator).await?;
        let (_, snapshot) = self.with_gate(|gate| {
            gate.enable();
            Ok(())
        })?;
        audit!(actor, "enable");
        Ok(snapshot.status())
    }

    pub async fn disable(&self, actor: &Actor) -> Result<Status> {
        self.authorize(actor, Clearance::Operator).await?;
        let (_, snapshot) = self.with_gate(|gate| {
            gate.disable();
            Ok(())
        })?;
        audit!(actor, "disable");
        Ok(snapshot.status())
    }

    /// Set a new budget and persist it. Non-positive values are rejected
    /// before anything changes.
    pub async fn set_capacity(&self, actor: &Actor, capacity: i64) -> Result<GateSnapshot> {
        self.authorize(actor, Clearance::Operator).await?;
        let (_, snapshot) = self.with_gate(|gate| gate.set_capacity(capacity))?;
        self.store
            .update(|config| {
                config.pipeline.capacity = snapshot.capacity;
                Ok(())
            })
            .await?;
        audit!(actor, "set_capacity", capacity = snapshot.capacity);
        Ok(snapshot)
    }

    pub async fn reset_count(&self, actor: &Actor) -> Result<GateSnapshot> {
        self.authorize(actor, Clearance::Operator).await?;
        let (_, snapshot) = self.with_gate(|gate| {
            gate.reset_count();
            Ok(())
        })?;
        audit!(actor, "reset_count");
        Ok(snapshot)
    }

    pub async fn rotate_session(&self, actor: &Actor) -> Result<SessionId> {
        self.authorize(actor, Clearance::Operator).await?;
        let session = self.backend.rotate_session().await?;
        audit!(actor, "rotate_session", session = %session);
        Ok(session)
    }

    pub async fn add_allowed_role(&self, actor: &Actor, role: RoleId) -> Result<Vec<RoleId>> {
        self.authorize(actor, Clearance::Main).await?;
        let roles = self
            .store
            .update(|config| {
                access::grant(&mut config.access, role)?;
                Ok(config.access.allowed_roles.clone())
            })
            .await?;
        audit!(actor, "add_role", role = %role);
        Ok(roles)
    }

    pub async fn remove_allowed_role(&self, actor: &Actor, role: RoleId) -> Result<Vec<RoleId>> {
        self.authorize(actor, Clearance::Main).await?;
        let roles = self
            .store
            .update(|config| {
                access::revoke(&mut config.access, role)?;
                Ok(config.access.allowed_roles.clone())
            })
            .await?;
        audit!(actor, "remove_role", role = %role);
        Ok(roles)
    }

    pub async fn help(&self, actor: &Actor) -> Result<String> {
        self.authorize(actor, Clearance::Operator).await?;
        audit!(actor, "help");
        Ok(format!(
            "I am {name}, a companion of thoughts you cannot see.\n\n\
             Submit - ask {name} anything, {user}.\n\
             Enable / Disable - let the assistant answer, or silence it.\n\
             SetCapacity <n> - allow n more prompts and reset the count.\n\
             ResetCount - refill the current budget.\n\
             RotateSession - forget the conversation and start over.\n\
             AddRole / RemoveRole <id> - manage operator roles (main role only).",
            name = self.assistant_name(),
            user = actor.name,
        ))
    }
}
