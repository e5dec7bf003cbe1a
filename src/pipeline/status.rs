//! Pipeline status signal.
//!
//! The status is derived, never stored on its own: every state change
//! recomputes it from the gate and pushes it into a watch channel. Observers
//! (the presence forwarder, `WatchStatus` streams) read from that channel, so
//! a slow or failing observer can never hold up the pipeline.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::types::Result;

/// Capacity state shown to chat users.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Off,
    Ready,
    Exhausted,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Status::Off => "off",
            Status::Ready => "ready",
            Status::Exhausted => "exhausted",
        };
        f.write_str(label)
    }
}

pub fn compute_status(enabled: bool, accepted: u32, capacity: u32) -> Status {
    if !enabled {
        Status::Off
    } else if accepted >= capacity {
        Status::Exhausted
    } else {
        Status::Ready
    }
}

/// Presence/display capability of the chat platform.
#[async_trait]
pub trait PresenceSink: Send + Sync + fmt::Debug {
    async fn show(&self, status: Status) -> Result<()>;
}

/// Sink that only logs. Used when no platform presence is wired in.
#[derive(Debug, Default)]
pub struct LogPresence;

#[async_trait]
impl PresenceSink for LogPresence {
    async fn show(&self, status: Status) -> Result<()> {
        tracing::info!(%status, "Presence updated");
        Ok(())
    }
}

#[derive(Debug)]
pub struct StatusPublisher {
    tx: watch::Sender<Status>,
}

impl StatusPublisher {
    pub fn new(initial: Status) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    /// Record `status`. Returns whether it differs from the last value;
    /// unchanged values are not re-announced to observers.
    pub fn publish(&self, status: Status) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            tracing::debug!(%status, "Status changed");
        }
        changed
    }

    pub fn current(&self) -> Status {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<Status> {
        self.tx.subscribe()
    }

    /// Forward every status change to `sink` until the publisher is dropped.
    ///
    /// The current value is shown once on start. Sink errors are logged and
    /// otherwise ignored.
    pub fn spawn_forwarder(&self, sink: Arc<dyn PresenceSink>) -> JoinHandle<()> {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                let status = *rx.borrow_and_update();
                if let Err(e) = sink.show(status).await {
                    tracing::warn!(%status, error = %e, "Presence update failed");
                }
                if rx.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}
