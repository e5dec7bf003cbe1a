//! Single-flight drain loop.
//!
//! Whoever wins [`RequestQueue::try_start_drain`] runs [`Serializer::drain`]
//! until the queue is empty. Exactly one backend call is in flight at a time
//! and a failing request only costs its own originator an apology.

use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use super::queue::{Pending, RequestQueue};
use super::types::{Reply, ReplyKind};
use crate::backend::BackendSession;
use crate::types::{Error, Result};

/// Sent instead of an answer when the backend call fails.
pub const FALLBACK_REPLY: &str =
    "Sorry, my thoughts got tangled. Please ask me again a little later.";

#[derive(Debug, Clone)]
pub struct Serializer {
    queue: Arc<RequestQueue>,
    backend: Arc<BackendSession>,
}

impl Serializer {
    pub fn new(queue: Arc<RequestQueue>, backend: Arc<BackendSession>) -> Self {
        Self { queue, backend }
    }

    /// Drain to empty. Returns how many requests were processed.
    ///
    /// Must only be called by the winner of `try_start_drain`; the flag is
    /// cleared by the final `next_or_finish`.
    pub async fn drain(&self) -> usize {
        let mut processed = 0;
        while let Some(pending) = self.queue.next_or_finish() {
            self.process(pending).await;
            processed += 1;
        }
        tracing::info!(processed, "All queued prompts handled");
        processed
    }

    async fn process(&self, pending: Pending) {
        let request = &pending.request;
        tracing::info!(
            request_id = %request.id,
            originator = %request.originator.display_name,
            waiting = self.queue.depth(),
            "Handling queued prompt"
        );

        let (kind, text) = match self.answer(&request.originator.display_name, &request.prompt).await {
            Ok(answer) => (ReplyKind::Answer, answer),
            Err(e) if e.is_backend_failure() => {
                tracing::warn!(request_id = %request.id, error = %e, "Backend call failed");
                (ReplyKind::Fallback, FALLBACK_REPLY.to_string())
            }
            Err(e) => {
                tracing::error!(request_id = %request.id, error = %e, "Prompt could not be handled");
                (ReplyKind::Fallback, FALLBACK_REPLY.to_string())
            }
        };

        let reply = Reply {
            request_id: request.id.clone(),
            kind,
            text,
        };
        let request_id = request.id.clone();
        if !pending.deliver(reply) {
            tracing::debug!(%request_id, "Originator stopped waiting for the reply");
        }
    }

    /// One backend round trip. A panicking backend is reported as an error
    /// so the loop keeps its drain flag and moves on.
    async fn answer(&self, originator_name: &str, prompt: &str) -> Result<String> {
        AssertUnwindSafe(self.backend.send(originator_name, prompt))
            .catch_unwind()
            .await
            .unwrap_or_else(|_| Err(Error::internal("backend call panicked")))
    }
}
