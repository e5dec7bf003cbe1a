//! Conversational backend and the single shared session.
//!
//! [`ConversationBackend`] is the transport seam (HTTP in production, scripted
//! fakes in tests). [`BackendSession`] owns the one conversation every caller
//! shares and applies the per-call timeout and the echo check.

mod assistants;

pub use assistants::AssistantsClient;

use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::store::ConfigStore;
use crate::types::{Error, Result, SessionId};

/// Remote assistant API.
#[async_trait]
pub trait ConversationBackend: Send + Sync + fmt::Debug {
    /// Display name of the configured assistant.
    async fn assistant_name(&self) -> Result<String>;

    /// Create a fresh conversation.
    async fn open_session(&self) -> Result<SessionId>;

    /// Check that an existing conversation is still usable.
    async fn resume_session(&self, session: &SessionId) -> Result<()>;

    async fn close_session(&self, session: &SessionId) -> Result<()>;

    /// Post `message` to `session` and wait for the assistant's answer.
    async fn complete(&self, session: &SessionId, message: &str) -> Result<String>;

    /// Stop whatever work an abandoned `complete` left running on `session`,
    /// so the next message is accepted.
    async fn cancel_pending(&self, _session: &SessionId) -> Result<()> {
        Ok(())
    }
}

/// Attribute a prompt to its author inside the shared conversation.
pub fn format_message(originator_name: &str, prompt: &str) -> String {
    format!("{}:\"{}\"", originator_name, prompt)
}

/// True when `reply` is just the prompt handed back.
///
/// Heuristic: a genuine answer that happens to equal the prompt text is
/// misread as an echo.
pub fn is_echo(reply: &str, prompt: &str, message: &str) -> bool {
    let reply = reply.trim();
    reply == prompt.trim() || reply == message.trim()
}

pub struct BackendSession {
    backend: Arc<dyn ConversationBackend>,
    store: Arc<ConfigStore>,
    session: Mutex<SessionId>,
    assistant_name: String,
    timeout: Duration,
}

impl fmt::Debug for BackendSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackendSession")
            .field("assistant_name", &self.assistant_name)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl BackendSession {
    /// Resolve the assistant and attach to the persisted conversation,
    /// creating (and persisting) one when none is configured.
    pub async fn connect(
        backend: Arc<dyn ConversationBackend>,
        store: Arc<ConfigStore>,
    ) -> Result<Self> {
        let config = store.snapshot().await;
        let assistant_name = backend.assistant_name().await?;

        // A blank id in the file means "no session yet".
        let persisted = config
            .backend
            .session_id
            .filter(|session| !session.as_str().trim().is_empty());

        let session = match persisted {
            Some(session) => {
                backend.resume_session(&session).await?;
                tracing::info!(session = %session, "Resumed shared session");
                session
            }
            None => {
                let session = backend.open_session().await?;
                store.set_session_id(session.clone()).await?;
                tracing::info!(session = %session, "Created shared session");
                session
            }
        };

        Ok(Self {
            backend,
            store,
            session: Mutex::new(session),
            assistant_name,
            timeout: config.pipeline.backend_timeout,
        })
    }

    pub fn assistant_name(&self) -> &str {
        &self.assistant_name
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn current_session(&self) -> SessionId {
        self.session.lock().await.clone()
    }

    /// One bounded round trip on the shared session.
    pub async fn send(&self, originator_name: &str, prompt: &str) -> Result<String> {
        let message = format_message(originator_name, prompt);
        let session = self.session.lock().await.clone();

        let reply = match tokio::time::timeout(self.timeout, self.backend.complete(&session, &message)).await {
            Ok(reply) => reply?,
            Err(_) => {
                self.abandon(&session).await;
                return Err(Error::timeout(format!(
                    "backend did not answer within {:?}",
                    self.timeout
                )));
            }
        };

        if is_echo(&reply, prompt, &message) {
            return Err(Error::EchoedPrompt);
        }
        Ok(reply)
    }

    /// Cancel the work a timed-out call left behind. Bounded by the same
    /// timeout; failures are only logged.
    async fn abandon(&self, session: &SessionId) {
        match tokio::time::timeout(self.timeout, self.backend.cancel_pending(session)).await {
            Ok(Ok(())) => tracing::debug!(session = %session, "Cancelled abandoned run"),
            Ok(Err(e)) => {
                tracing::warn!(session = %session, error = %e, "Failed to cancel abandoned run")
            }
            Err(_) => tracing::warn!(session = %session, "Cancelling abandoned run timed out"),
        }
    }

    /// Drop the shared conversation and start a new one.
    ///
    /// The new conversation is opened and persisted before it replaces the
    /// current one; on any failure the current session stays in use. The old
    /// conversation is deleted last and a failed delete is only logged.
    pub async fn rotate_session(&self) -> Result<SessionId> {
        let mut current = self.session.lock().await;

        let fresh = self.backend.open_session().await?;
        if let Err(e) = self.store.set_session_id(fresh.clone()).await {
            if let Err(close_err) = self.backend.close_session(&fresh).await {
                tracing::warn!(session = %fresh, error = %close_err, "Failed to delete unused session");
            }
            return Err(e);
        }
        let old = std::mem::replace(&mut *current, fresh.clone());

        if let Err(e) = self.backend.close_session(&old).await {
            tracing::warn!(session = %old, error = %e, "Failed to delete old session");
        }

        tracing::info!(session = %fresh, "Rotated shared session");
        Ok(fresh)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Config;
    use parking_lot::Mutex as SyncMutex;

    #[derive(Debug, Default)]
    struct Scripted {
        reply: String,
        delay: Duration,
        opened: SyncMutex<u32>,
        closed: SyncMutex<Vec<String>>,
        resumed: SyncMutex<Vec<String>>,
        cancelled: SyncMutex<Vec<String>>,
        fail_close: bool,
        fail_open: SyncMutex<bool>,
    }

    #[async_trait]
    impl ConversationBackend for Scripted {
        async fn assistant_name(&self) -> Result<String> {
            Ok("Oracle".to_string())
        }

        async fn open_session(&self) -> Result<SessionId> {
            if *self.fail_open.lock() {
                return Err(Error::backend("open failed"));
            }
            let mut opened = self.opened.lock();
            *opened += 1;
            Ok(SessionId::from_string(format!("thread_{}", *opened)).unwrap())
        }

        async fn resume_session(&self, session: &SessionId) -> Result<()> {
            self.resumed.lock().push(session.to_string());
            Ok(())
        }

        async fn close_session(&self, session: &SessionId) -> Result<()> {
            self.closed.lock().push(session.to_string());
            if self.fail_close {
                return Err(Error::backend("already gone"));
            }
            Ok(())
        }

        async fn complete(&self, _session: &SessionId, message: &str) -> Result<String> {
            tokio::time::sleep(self.delay).await;
            if self.reply.is_empty() {
                return Ok(message.to_string());
            }
            Ok(self.reply.clone())
        }

        async fn cancel_pending(&self, session: &SessionId) -> Result<()> {
            self.cancelled.lock().push(session.to_string());
            Ok(())
        }
    }

    fn store(timeout: Duration) -> Arc<ConfigStore> {
        let mut config = Config::default();
        config.backend.assistant_id = "asst_1".to_string();
        config.pipeline.backend_timeout = timeout;
        Arc::new(ConfigStore::in_memory(config))
    }

    #[test]
    fn test_echo_detection() {
        let message = format_message("Bob", "hello");
        assert_eq!(message, "Bob:\"hello\"");
        assert!(is_echo("Bob:\"hello\"", "hello", &message));
        assert!(is_echo(" hello\n", "hello", &message));
        assert!(!is_echo("hi Bob", "hello", &message));
    }

    #[tokio::test]
    async fn test_connect_creates_and_persists_session() {
        let store = store(Duration::from_secs(1));
        let backend = Arc::new(Scripted::default());
        let session = BackendSession::connect(backend, store.clone()).await.unwrap();

        assert_eq!(session.assistant_name(), "Oracle");
        assert_eq!(session.current_session().await.as_str(), "thread_1");
        assert_eq!(
            store.snapshot().await.backend.session_id.unwrap().as_str(),
            "thread_1"
        );
    }

    #[tokio::test]
    async fn test_send_timeout() {
        let backend = Arc::new(Scripted {
            reply: "late".to_string(),
            delay: Duration::from_millis(200),
            ..Default::default()
        });
        let session = BackendSession::connect(backend.clone(), store(Duration::from_millis(20)))
            .await
            .unwrap();
        assert!(matches!(
            session.send("Bob", "hi").await,
            Err(Error::Timeout(_))
        ));
        assert_eq!(*backend.cancelled.lock(), vec!["thread_1".to_string()]);
    }

    #[tokio::test]
    async fn test_answered_call_cancels_nothing() {
        let backend = Arc::new(Scripted {
            reply: "sure".to_string(),
            ..Default::default()
        });
        let session = BackendSession::connect(backend.clone(), store(Duration::from_secs(1)))
            .await
            .unwrap();
        assert_eq!(session.send("Bob", "hi").await.unwrap(), "sure");
        assert!(backend.cancelled.lock().is_empty());
    }

    #[tokio::test]
    async fn test_blank_persisted_session_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"backend":{"assistant_id":"asst_1","session_id":""}}"#,
        )
        .unwrap();
        let store = Arc::new(ConfigStore::load(&path).await.unwrap());
        let backend = Arc::new(Scripted::default());

        let session = BackendSession::connect(backend.clone(), store.clone())
            .await
            .unwrap();

        assert!(backend.resumed.lock().is_empty());
        assert_eq!(session.current_session().await.as_str(), "thread_1");
        let reloaded = ConfigStore::load(&path).await.unwrap();
        assert_eq!(
            reloaded.snapshot().await.backend.session_id.unwrap().as_str(),
            "thread_1"
        );
    }

    #[tokio::test]
    async fn test_failed_rotation_keeps_current_session() {
        let backend = Arc::new(Scripted {
            reply: "ok".to_string(),
            ..Default::default()
        });
        let store = store(Duration::from_secs(1));
        let session = BackendSession::connect(backend.clone(), store.clone())
            .await
            .unwrap();

        *backend.fail_open.lock() = true;
        assert!(matches!(
            session.rotate_session().await,
            Err(Error::Backend(_))
        ));

        assert!(backend.closed.lock().is_empty());
        assert_eq!(session.current_session().await.as_str(), "thread_1");
        assert_eq!(
            store.snapshot().await.backend.session_id.unwrap().as_str(),
            "thread_1"
        );
        assert_eq!(session.send("Bob", "still there?").await.unwrap(), "ok");
    }

    #[tokio::test]
    async fn test_send_rejects_echo() {
        let backend = Arc::new(Scripted::default());
        let session = BackendSession::connect(backend, store(Duration::from_secs(1)))
            .await
            .unwrap();
        assert!(matches!(
            session.send("Bob", "hi").await,
            Err(Error::EchoedPrompt)
        ));
    }

    #[tokio::test]
    async fn test_rotate_survives_delete_failure() {
        let backend = Arc::new(Scripted {
            reply: "ok".to_string(),
            fail_close: true,
            ..Default::default()
        });
        let store = store(Duration::from_secs(1));
        let session = BackendSession::connect(backend.clone(), store.clone())
            .await
            .unwrap();

        let fresh = session.rotate_session().await.unwrap();
        assert_eq!(fresh.as_str(), "thread_2");
        assert_eq!(*backend.closed.lock(), vec!["thread_1".to_string()]);
        assert_eq!(session.current_session().await, fresh);
        assert_eq!(store.snapshot().await.backend.session_id, Some(fresh));
    }
}
