//! Persisted configuration service.
//!
//! One `ConfigStore` is built at startup and handed to every component that
//! reads or rewrites settings. Mutations go through [`ConfigStore::update`],
//! which applies the change in memory and rewrites the whole file.

use std::path::{Path, PathBuf};
use tokio::sync::Mutex;

use crate::types::{AccessConfig, Config, Error, Result, SessionId};

#[derive(Debug)]
pub struct ConfigStore {
    /// `None` for stores that live only in memory (tests, embedding).
    path: Option<PathBuf>,
    config: Mutex<Config>,
}

impl ConfigStore {
    /// Read and validate the config file. Failure here is fatal for the binary.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await.map_err(|e| {
            Error::internal(format!("failed to read config '{}': {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;

        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(Self {
            path: Some(path.to_path_buf()),
            config: Mutex::new(config),
        })
    }

    pub fn in_memory(config: Config) -> Self {
        Self {
            path: None,
            config: Mutex::new(config),
        }
    }

    /// Copy of the current configuration.
    pub async fn snapshot(&self) -> Config {
        self.config.lock().await.clone()
    }

    pub async fn access(&self) -> AccessConfig {
        self.config.lock().await.access.clone()
    }

    /// Apply `f` and rewrite the file.
    ///
    /// If `f` fails nothing is written and the in-memory copy is untouched.
    pub async fn update<F, R>(&self, f: F) -> Result<R>
    where
        F: FnOnce(&mut Config) -> Result<R>,
    {
        let mut guard = self.config.lock().await;
        let mut next = guard.clone();
        let out = f(&mut next)?;
        if let Some(path) = &self.path {
            let body = serde_json::to_string_pretty(&next)?;
            tokio::fs::write(path, body).await?;
            tracing::debug!(path = %path.display(), "Configuration written");
        }
        *guard = next;
        Ok(out)
    }

    pub async fn set_session_id(&self, session: SessionId) -> Result<()> {
        self.update(|config| {
            config.backend.session_id = Some(session);
            Ok(())
        })
        .await
    }
}
