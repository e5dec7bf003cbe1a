//! Configuration structures.
//!
//! Configuration is a single JSON document loaded at startup and rewritten by
//! administrative commands (see [`crate::store::ConfigStore`]).

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{Error, Result, RoleId, SessionId};

/// Global relay configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,

    /// Observability configuration.
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// IPC transport configuration.
    #[serde(default)]
    pub ipc: IpcConfig,

    /// Admission and backend-call limits.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Assistant backend credentials and session.
    #[serde(default)]
    pub backend: BackendConfig,

    /// Role-based access for administrative commands.
    #[serde(default)]
    pub access: AccessConfig,
}

impl Config {
    /// Reject configurations the relay cannot start with.
    pub fn validate(&self) -> Result<()> {
        if self.pipeline.capacity == 0 {
            return Err(Error::validation("pipeline.capacity must be greater than 0"));
        }
        if self.backend.assistant_id.trim().is_empty() {
            return Err(Error::validation("backend.assistant_id is required"));
        }
        if self.pipeline.backend_timeout.is_zero() {
            return Err(Error::validation("pipeline.backend_timeout must be non-zero"));
        }
        Ok(())
    }
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// IPC server bind address (TCP).
    pub listen_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: "127.0.0.1:50061".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObservabilityConfig {
    /// Tracing log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable JSON log formatting.
    pub json_logs: bool,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

/// Pipeline limits.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Requests admitted before an operator has to reset the budget.
    pub capacity: u32,

    /// Accept prompts right after startup instead of waiting for `enable`.
    pub enabled_on_start: bool,

    /// Upper bound for one backend round trip.
    #[serde(with = "humantime_serde")]
    pub backend_timeout: Duration,

    /// Delay between run status polls.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            capacity: 10,
            enabled_on_start: false,
            backend_timeout: Duration::from_secs(30),
            poll_interval: Duration::from_millis(500),
        }
    }
}

/// Assistant backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BackendConfig {
    /// API root, without trailing slash.
    pub base_url: String,

    pub api_key: String,

    pub org_id: Option<String>,

    pub project_id: Option<String>,

    pub assistant_id: String,

    /// Shared conversation. Created and persisted on first start when absent.
    pub session_id: Option<SessionId>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: String::new(),
            org_id: None,
            project_id: None,
            assistant_id: String::new(),
            session_id: None,
        }
    }
}

/// Roles allowed to run administrative commands.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
#[serde(default)]
pub struct AccessConfig {
    /// Holder may run everything, including role management.
    pub main_role: Option<RoleId>,

    /// Holders may run every administrative command except role management.
    pub allowed_roles: Vec<RoleId>,
}

/// IPC transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct IpcConfig {
    /// Maximum frame payload size in bytes.
    pub max_frame_bytes: u32,

    /// Bounded channel capacity for streaming responses.
    pub stream_channel_capacity: usize,

    /// Maximum concurrent TCP connections. Connections beyond this limit
    /// are rejected.
    pub max_connections: usize,

    /// Read timeout in seconds per frame. Idle connections are dropped.
    pub read_timeout_secs: u64,

    /// Write timeout in seconds per frame.
    pub write_timeout_secs: u64,
}

impl Default for IpcConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: 1024 * 1024,
            stream_channel_capacity: 16,
            max_connections: 256,
            read_timeout_secs: 300,
            write_timeout_secs: 10,
        }
    }
}
