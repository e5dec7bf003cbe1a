//! Core types for the relay.
//!
//! This module provides foundational types used throughout the system:
//! - **IDs**: Strongly-typed identifiers (RequestId, SessionId, RoleId, ...)
//! - **Errors**: Application error types with thiserror derives
//! - **Config**: Configuration structures for transport, pipeline, backend and access

mod config;
mod errors;
mod ids;

pub use config::{
    AccessConfig, BackendConfig, Config, IpcConfig, ObservabilityConfig, PipelineConfig,
    ServerConfig,
};
pub use errors::{Error, Result};
pub use ids::{RequestId, RoleId, SessionId, UserId};
