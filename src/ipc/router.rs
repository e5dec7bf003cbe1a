//! Top-level IPC router: routes by service, delegates to handlers.

use crate::access::Actor;
use crate::controller::ModuleController;
use crate::ipc::handlers;
use crate::types::{Error, IpcConfig, Result};
use serde_json::Value;
use tokio::sync::mpsc;

/// Result from dispatching a request.
#[allow(missing_debug_implementations)]
pub enum DispatchResponse {
    /// Single response value (most endpoints).
    Single(Value),
    /// Streaming response: server writes each value as a stream chunk,
    /// then a stream end when the receiver closes.
    Stream(mpsc::Receiver<Value>),
}

/// Route an IPC request to the appropriate service handler.
pub async fn route_request(
    controller: &ModuleController,
    service: &str,
    method: &str,
    body: Value,
    ipc_config: &IpcConfig,
) -> Result<DispatchResponse> {
    match service {
        "mind" => handlers::mind::handle(controller, method, body, ipc_config).await,
        _ => Err(Error::not_found(format!("Unknown service: {}", service))),
    }
}

// =============================================================================
// Shared helpers: used by all handler modules
// =============================================================================

pub fn str_field(body: &Value, key: &str) -> Result<String> {
    body.get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| Error::validation(format!("Missing required field: {}", key)))
}

pub fn i64_field(body: &Value, key: &str) -> Result<i64> {
    body.get(key)
        .and_then(|v| v.as_i64())
        .ok_or_else(|| Error::validation(format!("Missing integer field: {}", key)))
}

/// Caller identity, resolved by the chat platform before the request is sent.
pub fn actor_field(body: &Value) -> Result<Actor> {
    let raw = body
        .get("actor")
        .cloned()
        .ok_or_else(|| Error::validation("Missing required field: actor"))?;
    serde_json::from_value(raw).map_err(|e| Error::validation(format!("Invalid actor: {}", e)))
}
