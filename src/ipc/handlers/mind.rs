//! Assistant service handler: prompt submission and operator commands.

use crate::controller::{ModuleController, Submission};
use crate::ipc::router::{actor_field, i64_field, DispatchResponse};
use crate::types::{Error, IpcConfig, Result, RoleId};
use serde_json::{json, Value};
use tokio::sync::mpsc;

pub async fn handle(
    controller: &ModuleController,
    method: &str,
    body: Value,
    ipc_config: &IpcConfig,
) -> Result<DispatchResponse> {
    match method {
        "Submit" => {
            let actor = actor_field(&body)?;
            let prompt = body
                .get("prompt")
                .and_then(|v| v.as_str())
                .unwrap_or("");

            match controller.submit((&actor).into(), prompt)? {
                Submission::Greeting(text) => Ok(DispatchResponse::Single(json!({
                    "kind": "GREETING",
                    "text": text,
                }))),
                Submission::Queued(ticket) => {
                    let (tx, rx) = mpsc::channel(ipc_config.stream_channel_capacity);
                    let queued = json!({
                        "event": "queued",
                        "request_id": ticket.request_id,
                        "position": ticket.position,
                    });
                    tokio::spawn(async move {
                        if tx.send(queued).await.is_err() {
                            return; // Consumer disconnected
                        }
                        let chunk = match ticket.wait().await {
                            Ok(reply) => json!({
                                "event": "reply",
                                "request_id": reply.request_id,
                                "kind": reply.kind,
                                "text": reply.text,
                            }),
                            Err(e) => json!({
                                "event": "error",
                                "message": e.to_string(),
                            }),
                        };
                        let _ = tx.send(chunk).await;
                    });
                    Ok(DispatchResponse::Stream(rx))
                }
            }
        }

        "Enable" => {
            let actor = actor_field(&body)?;
            let status = controller.enable(&actor).await?;
            Ok(DispatchResponse::Single(json!({
                "enabled": true,
                "status": status,
            })))
        }

        "Disable" => {
            let actor = actor_field(&body)?;
            let status = controller.disable(&actor).await?;
            Ok(DispatchResponse::Single(json!({
                "enabled": false,
                "status": status,
            })))
        }

        "SetCapacity" => {
            let actor = actor_field(&body)?;
            let capacity = i64_field(&body, "capacity")?;
            let gate = controller.set_capacity(&actor, capacity).await?;
            Ok(DispatchResponse::Single(json!({
                "status": gate.status(),
                "accepted": gate.accepted,
                "capacity": gate.capacity,
            })))
        }

        "ResetCount" => {
            let actor = actor_field(&body)?;
            let gate = controller.reset_count(&actor).await?;
            Ok(DispatchResponse::Single(json!({
                "status": gate.status(),
                "accepted": gate.accepted,
                "capacity": gate.capacity,
            })))
        }

        "RotateSession" => {
            let actor = actor_field(&body)?;
            let session = controller.rotate_session(&actor).await?;
            Ok(DispatchResponse::Single(json!({ "session_id": session })))
        }

        "AddRole" | "RemoveRole" => {
            let actor = actor_field(&body)?;
            let role = parse_role(&body)?;
            let roles = if method == "AddRole" {
                controller.add_allowed_role(&actor, role).await?
            } else {
                controller.remove_allowed_role(&actor, role).await?
            };
            Ok(DispatchResponse::Single(json!({ "allowed_roles": roles })))
        }

        "GetStatus" => Ok(DispatchResponse::Single(serde_json::to_value(
            controller.report(),
        )?)),

        "Help" => {
            let actor = actor_field(&body)?;
            let text = controller.help(&actor).await?;
            Ok(DispatchResponse::Single(json!({ "text": text })))
        }

        "WatchStatus" => {
            let mut status_rx = controller.subscribe_status();
            let (tx, rx) = mpsc::channel(ipc_config.stream_channel_capacity);
            tokio::spawn(async move {
                loop {
                    let status = *status_rx.borrow_and_update();
                    if tx.send(json!({ "status": status })).await.is_err() {
                        break; // Consumer disconnected
                    }
                    if status_rx.changed().await.is_err() {
                        break;
                    }
                }
            });
            Ok(DispatchResponse::Stream(rx))
        }

        _ => Err(Error::not_found(format!("Unknown mind method: {}", method))),
    }
}

fn parse_role(body: &Value) -> Result<RoleId> {
    let raw = body
        .get("role_id")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| Error::validation("role_id must be a non-negative integer"))?;
    Ok(RoleId(raw))
}
