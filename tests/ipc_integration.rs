//! IPC integration tests: codec → dispatch → controller → response round-trip.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;

use mind_relay::backend::{BackendSession, ConversationBackend};
use mind_relay::ipc::codec::{decode, encode, read_frame, write_frame, FrameKind};
use mind_relay::ipc::IpcServer;
use mind_relay::types::{IpcConfig, RoleId, SessionId};
use mind_relay::{Config, ConfigStore, ModuleController, Result};

const MAX_FRAME: u32 = 1024 * 1024;

#[derive(Debug, Default)]
struct Parrot {
    delay: Duration,
}

#[async_trait]
impl ConversationBackend for Parrot {
    async fn assistant_name(&self) -> Result<String> {
        Ok("Sage".to_string())
    }
    async fn open_session(&self) -> Result<SessionId> {
        Ok(SessionId::from_string("thread_ipc".to_string()).unwrap())
    }
    async fn resume_session(&self, _session: &SessionId) -> Result<()> {
        Ok(())
    }
    async fn close_session(&self, _session: &SessionId) -> Result<()> {
        Ok(())
    }
    async fn complete(&self, _session: &SessionId, message: &str) -> Result<String> {
        tokio::time::sleep(self.delay).await;
        Ok(format!("you said {}", message))
    }
}

/// Helper: spin up an IpcServer on a random port, return (addr, server_task).
async fn start_test_server(capacity: u32, enabled: bool) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    start_server_with(Parrot::default(), capacity, enabled).await
}

async fn start_server_with(
    parrot: Parrot,
    capacity: u32,
    enabled: bool,
) -> (std::net::SocketAddr, tokio::task::JoinHandle<()>) {
    let mut config = Config::default();
    config.backend.assistant_id = "asst_ipc".to_string();
    config.pipeline.capacity = capacity;
    config.pipeline.enabled_on_start = enabled;
    config.access.main_role = Some(RoleId(1));
    config.access.allowed_roles = vec![RoleId(2)];

    let store = Arc::new(ConfigStore::in_memory(config));
    let backend = Arc::new(BackendSession::connect(Arc::new(parrot), store.clone()).await.unwrap());
    let controller = ModuleController::new(backend, store).await.unwrap();

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let handle = tokio::spawn(async move {
        let server = IpcServer::new(controller, addr, IpcConfig::default());
        let _ = server.serve_on(listener).await;
    });

    (addr, handle)
}

async fn send(stream: &mut TcpStream, method: &str, body: Value) {
    send_as(stream, "test-1", method, body).await;
}

async fn send_as(stream: &mut TcpStream, id: &str, method: &str, body: Value) {
    let request = json!({
        "id": id,
        "service": "mind",
        "method": method,
        "body": body,
    });
    write_frame(stream, FrameKind::Request, &encode(&request).unwrap())
        .await
        .unwrap();
}

async fn recv(stream: &mut TcpStream) -> (FrameKind, Value) {
    let (kind, payload) = read_frame(stream, MAX_FRAME).await.unwrap().unwrap();
    (FrameKind::from_byte(kind).unwrap(), decode(&payload).unwrap())
}

/// Helper: send a request frame, receive and decode the single response.
async fn round_trip(stream: &mut TcpStream, method: &str, body: Value) -> (FrameKind, Value) {
    send(stream, method, body).await;
    recv(stream).await
}

fn actor(name: &str, roles: &[u64]) -> Value {
    json!({ "id": format!("id-{}", name), "name": name, "roles": roles })
}

#[tokio::test]
async fn test_submit_streams_queued_then_reply() {
    let (addr, _handle) = start_test_server(5, true).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send(&mut stream, "Submit", json!({ "actor": actor("ann", &[]), "prompt": "hi there" })).await;

    let (kind, queued) = recv(&mut stream).await;
    assert_eq!(kind, FrameKind::StreamChunk);
    assert_eq!(queued["id"], "test-1");
    assert_eq!(queued["body"]["event"], "queued");
    assert_eq!(queued["body"]["position"], 1);

    let (kind, reply) = recv(&mut stream).await;
    assert_eq!(kind, FrameKind::StreamChunk);
    assert_eq!(reply["body"]["event"], "reply");
    assert_eq!(reply["body"]["kind"], "ANSWER");
    assert_eq!(reply["body"]["text"], "you said ann:\"hi there\"");
    assert_eq!(reply["body"]["request_id"], queued["body"]["request_id"]);

    let (kind, _) = recv(&mut stream).await;
    assert_eq!(kind, FrameKind::StreamEnd);
}

#[tokio::test]
async fn test_empty_submit_greets() {
    let (addr, _handle) = start_test_server(5, true).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (kind, resp) = round_trip(&mut stream, "Submit", json!({ "actor": actor("ann", &[]) })).await;
    assert_eq!(kind, FrameKind::Response);
    assert_eq!(resp["ok"], true);
    assert_eq!(resp["body"]["kind"], "GREETING");
    assert_eq!(resp["body"]["text"], "Hi! I am Sage. What would ann like to know?");
}

#[tokio::test]
async fn test_disabled_and_exhausted_error_codes() {
    let (addr, _handle) = start_test_server(1, false).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let prompt = json!({ "actor": actor("ann", &[]), "prompt": "hello" });

    let (kind, resp) = round_trip(&mut stream, "Submit", prompt.clone()).await;
    assert_eq!(kind, FrameKind::Error);
    assert_eq!(resp["error"]["code"], "FAILED_PRECONDITION");

    let (kind, resp) = round_trip(&mut stream, "Enable", json!({ "actor": actor("op", &[2]) })).await;
    assert_eq!(kind, FrameKind::Response);
    assert_eq!(resp["body"]["status"], "READY");

    send(&mut stream, "Submit", prompt.clone()).await;
    loop {
        let (kind, _) = recv(&mut stream).await;
        if kind == FrameKind::StreamEnd {
            break;
        }
    }

    let (kind, resp) = round_trip(&mut stream, "Submit", prompt).await;
    assert_eq!(kind, FrameKind::Error);
    assert_eq!(resp["error"]["code"], "RESOURCE_EXHAUSTED");

    let (_, resp) = round_trip(&mut stream, "GetStatus", json!({})).await;
    assert_eq!(resp["body"]["status"], "EXHAUSTED");
    assert_eq!(resp["body"]["accepted"], 1);
    assert_eq!(resp["body"]["capacity"], 1);
}

#[tokio::test]
async fn test_admin_commands_check_roles() {
    let (addr, _handle) = start_test_server(3, true).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (kind, resp) = round_trip(
        &mut stream,
        "SetCapacity",
        json!({ "actor": actor("eve", &[]), "capacity": 9 }),
    )
    .await;
    assert_eq!(kind, FrameKind::Error);
    assert_eq!(resp["error"]["code"], "PERMISSION_DENIED");
    assert_eq!(
        resp["error"]["message"],
        "User 'eve' doesn't have access to the assistant module."
    );

    let (kind, resp) = round_trip(
        &mut stream,
        "SetCapacity",
        json!({ "actor": actor("op", &[2]), "capacity": 9 }),
    )
    .await;
    assert_eq!(kind, FrameKind::Response);
    assert_eq!(resp["body"]["capacity"], 9);
    assert_eq!(resp["body"]["accepted"], 0);

    let (kind, resp) = round_trip(
        &mut stream,
        "AddRole",
        json!({ "actor": actor("op", &[2]), "role_id": 7 }),
    )
    .await;
    assert_eq!(kind, FrameKind::Error);
    assert_eq!(resp["error"]["code"], "PERMISSION_DENIED");

    let (kind, resp) = round_trip(
        &mut stream,
        "AddRole",
        json!({ "actor": actor("boss", &[1]), "role_id": 7 }),
    )
    .await;
    assert_eq!(kind, FrameKind::Response);
    assert_eq!(resp["body"]["allowed_roles"], json!([2, 7]));
}

#[tokio::test]
async fn test_bad_capacity_rejected() {
    let (addr, _handle) = start_test_server(3, true).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (kind, resp) = round_trip(
        &mut stream,
        "SetCapacity",
        json!({ "actor": actor("op", &[2]), "capacity": -4 }),
    )
    .await;
    assert_eq!(kind, FrameKind::Error);
    assert_eq!(resp["error"]["code"], "INVALID_ARGUMENT");

    let (_, resp) = round_trip(&mut stream, "GetStatus", json!({})).await;
    assert_eq!(resp["body"]["capacity"], 3);
}

#[tokio::test]
async fn test_unknown_method_and_service() {
    let (addr, _handle) = start_test_server(3, true).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    let (kind, resp) = round_trip(&mut stream, "Nope", json!({})).await;
    assert_eq!(kind, FrameKind::Error);
    assert_eq!(resp["error"]["code"], "NOT_FOUND");

    let request = json!({ "id": "x", "service": "other", "method": "Submit", "body": {} });
    write_frame(&mut stream, FrameKind::Request, &encode(&request).unwrap())
        .await
        .unwrap();
    let (kind, resp) = recv(&mut stream).await;
    assert_eq!(kind, FrameKind::Error);
    assert_eq!(resp["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_wrong_frame_kind_keeps_connection() {
    let (addr, _handle) = start_test_server(3, true).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    write_frame(&mut stream, FrameKind::Response, &encode(&json!({})).unwrap())
        .await
        .unwrap();
    let (kind, resp) = recv(&mut stream).await;
    assert_eq!(kind, FrameKind::Error);
    assert_eq!(resp["error"]["code"], "INVALID_ARGUMENT");

    let (kind, _) = round_trip(&mut stream, "GetStatus", json!({})).await;
    assert_eq!(kind, FrameKind::Response);
}

#[tokio::test]
async fn test_watch_status_streams_changes() {
    let (addr, _handle) = start_test_server(3, true).await;
    let mut watcher = TcpStream::connect(addr).await.unwrap();
    let mut admin = TcpStream::connect(addr).await.unwrap();

    send(&mut watcher, "WatchStatus", json!({})).await;
    let (kind, first) = recv(&mut watcher).await;
    assert_eq!(kind, FrameKind::StreamChunk);
    assert_eq!(first["body"]["status"], "READY");

    let (_, resp) = round_trip(&mut admin, "Disable", json!({ "actor": actor("op", &[2]) })).await;
    assert_eq!(resp["body"]["status"], "OFF");

    let (_, next) = recv(&mut watcher).await;
    assert_eq!(next["body"]["status"], "OFF");
}

#[tokio::test]
async fn test_pending_submit_does_not_block_connection() {
    let parrot = Parrot {
        delay: Duration::from_millis(500),
    };
    let (addr, _handle) = start_server_with(parrot, 5, true).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();

    send_as(&mut stream, "slow", "Submit", json!({ "actor": actor("ann", &[]), "prompt": "think hard" })).await;
    send_as(&mut stream, "status", "GetStatus", json!({})).await;

    let mut seen = Vec::new();
    loop {
        let (kind, frame) = recv(&mut stream).await;
        let id = frame["id"].as_str().unwrap_or_default().to_string();
        let done = kind == FrameKind::StreamEnd;
        seen.push((kind, id, frame));
        if done {
            break;
        }
    }

    let status_at = seen
        .iter()
        .position(|(kind, id, _)| *kind == FrameKind::Response && id == "status")
        .expect("GetStatus was answered");
    let reply_at = seen
        .iter()
        .position(|(_, id, frame)| id == "slow" && frame["body"]["event"] == "reply")
        .expect("Submit was answered");
    assert!(status_at < reply_at, "frames: {:?}", seen);

    let status = &seen[status_at].2;
    assert_eq!(status["body"]["draining"], true);
    assert_eq!(status["body"]["accepted"], 1);
}
