//! TCP IPC server: accept loop and per-connection handler.

use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::controller::ModuleController;
use crate::ipc::codec::{decode, encode, read_frame, write_frame, FrameKind};
use crate::ipc::router::{self, DispatchResponse};
use crate::types::IpcConfig;

/// Envelope of every request frame.
#[derive(Debug, Deserialize)]
struct RequestEnvelope {
    #[serde(default)]
    id: String,
    #[serde(default)]
    service: String,
    #[serde(default)]
    method: String,
    #[serde(default)]
    body: Value,
}

/// IPC server wrapping the module controller.
#[derive(Debug)]
pub struct IpcServer {
    controller: ModuleController,
    addr: SocketAddr,
    cancel: CancellationToken,
    ipc_config: IpcConfig,
}

impl IpcServer {
    pub fn new(controller: ModuleController, addr: SocketAddr, ipc_config: IpcConfig) -> Self {
        Self {
            controller,
            addr,
            cancel: CancellationToken::new(),
            ipc_config,
        }
    }

    /// Token that stops the server when cancelled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Bind and run until cancelled or a fatal error occurs.
    pub async fn serve(&self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.addr).await?;
        self.serve_on(listener).await
    }

    /// Run on an already bound listener.
    pub async fn serve_on(&self, listener: TcpListener) -> std::io::Result<()> {
        let conn_semaphore = Arc::new(Semaphore::new(self.ipc_config.max_connections));
        tracing::info!(
            addr = %listener.local_addr()?,
            max_connections = self.ipc_config.max_connections,
            "IPC server listening"
        );

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("IPC server shutting down");
                    break;
                }
                accept = listener.accept() => {
                    let (stream, peer) = accept?;

                    let permit = match conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            tracing::warn!(
                                %peer,
                                max_connections = self.ipc_config.max_connections,
                                "Connection rejected: at capacity"
                            );
                            drop(stream);
                            continue;
                        }
                    };

                    tracing::debug!(%peer, "IPC connection accepted");
                    let controller = self.controller.clone();
                    let cancel = self.cancel.clone();
                    let ipc_config = self.ipc_config.clone();
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, controller, cancel, ipc_config, permit).await {
                            tracing::warn!(%peer, error = %e, "Connection error");
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Request graceful shutdown.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }
}

fn error_payload(id: &str, code: &str, message: impl Into<String>) -> Value {
    json!({
        "id": id,
        "ok": false,
        "error": {
            "code": code,
            "message": message.into(),
        }
    })
}

/// Outgoing frame queued for the connection's writer task.
type Outgoing = (FrameKind, Vec<u8>);

/// Handle a single TCP connection.
///
/// The read loop only dispatches. Every frame goes out through one writer
/// task, and streamed responses are forwarded by their own tasks, so a
/// Submit waiting on the backend never holds up the next request on the
/// same connection. Frames of different requests may interleave; clients
/// match them by `id`.
async fn handle_connection(
    stream: TcpStream,
    controller: ModuleController,
    cancel: CancellationToken,
    ipc_config: IpcConfig,
    _permit: OwnedSemaphorePermit, // held for connection lifetime
) -> std::io::Result<()> {
    let (mut reader, writer) = stream.into_split();
    let read_timeout = Duration::from_secs(ipc_config.read_timeout_secs);
    let write_timeout = Duration::from_secs(ipc_config.write_timeout_secs);

    let (out_tx, out_rx) = mpsc::channel::<Outgoing>(ipc_config.stream_channel_capacity);
    let writer_task = tokio::spawn(write_loop(writer, out_rx, write_timeout));
    let mut forwarders = JoinSet::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            frame_result = tokio::time::timeout(read_timeout, read_frame(&mut reader, ipc_config.max_frame_bytes)) => {
                let (kind, payload) = match frame_result {
                    Err(_elapsed) => {
                        tracing::debug!(secs = ipc_config.read_timeout_secs, "Read timeout, dropping connection");
                        break;
                    }
                    Ok(result) => match result? {
                        Some(frame) => frame,
                        None => break, // clean EOF
                    },
                };

                let outgoing = match dispatch_frame(&controller, &ipc_config, kind, &payload).await? {
                    Dispatched::Frame(frame) => frame,
                    Dispatched::Stream(id, rx) => {
                        while forwarders.try_join_next().is_some() {}
                        forwarders.spawn(forward_stream(id, rx, out_tx.clone()));
                        continue;
                    }
                };
                if out_tx.send(outgoing).await.is_err() {
                    break; // writer gave up
                }
            }
        }
    }

    forwarders.abort_all();
    drop(out_tx);
    match writer_task.await {
        Ok(result) => result,
        Err(e) => Err(std::io::Error::other(e)),
    }
}

enum Dispatched {
    Frame(Outgoing),
    Stream(String, mpsc::Receiver<Value>),
}

/// Decode one frame and run it through the router.
async fn dispatch_frame(
    controller: &ModuleController,
    ipc_config: &IpcConfig,
    kind: u8,
    payload: &[u8],
) -> std::io::Result<Dispatched> {
    if FrameKind::from_byte(kind) != Some(FrameKind::Request) {
        let err = error_payload("", "INVALID_ARGUMENT", format!("Unexpected message type: 0x{:02X}", kind));
        return Ok(Dispatched::Frame((FrameKind::Error, encode(&err)?)));
    }

    let request: RequestEnvelope = match decode(payload) {
        Ok(request) => request,
        Err(e) => {
            let err = error_payload("", "INVALID_ARGUMENT", format!("Invalid msgpack: {}", e));
            return Ok(Dispatched::Frame((FrameKind::Error, encode(&err)?)));
        }
    };

    let result = router::route_request(
        controller,
        &request.service,
        &request.method,
        request.body,
        ipc_config,
    )
    .await;

    match result {
        Ok(DispatchResponse::Single(body)) => {
            let response = json!({
                "id": request.id,
                "ok": true,
                "body": body,
            });
            Ok(Dispatched::Frame((FrameKind::Response, encode(&response)?)))
        }
        Ok(DispatchResponse::Stream(rx)) => Ok(Dispatched::Stream(request.id, rx)),
        Err(e) => {
            tracing::debug!(method = %request.method, error = %e, "Request failed");
            let err = error_payload(&request.id, e.to_ipc_error_code(), e.user_message());
            Ok(Dispatched::Frame((FrameKind::Error, encode(&err)?)))
        }
    }
}

/// Relay one streamed response as chunks followed by a stream end.
async fn forward_stream(id: String, mut rx: mpsc::Receiver<Value>, out_tx: mpsc::Sender<Outgoing>) {
    while let Some(chunk) = rx.recv().await {
        let frame = json!({
            "id": id,
            "body": chunk,
        });
        let Ok(payload) = encode(&frame) else {
            continue;
        };
        if out_tx.send((FrameKind::StreamChunk, payload)).await.is_err() {
            return;
        }
    }
    if let Ok(payload) = encode(&json!({ "id": id })) {
        let _ = out_tx.send((FrameKind::StreamEnd, payload)).await;
    }
}

/// Sole owner of the write half.
async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut out_rx: mpsc::Receiver<Outgoing>,
    write_timeout: Duration,
) -> std::io::Result<()> {
    while let Some((kind, payload)) = out_rx.recv().await {
        timed_write(&mut writer, kind, &payload, write_timeout).await?;
    }
    Ok(())
}

/// Write a frame with a timeout. Slow consumers are dropped.
async fn timed_write<W: tokio::io::AsyncWriteExt + Unpin>(
    writer: &mut W,
    kind: FrameKind,
    payload: &[u8],
    timeout: Duration,
) -> std::io::Result<()> {
    tokio::time::timeout(timeout, write_frame(writer, kind, payload))
        .await
        .map_err(|_| {
            tracing::warn!(secs = timeout.as_secs(), "Write timeout, dropping connection");
            std::io::Error::new(std::io::ErrorKind::TimedOut, "write timeout")
        })?
}
