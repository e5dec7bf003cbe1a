//! Mind relay server - main entry point.
//!
//! Loads the configuration file, attaches to the shared assistant session and
//! serves chat commands over the IPC transport until Ctrl-C.

use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use mind_relay::backend::{AssistantsClient, BackendSession};
use mind_relay::ipc::IpcServer;
use mind_relay::pipeline::LogPresence;
use mind_relay::{ConfigStore, ModuleController};

#[derive(Parser, Debug)]
#[command(name = "mind-relay", version, about = "Single-flight chat relay to a shared assistant")]
struct Args {
    /// Path to the JSON configuration file.
    #[arg(long, env = "MIND_RELAY_CONFIG", default_value = "settings/config.json")]
    config: PathBuf,

    /// Override `server.listen_addr`.
    #[arg(long, env = "MIND_RELAY_LISTEN")]
    listen: Option<SocketAddr>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    // Configuration problems are fatal
    let store = Arc::new(ConfigStore::load(&args.config).await?);
    let config = store.snapshot().await;

    mind_relay::observability::init_tracing(&config.observability);

    let client = AssistantsClient::new(&config.backend, config.pipeline.poll_interval)?;
    let backend = Arc::new(BackendSession::connect(Arc::new(client), store.clone()).await?);
    let controller = ModuleController::new(backend.clone(), store.clone()).await?;

    let presence = controller
        .status_publisher()
        .spawn_forwarder(Arc::new(LogPresence));

    let addr = match args.listen {
        Some(addr) => addr,
        None => config.server.listen_addr.parse()?,
    };

    tracing::info!(
        %addr,
        assistant = %backend.assistant_name(),
        backend_timeout = ?backend.timeout(),
        capacity = config.pipeline.capacity,
        enabled = config.pipeline.enabled_on_start,
        "Mind relay starting"
    );

    let server = IpcServer::new(controller, addr, config.ipc.clone());
    let cancel = server.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Ctrl-C received, shutting down");
            cancel.cancel();
        }
    });

    server.serve().await?;
    presence.abort();
    Ok(())
}
