use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Mutex as AsyncMutex};

use meshdrop_engine::events::EngineEvent;
use meshdrop_engine::identity::{self, IdentityStore};
use meshdrop_engine::{api, app_log, engine};

fn main() -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    runtime.block_on(run())
}

async fn run() -> Result<()> {
    let data_dir = identity::resolve_data_dir(std::env::var("MESHDROP_DATA_DIR").ok().map(Into::into))?;

    app_log::setup_logger(&data_dir).context("failed to set up logging")?;

    let mut identity = IdentityStore::open(&data_dir);
    if !identity.is_writable() {
        log::warn!("data dir {} is unwritable; running with in-memory identity/config", data_dir.display());
    }

    if let Ok(name) = std::env::var("MESHDROP_DISPLAY_NAME") {
        identity.set_display_name(&name);
    }
    if let Some(port) = std::env::var("MESHDROP_PORT").ok().and_then(|s| s.parse().ok()) {
        identity.set_port(port);
    }
    if let Some(port) = std::env::var("MESHDROP_API_PORT").ok().and_then(|s| s.parse().ok()) {
        identity.set_api_port(port);
    }

    let api_port = identity.api_port();
    let node_id = identity.node_id();
    let identity = Arc::new(AsyncMutex::new(identity));

    log::info!("meshdrop engine starting (node_id={node_id}, data_dir={})", data_dir.display());

    let (events_tx, mut events_rx) = mpsc::channel::<EngineEvent>(256);
    tokio::spawn(async move {
        while let Some(event) = events_rx.recv().await {
            log_engine_event(&event);
        }
    });

    let (handle, app_state, _node_id) = match engine::start(data_dir, identity, events_tx).await {
        Ok(v) => v,
        Err(e) => {
            log::error!("engine failed to start: {e}");
            std::process::exit(1);
        }
    };

    let router = api::build_router(app_state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], api_port));

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            log::error!("local API port {api_port} unavailable: {e}");
            handle.shutdown().await;
            std::process::exit(1);
        }
    };
    log::info!("local API listening on {addr}");

    let serve = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
    if let Err(e) = serve.await {
        log::error!("local API server error: {e}");
    }

    handle.shutdown().await;
    log::info!("meshdrop engine stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    log::info!("shutdown signal received");
}

fn log_engine_event(event: &EngineEvent) {
    match event {
        EngineEvent::PeerAppeared { peer_id, display_name } => log::info!("peer appeared: {display_name} ({peer_id})"),
        EngineEvent::PeerDisappeared { peer_id } => log::info!("peer disappeared: {peer_id}"),
        EngineEvent::PeerConnected { peer_id, display_name } => log::info!("peer connected: {display_name} ({peer_id})"),
        EngineEvent::PeerDisconnected { peer_id } => log::info!("peer disconnected: {peer_id}"),
        EngineEvent::TransferReceived { transfer_id, display_name, origin_peer_id } => {
            log::info!("transfer received: #{transfer_id} {display_name} (from {origin_peer_id:?})")
        }
        EngineEvent::Error { message } => log::error!("engine error: {message}"),
    }
}
