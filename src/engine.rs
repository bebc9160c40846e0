//! Top-level orchestrator — spec.md §5.
//!
//! Generalizes two teacher patterns: `runtime/lan/mod.rs`'s `LanTasks` /
//! `start_lan_mode` (a tree of sibling tasks under one `CancellationToken`)
//! and the GUI's `RuntimeWorker`/`RuntimeHandle` command-actor
//! (`GUI/src/runtime/mod.rs`) for lifecycle control from outside the
//! runtime. Discovery, the session manager, the transfer engine, and the
//! hub all get the same child token so a shutdown fans out to every task
//! without each one needing to know about the others.

use std::path::PathBuf;
use std::sync::Arc;

use log::{error, info};
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::api::AppState;
use crate::discovery::{DiscoveryEvent, DiscoveryTransport, UdpBeaconDiscovery};
use crate::error::EngineResult;
use crate::events::EngineEvent;
use crate::identity::IdentityStore;
use crate::relay::{self, Hub};
use crate::session::{PeerSessionManager, SessionEvent};
use crate::store::Store;
use crate::transfer::TransferEngine;

pub struct Engine {
    cancel: CancellationToken,
    sessions: Arc<PeerSessionManager>,
    discovery: Arc<UdpBeaconDiscovery>,
    discovery_events_tx: mpsc::Sender<DiscoveryEvent>,
    store: Store,
}

#[derive(Clone)]
pub struct EngineHandle {
    engine: Arc<Engine>,
}

impl EngineHandle {
    pub async fn shutdown(&self) {
        info!("engine: shutting down");
        self.engine.discovery.stop().await;
        self.engine.sessions.shutdown();
        self.engine.cancel.cancel();
    }

    pub async fn rename(&self, name: String) {
        self.engine.sessions.update_name(name.clone());
        self.engine.discovery.update_name(name).await;
    }

    /// Restarts the UDP beacon broadcaster/listener (spec.md §4.3/§6),
    /// e.g. after the user changes network interfaces.
    pub async fn restart_discovery(&self) -> EngineResult<()> {
        self.engine.discovery.restart(self.engine.discovery_events_tx.clone()).await
    }

    /// Enables or disables dialing a known peer (spec.md §8 scenario 5).
    pub async fn set_peer_enabled(&self, peer_id: Uuid, enabled: bool) -> EngineResult<()> {
        self.engine.store.set_peer_enabled(peer_id, enabled).await?;
        if !enabled {
            self.engine.sessions.disconnect(peer_id);
        }
        Ok(())
    }
}

/// Wires every component together and starts their background tasks.
/// Returns a handle for lifecycle control, the `AppState` the HTTP/WS
/// layer is built from, and the node's own peer id.
pub async fn start(
    data_dir: PathBuf,
    identity: Arc<AsyncMutex<IdentityStore>>,
    events_tx: mpsc::Sender<EngineEvent>,
) -> EngineResult<(EngineHandle, AppState, Uuid)> {
    let (node_id, display_name, tcp_port) = {
        let id = identity.lock().await;
        (id.node_id(), id.display_name(), id.port())
    };

    let db_path = data_dir.join("meshdrop.db");
    let store = Store::open(&db_path)?;

    let transfers = Arc::new(TransferEngine::new(store.clone(), &data_dir));

    let root_cancel = CancellationToken::new();

    let (session_events_tx, mut session_events_rx) = mpsc::channel::<SessionEvent>(256);
    let sessions = PeerSessionManager::new(node_id, display_name.clone(), tcp_port, session_events_tx, root_cancel.child_token());
    sessions.start_listener().await?;

    let hub = Hub::new(store.clone(), transfers.clone(), sessions.clone());

    let discovery = Arc::new(UdpBeaconDiscovery::new(
        node_id,
        display_name,
        sessions.listen_addr().port(),
        crate::discovery::protocol::DEFAULT_DISCOVERY_PORT,
    ));
    let (discovery_events_tx, mut discovery_events_rx) = mpsc::channel::<DiscoveryEvent>(256);
    discovery.start(discovery_events_tx.clone()).await?;

    transfers.spawn_stale_reaper(root_cancel.child_token());

    // Bridges discovery sightings into the session manager's dial policy
    // and the hub's virtual-device list.
    {
        let sessions = sessions.clone();
        let hub = hub.clone();
        let events_tx = events_tx.clone();
        let store = store.clone();
        let cancel = root_cancel.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = discovery_events_rx.recv() => {
                        match event {
                            Some(DiscoveryEvent::PeerAppeared(peer)) => {
                                match store.upsert_peer_by_id(peer.peer_id, peer.display_name.clone(), Some(peer.host.to_string()), Some(peer.tcp_port)).await {
                                    Ok(record) => {
                                        hub.note_discovered(peer.clone());
                                        sessions.on_peer_discovered(peer.clone(), record.enabled_by_user);
                                    }
                                    Err(e) => error!("engine: upsert_peer_by_id({}) failed: {e}", peer.peer_id),
                                }
                                let _ = events_tx.send(EngineEvent::PeerAppeared { peer_id: peer.peer_id, display_name: peer.display_name }).await;
                            }
                            Some(DiscoveryEvent::PeerDisappeared(peer_id)) => {
                                hub.note_peer_gone(peer_id);
                                sessions.disconnect(peer_id);
                                let _ = events_tx.send(EngineEvent::PeerDisappeared { peer_id }).await;
                            }
                            None => break,
                        }
                    }
                }
            }
        });
    }

    // Bridges session lifecycle + inbound wire messages into the store,
    // the hub, and outward-facing engine events.
    {
        let hub = hub.clone();
        let transfers = transfers.clone();
        let store = store.clone();
        let events_tx = events_tx.clone();
        let cancel = root_cancel.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    event = session_events_rx.recv() => {
                        match event {
                            Some(SessionEvent::Connected { peer_id, display_name, session_token }) => {
                                if let Err(e) = store.mark_peer_online(peer_id, session_token).await {
                                    error!("engine: mark_peer_online({peer_id}) failed: {e}");
                                }
                                hub.peer_session_connected(peer_id, display_name.clone()).await;
                                let _ = events_tx.send(EngineEvent::PeerConnected { peer_id, display_name }).await;
                            }
                            Some(SessionEvent::Disconnected { peer_id, session_token }) => {
                                if let Err(e) = store.mark_peer_offline(&session_token).await {
                                    error!("engine: mark_peer_offline failed: {e}");
                                }
                                hub.peer_session_disconnected(peer_id).await;
                                let _ = events_tx.send(EngineEvent::PeerDisconnected { peer_id }).await;
                            }
                            Some(SessionEvent::Message { peer_id, message }) => {
                                relay::handle_inbound_peer_message(&hub, &transfers, peer_id, message).await;
                            }
                            None => break,
                        }
                    }
                }
            }
        });
    }

    let engine = Arc::new(Engine {
        cancel: root_cancel,
        sessions,
        discovery,
        discovery_events_tx,
        store: store.clone(),
    });
    let handle = EngineHandle { engine };

    let app_state = AppState { store, transfers, hub, identity, handle: handle.clone() };

    Ok((handle, app_state, node_id))
}
