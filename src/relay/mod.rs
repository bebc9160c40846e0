//! Relay Layer / Hub — spec.md §4.6.
//!
//! Bridges local UI WebSocket clients ("virtual devices") and remote peer
//! sessions. A `file-transfer` from a local client either lands on another
//! local client, gets forwarded to a remote peer session, or — when no
//! target is named and exactly one other device is visible — auto-pairs
//! with it; otherwise it fans out to every other local client, mirroring
//! the teacher's broadcast-to-all-sessions behavior in `run_peer_session`'s
//! clipboard branch.

pub mod protocol;

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use base64::Engine;
use log::{debug, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::discovery::DiscoveredPeer;
use crate::error::{EngineError, EngineResult};
use crate::session::protocol::{ChunkAckStatus, PeerMessage, RelayedDevice};
use crate::session::PeerSessionManager;
use crate::store::{NewTransfer, Store};
use crate::transfer::TransferEngine;
use protocol::{ServerMessage, VirtualDevice};

struct LocalClient {
    name: String,
    outbound: mpsc::UnboundedSender<ServerMessage>,
}

/// Where an in-flight client-initiated chunked transfer is headed, recorded
/// between `chunk-start` and `chunk-end` so later frames for the same
/// `transfer_token` know where to go without the client repeating it.
enum ChunkRoute {
    Remote { peer_id: Uuid, from_client: Uuid },
    Local { target: Option<Uuid>, from_client: Uuid },
}

pub struct Hub {
    store: Store,
    transfers: Arc<TransferEngine>,
    sessions: Arc<PeerSessionManager>,
    clients: Mutex<HashMap<Uuid, LocalClient>>,
    discovered: Mutex<HashMap<Uuid, DiscoveredPeer>>,
    remote_devices: Mutex<HashMap<Uuid, Vec<RelayedDevice>>>,
    chunk_routes: Mutex<HashMap<Uuid, ChunkRoute>>,
}

impl Hub {
    pub fn new(store: Store, transfers: Arc<TransferEngine>, sessions: Arc<PeerSessionManager>) -> Arc<Self> {
        Arc::new(Hub {
            store,
            transfers,
            sessions,
            clients: Mutex::new(HashMap::new()),
            discovered: Mutex::new(HashMap::new()),
            remote_devices: Mutex::new(HashMap::new()),
            chunk_routes: Mutex::new(HashMap::new()),
        })
    }

    pub fn note_discovered(&self, peer: DiscoveredPeer) {
        self.discovered.lock().insert(peer.peer_id, peer);
    }

    pub fn note_peer_gone(&self, peer_id: Uuid) {
        self.discovered.lock().remove(&peer_id);
    }

    /// Announces the virtual devices a connected peer's own hub is serving,
    /// learned from that peer's `relay-devices` broadcast.
    pub async fn note_remote_devices(&self, peer_id: Uuid, devices: Vec<RelayedDevice>) {
        self.remote_devices.lock().insert(peer_id, devices);
        self.broadcast_device_list().await;
    }

    pub async fn register_client(&self, client_id: Uuid, device_name: String) -> mpsc::UnboundedReceiver<ServerMessage> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.clients.lock().insert(client_id, LocalClient { name: device_name.clone(), outbound: tx });
        self.broadcast_connected(format!("local:{client_id}"), device_name, false, Some(client_id));
        self.broadcast_device_list().await;
        rx
    }

    pub async fn unregister_client(&self, client_id: Uuid) {
        self.clients.lock().remove(&client_id);
        self.chunk_routes.lock().retain(|_, route| !matches!(route, ChunkRoute::Local { from_client, .. } | ChunkRoute::Remote { from_client, .. } if *from_client == client_id));
        self.broadcast_disconnected(format!("local:{client_id}"));
        self.broadcast_device_list().await;
    }

    /// Called when a remote node's TCP session becomes ready (spec.md §4.4).
    pub async fn peer_session_connected(&self, peer_id: Uuid, display_name: String) {
        self.broadcast_connected(format!("peer:{peer_id}"), display_name, true, None);
        self.broadcast_device_list().await;
    }

    /// Called when a remote node's TCP session drops.
    pub async fn peer_session_disconnected(&self, peer_id: Uuid) {
        self.remote_devices.lock().remove(&peer_id);
        self.broadcast_disconnected(format!("peer:{peer_id}"));
        self.broadcast_device_list().await;
    }

    pub async fn list_devices(&self, requester: Uuid) -> Vec<VirtualDevice> {
        let mut out = Vec::new();

        for (id, client) in self.clients.lock().iter() {
            if *id == requester {
                continue;
            }
            out.push(VirtualDevice {
                device_id: *id,
                display_name: client.name.clone(),
                is_remote_peer: false,
                is_online: true,
            });
        }

        let ready: HashSet<Uuid> = self.sessions.ready_peers().into_iter().collect();

        if let Ok(peers) = self.store.list_peers().await {
            for peer in peers {
                out.push(VirtualDevice {
                    device_id: peer.peer_id,
                    display_name: peer.display_name,
                    is_remote_peer: true,
                    is_online: ready.contains(&peer.peer_id),
                });
            }
        }

        for (peer_id, devices) in self.remote_devices.lock().iter() {
            for d in devices {
                out.push(VirtualDevice {
                    device_id: d.device_id,
                    display_name: d.display_name.clone(),
                    is_remote_peer: true,
                    is_online: ready.contains(peer_id),
                });
            }
        }

        out
    }

    /// When no explicit target is given and exactly one other device is
    /// visible, auto-pair with it rather than fanning out (spec.md §4.6).
    fn resolve_implicit_target(&self, from_client: Uuid) -> Option<Uuid> {
        let mut others: Vec<Uuid> = self.clients.lock().keys().filter(|id| **id != from_client).copied().collect();
        others.extend(self.sessions.ready_peers());
        if others.len() == 1 {
            others.pop()
        } else {
            None
        }
    }

    /// Routes a `file-transfer` originating from a local UI client.
    pub async fn route_file_transfer(
        &self,
        from_client: Uuid,
        target_device_id: Option<Uuid>,
        display_name: String,
        mime: String,
        content_base64: String,
        is_clipboard: bool,
    ) -> EngineResult<i64> {
        let target_device_id = target_device_id.or_else(|| self.resolve_implicit_target(from_client));

        let bytes = base64::engine::general_purpose::STANDARD
            .decode(&content_base64)
            .map_err(|e| EngineError::InvalidArgument(format!("invalid base64 payload: {e}")))?;
        let storage_name = Uuid::new_v4().to_string();

        let is_remote_peer = target_device_id.map(|id| self.sessions.ready_peers().contains(&id)).unwrap_or(false);

        if is_remote_peer {
            let target = target_device_id.unwrap();
            let messages = TransferEngine::prepare_outgoing(storage_name.clone(), display_name.clone(), mime.clone(), &bytes, is_clipboard);
            for msg in messages {
                self.sessions.send_to(target, msg)?;
            }
            let rec = NewTransfer {
                storage_name,
                display_name,
                mime,
                byte_size: bytes.len() as u64,
                inline_content: None,
                origin_peer_id: None,
                destination_peer_id: Some(target),
                connection_ref: None,
                is_clipboard,
                origin_name_snapshot: None,
                destination_name_snapshot: None,
                tags: Vec::new(),
                extra_metadata: serde_json::json!({}),
            };
            let saved = self.store.create_transfer(rec).await?;
            return Ok(saved.id);
        }

        let rec = NewTransfer {
            storage_name,
            display_name: display_name.clone(),
            mime: mime.clone(),
            byte_size: bytes.len() as u64,
            inline_content: Some(content_base64),
            origin_peer_id: None,
            destination_peer_id: target_device_id,
            connection_ref: None,
            is_clipboard,
            origin_name_snapshot: None,
            destination_name_snapshot: None,
            tags: Vec::new(),
            extra_metadata: serde_json::json!({}),
        };
        let saved = self.store.create_transfer(rec).await?;

        let recipients: Vec<Uuid> = match target_device_id {
            Some(id) => vec![id],
            None => self.clients.lock().keys().filter(|id| **id != from_client).copied().collect(),
        };

        let clients = self.clients.lock();
        for id in recipients {
            if let Some(client) = clients.get(&id) {
                let _ = client.outbound.send(ServerMessage::FileReceived {
                    transfer_id: saved.id,
                    display_name: display_name.clone(),
                    origin_device_id: Some(from_client),
                });
            }
        }

        Ok(saved.id)
    }

    /// Registers a client-initiated chunked transfer and either forwards
    /// `chunk-start` to the target peer or starts local chunk assembly.
    #[allow(clippy::too_many_arguments)]
    pub fn route_chunk_start(
        &self,
        from_client: Uuid,
        transfer_token: Uuid,
        target_device_id: Option<Uuid>,
        storage_name: String,
        display_name: String,
        mime: String,
        byte_size: u64,
        total_chunks: u32,
        sha256: String,
        is_clipboard: bool,
    ) {
        let target_device_id = target_device_id.or_else(|| self.resolve_implicit_target(from_client));
        let is_remote_peer = target_device_id.map(|id| self.sessions.ready_peers().contains(&id)).unwrap_or(false);

        if is_remote_peer {
            let peer_id = target_device_id.unwrap();
            self.chunk_routes.lock().insert(transfer_token, ChunkRoute::Remote { peer_id, from_client });
            let msg = PeerMessage::ChunkStart {
                transfer_token,
                storage_name,
                display_name,
                mime,
                byte_size,
                total_chunks,
                sha256,
                is_clipboard,
            };
            match self.sessions.send_to(peer_id, msg) {
                Ok(()) => self.send_chunk_ack(from_client, transfer_token, true, None),
                Err(e) => self.send_chunk_error(from_client, transfer_token, &e.to_string()),
            }
            return;
        }

        self.chunk_routes.lock().insert(transfer_token, ChunkRoute::Local { target: target_device_id, from_client });
        let ack = self
            .transfers
            .handle_chunk_start(None, transfer_token, storage_name, display_name, mime, byte_size, total_chunks, sha256, is_clipboard);
        self.forward_chunk_frame_to_client(from_client, ack);
    }

    pub fn route_chunk_data(&self, transfer_token: Uuid, index: u32, bytes_base64: String) {
        let route = self.chunk_routes.lock().get(&transfer_token).map(|r| match r {
            ChunkRoute::Remote { peer_id, from_client } => (Some(*peer_id), *from_client),
            ChunkRoute::Local { from_client, .. } => (None, *from_client),
        });
        let Some((remote_peer, from_client)) = route else {
            warn!("relay: chunk-data for unknown transfer {transfer_token}");
            return;
        };

        if let Some(peer_id) = remote_peer {
            let msg = PeerMessage::ChunkData { transfer_token, index, bytes_base64 };
            match self.sessions.send_to(peer_id, msg) {
                Ok(()) => self.send_chunk_ack(from_client, transfer_token, true, None),
                Err(e) => self.send_chunk_error(from_client, transfer_token, &e.to_string()),
            }
            return;
        }

        let ack = self.transfers.handle_chunk_data(transfer_token, index, &bytes_base64);
        self.forward_chunk_frame_to_client(from_client, ack);
    }

    pub async fn route_chunk_end(&self, transfer_token: Uuid) {
        let Some(route) = self.chunk_routes.lock().remove(&transfer_token) else {
            warn!("relay: chunk-end for unknown transfer {transfer_token}");
            return;
        };

        match route {
            ChunkRoute::Remote { peer_id, from_client } => match self.sessions.send_to(peer_id, PeerMessage::ChunkEnd { transfer_token }) {
                Ok(()) => self.send_chunk_ack(from_client, transfer_token, true, None),
                Err(e) => self.send_chunk_error(from_client, transfer_token, &e.to_string()),
            },
            ChunkRoute::Local { target, from_client } => {
                let (ack, completed) = self.transfers.handle_chunk_end(transfer_token).await;
                self.forward_chunk_frame_to_client(from_client, ack);

                if let Some((transfer_id, display_name)) = completed {
                    let recipients: Vec<Uuid> = match target {
                        Some(id) => vec![id],
                        None => self.clients.lock().keys().filter(|id| **id != from_client).copied().collect(),
                    };
                    let clients = self.clients.lock();
                    for id in recipients {
                        if let Some(client) = clients.get(&id) {
                            let _ = client.outbound.send(ServerMessage::FileReceived {
                                transfer_id,
                                display_name: display_name.clone(),
                                origin_device_id: Some(from_client),
                            });
                        }
                    }
                }
            }
        }
    }

    /// A remote peer session delivered a completed transfer; notify local
    /// clients a new file is available (the blob/record already landed in
    /// the store via `TransferEngine`).
    pub fn notify_received_from_peer(&self, peer_id: Uuid, transfer_id: i64, display_name: String) {
        let clients = self.clients.lock();
        if clients.is_empty() {
            warn!("relay: transfer {transfer_id} from {peer_id} arrived with no local clients connected");
        }
        for client in clients.values() {
            let _ = client.outbound.send(ServerMessage::FileReceived {
                transfer_id,
                display_name: display_name.clone(),
                origin_device_id: None,
            });
        }
    }

    pub fn terminate_connection(&self, device_id: Uuid) {
        self.sessions.disconnect(device_id);
        self.clients.lock().remove(&device_id);
    }

    fn broadcast_connected(&self, socket_id: String, display_name: String, is_remote_peer: bool, except: Option<Uuid>) {
        self.send_to_clients(ServerMessage::DeviceConnected { socket_id, display_name, is_remote_peer }, except);
    }

    fn broadcast_disconnected(&self, socket_id: String) {
        self.send_to_clients(ServerMessage::DeviceDisconnected { socket_id }, None);
    }

    fn send_to_clients(&self, msg: ServerMessage, except: Option<Uuid>) {
        for (id, client) in self.clients.lock().iter() {
            if Some(*id) == except {
                continue;
            }
            let _ = client.outbound.send(msg.clone());
        }
    }

    /// Resyncs every local client's device list and every ready peer's view
    /// of this hub's local devices (spec.md §4.6 `relay-devices`).
    async fn broadcast_device_list(&self) {
        let client_ids: Vec<Uuid> = self.clients.lock().keys().copied().collect();
        for id in client_ids {
            let devices = self.list_devices(id).await;
            if let Some(client) = self.clients.lock().get(&id) {
                let _ = client.outbound.send(ServerMessage::DeviceList { devices });
            }
        }

        let relay_devices: Vec<RelayedDevice> = self
            .clients
            .lock()
            .iter()
            .map(|(id, c)| RelayedDevice { device_id: *id, display_name: c.name.clone() })
            .collect();
        for peer_id in self.sessions.ready_peers() {
            let _ = self.sessions.send_to(peer_id, PeerMessage::RelayDevices { devices: relay_devices.clone() });
        }
    }

    fn send_chunk_ack(&self, client_id: Uuid, transfer_token: Uuid, ok: bool, message: Option<String>) {
        let status = if ok { ChunkAckStatus::Ok } else { ChunkAckStatus::Error };
        self.forward_chunk_frame_to_client(client_id, PeerMessage::ChunkAck { transfer_token, status, chunk_index: None, message });
    }

    fn send_chunk_error(&self, client_id: Uuid, transfer_token: Uuid, error: &str) {
        self.forward_chunk_frame_to_client(client_id, PeerMessage::ChunkError { transfer_token, error: error.to_string() });
    }

    fn forward_chunk_frame_to_client(&self, client_id: Uuid, msg: PeerMessage) {
        let server_msg = match msg {
            PeerMessage::ChunkAck { transfer_token, status, message, .. } => ServerMessage::ChunkAck { transfer_token, status, message },
            PeerMessage::ChunkError { transfer_token, error } => ServerMessage::ChunkAck {
                transfer_token,
                status: ChunkAckStatus::Error,
                message: Some(error),
            },
            other => {
                warn!("relay: unexpected chunk frame for client {client_id}: {other:?}");
                return;
            }
        };
        if let Some(client) = self.clients.lock().get(&client_id) {
            let _ = client.outbound.send(server_msg);
        }
    }
}

/// Forwards a fully-assembled incoming `PeerMessage` to the transfer
/// engine and, on success, notifies local clients through the hub.
pub async fn handle_inbound_peer_message(hub: &Hub, transfers: &TransferEngine, peer_id: Uuid, msg: PeerMessage) {
    match msg {
        PeerMessage::FileTransfer { storage_name, display_name, mime, byte_size, content_base64, is_clipboard } => {
            match transfers
                .handle_file_transfer(Some(peer_id), storage_name, display_name.clone(), mime, byte_size, content_base64, is_clipboard)
                .await
            {
                Ok(id) => hub.notify_received_from_peer(peer_id, id, display_name),
                Err(e) => warn!("relay: failed to store file-transfer from {peer_id}: {e}"),
            }
        }
        PeerMessage::ChunkStart { transfer_token, storage_name, display_name, mime, byte_size, total_chunks, sha256, is_clipboard } => {
            let ack = transfers.handle_chunk_start(Some(peer_id), transfer_token, storage_name, display_name, mime, byte_size, total_chunks, sha256, is_clipboard);
            if let Err(e) = hub_send_ack(hub, peer_id, ack) {
                warn!("relay: failed to ack chunk-start to {peer_id}: {e}");
            }
        }
        PeerMessage::ChunkData { transfer_token, index, bytes_base64 } => {
            let ack = transfers.handle_chunk_data(transfer_token, index, &bytes_base64);
            if let Err(e) = hub_send_ack(hub, peer_id, ack) {
                warn!("relay: failed to ack chunk-data to {peer_id}: {e}");
            }
        }
        PeerMessage::ChunkEnd { transfer_token } => {
            let (ack, completed) = transfers.handle_chunk_end(transfer_token).await;
            if let Some((transfer_id, display_name)) = completed {
                hub.notify_received_from_peer(peer_id, transfer_id, display_name);
            }
            if let Err(e) = hub_send_ack(hub, peer_id, ack) {
                warn!("relay: failed to ack chunk-end to {peer_id}: {e}");
            }
        }
        PeerMessage::RelayDevices { devices } => {
            hub.note_remote_devices(peer_id, devices).await;
        }
        PeerMessage::ChunkAck { .. } | PeerMessage::ChunkError { .. } => {
            debug!("relay: {peer_id} acked a chunk frame");
        }
        other => {
            warn!("relay: unexpected message from {peer_id} in hub context: {other:?}");
        }
    }
}

fn hub_send_ack(hub: &Hub, peer_id: Uuid, ack: PeerMessage) -> EngineResult<()> {
    hub.sessions.send_to(peer_id, ack)
}
