//! Peer Session Manager — spec.md §4.4.
//!
//! Generalized from the teacher's `runtime/lan/mod.rs` (`LanTasks`,
//! `start_lan_mode`, `run_peer_connector`) and `runtime/lan/peer.rs`
//! (`run_tcp_host`, `run_tcp_client`, `run_peer_session`). The dial
//! tie-break is deliberately different from the teacher: the teacher lets
//! the higher `device_id` dial, spec.md requires the *lower* `peer_id` to
//! dial (`min(peer_id)` wins the race), so only one side ever opens the
//! socket for a given pair.

pub mod protocol;
pub mod transport;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use parking_lot::Mutex;
use rand::Rng;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::discovery::DiscoveredPeer;
use crate::error::{EngineError, EngineResult};
use protocol::{PeerMessage, DEFAULT_TCP_PORT, HEARTBEAT_INTERVAL_SECS, HEARTBEAT_TIMEOUT_SECS, INITIAL_RECONNECT_DELAY_SECS, MAX_RECONNECT_DELAY_SECS};
use transport::{read_peer_message, write_peer_message};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Handshaking,
    Ready,
    Closing,
    Closed,
}

#[derive(Debug, Clone)]
pub enum SessionEvent {
    Connected { peer_id: Uuid, display_name: String, session_token: String },
    Disconnected { peer_id: Uuid, session_token: String },
    Message { peer_id: Uuid, message: PeerMessage },
}

struct SessionHandle {
    state: SessionState,
    outbound: mpsc::UnboundedSender<PeerMessage>,
    close: CancellationToken,
}

/// Owns every live or in-progress connection to a remote node, keyed by
/// that node's `peer_id`. Never more than one `Ready` session exists per
/// peer (spec.md §8 property 1) — a fresh inbound or outbound attempt for
/// a peer that already has a live session is rejected.
pub struct PeerSessionManager {
    node_id: Uuid,
    display_name: Mutex<String>,
    tcp_port: u16,
    sessions: Arc<Mutex<HashMap<Uuid, SessionHandle>>>,
    events: mpsc::Sender<SessionEvent>,
    cancel: CancellationToken,
}

impl PeerSessionManager {
    pub fn new(node_id: Uuid, display_name: String, tcp_port: u16, events: mpsc::Sender<SessionEvent>, cancel: CancellationToken) -> Arc<Self> {
        Arc::new(PeerSessionManager {
            node_id,
            display_name: Mutex::new(display_name),
            tcp_port: if tcp_port == 0 { DEFAULT_TCP_PORT } else { tcp_port },
            sessions: Arc::new(Mutex::new(HashMap::new())),
            events,
            cancel,
        })
    }

    pub fn update_name(&self, name: String) {
        *self.display_name.lock() = name;
    }

    pub fn listen_addr(&self) -> SocketAddr {
        (std::net::Ipv4Addr::UNSPECIFIED, self.tcp_port).into()
    }

    /// Spawns the accept loop. Returns `PortInUse` if the bind fails.
    pub async fn start_listener(self: &Arc<Self>) -> EngineResult<()> {
        let listener = TcpListener::bind(self.listen_addr())
            .await
            .map_err(|_| EngineError::PortInUse(self.tcp_port))?;
        let this = self.clone();
        tokio::spawn(async move { this.run_accept_loop(listener).await });
        Ok(())
    }

    async fn run_accept_loop(self: Arc<Self>, listener: TcpListener) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, addr)) => {
                            let this = self.clone();
                            tokio::spawn(async move { this.host_session(stream, addr).await });
                        }
                        Err(e) => warn!("session: accept failed: {e}"),
                    }
                }
            }
        }
    }

    /// Called by the discovery layer whenever a peer appears. Dials the
    /// peer only if the user hasn't disabled it, this node's `peer_id` is
    /// lower (spec.md §4.4 tie-break), and no session for it already exists.
    pub fn on_peer_discovered(self: &Arc<Self>, peer: DiscoveredPeer, enabled: bool) {
        if !enabled {
            debug!("session: not dialing {} (disabled by user)", peer.peer_id);
            return;
        }
        if !should_dial(self.node_id, peer.peer_id) {
            debug!("session: not dialing {} (higher or equal peer_id wins the race)", peer.peer_id);
            return;
        }
        if self.sessions.lock().contains_key(&peer.peer_id) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move { this.run_connector(peer).await });
    }

    async fn run_connector(self: Arc<Self>, peer: DiscoveredPeer) {
        let jitter = rand::thread_rng().gen_range(500..2000);
        tokio::time::sleep(Duration::from_millis(jitter)).await;

        let mut delay = INITIAL_RECONNECT_DELAY_SECS;
        loop {
            if self.cancel.is_cancelled() || self.sessions.lock().contains_key(&peer.peer_id) {
                return;
            }
            let addr: SocketAddr = (peer.host, peer.tcp_port).into();
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    self.client_session(stream, peer.peer_id).await;
                    return;
                }
                Err(e) => {
                    debug!("session: dial {} failed: {e}, retrying in {delay}s", peer.peer_id);
                    tokio::select! {
                        _ = self.cancel.cancelled() => return,
                        _ = tokio::time::sleep(Duration::from_secs(delay)) => {}
                    }
                    delay = (delay * 2).min(MAX_RECONNECT_DELAY_SECS);
                }
            }
        }
    }

    async fn host_session(self: Arc<Self>, stream: TcpStream, addr: SocketAddr) {
        let (mut reader, mut writer) = stream.into_split();

        let hello = match read_peer_message(&mut reader).await {
            Ok(PeerMessage::Handshake { peer_id, display_name }) => (peer_id, display_name),
            Ok(_) => {
                warn!("session: {addr} sent non-handshake as first frame");
                return;
            }
            Err(e) => {
                warn!("session: handshake read from {addr} failed: {e}");
                return;
            }
        };
        let (peer_id, peer_name) = hello;

        if self.sessions.lock().contains_key(&peer_id) {
            warn!("session: rejecting duplicate inbound session for {peer_id}");
            return;
        }

        let ack = PeerMessage::HandshakeAck {
            peer_id: self.node_id,
            display_name: self.display_name.lock().clone(),
        };
        if write_peer_message(&mut writer, &ack).await.is_err() {
            return;
        }

        self.run_session(reader, writer, peer_id, peer_name).await;
    }

    async fn client_session(self: Arc<Self>, stream: TcpStream, expected_peer_id: Uuid) {
        let (mut reader, mut writer) = stream.into_split();

        let hello = PeerMessage::Handshake {
            peer_id: self.node_id,
            display_name: self.display_name.lock().clone(),
        };
        if write_peer_message(&mut writer, &hello).await.is_err() {
            return;
        }

        match read_peer_message(&mut reader).await {
            Ok(PeerMessage::HandshakeAck { peer_id, display_name }) if peer_id == expected_peer_id => {
                self.run_session(reader, writer, peer_id, display_name).await;
            }
            Ok(_) => warn!("session: unexpected ack from {expected_peer_id}"),
            Err(e) => debug!("session: ack read from {expected_peer_id} failed: {e}"),
        }
    }

    async fn run_session(
        self: Arc<Self>,
        mut reader: tokio::net::tcp::OwnedReadHalf,
        mut writer: tokio::net::tcp::OwnedWriteHalf,
        peer_id: Uuid,
        display_name: String,
    ) {
        let session_token = Uuid::new_v4().to_string();
        let (tx, mut rx) = mpsc::unbounded_channel::<PeerMessage>();
        let close = CancellationToken::new();

        {
            let mut sessions = self.sessions.lock();
            if sessions.contains_key(&peer_id) {
                return;
            }
            sessions.insert(
                peer_id,
                SessionHandle {
                    state: SessionState::Ready,
                    outbound: tx,
                    close: close.clone(),
                },
            );
        }

        info!("session: peer {peer_id} ({display_name}) ready");
        let _ = self
            .events
            .send(SessionEvent::Connected {
                peer_id,
                display_name,
                session_token: session_token.clone(),
            })
            .await;

        let mut heartbeat = tokio::time::interval(Duration::from_secs(HEARTBEAT_INTERVAL_SECS));
        let mut last_pong = tokio::time::Instant::now();

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = close.cancelled() => break,
                _ = heartbeat.tick() => {
                    if last_pong.elapsed() > Duration::from_secs(HEARTBEAT_TIMEOUT_SECS) {
                        warn!("session: peer {peer_id} heartbeat timeout");
                        break;
                    }
                    if write_peer_message(&mut writer, &PeerMessage::Ping).await.is_err() {
                        break;
                    }
                }
                outgoing = rx.recv() => {
                    match outgoing {
                        Some(msg) => {
                            if write_peer_message(&mut writer, &msg).await.is_err() {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                incoming = read_peer_message(&mut reader) => {
                    match incoming {
                        Ok(PeerMessage::Ping) => {
                            if write_peer_message(&mut writer, &PeerMessage::Pong).await.is_err() {
                                break;
                            }
                        }
                        Ok(PeerMessage::Pong) => {
                            last_pong = tokio::time::Instant::now();
                        }
                        Ok(msg) => {
                            let _ = self.events.send(SessionEvent::Message { peer_id, message: msg }).await;
                        }
                        Err(e) => {
                            debug!("session: peer {peer_id} read error: {e}");
                            break;
                        }
                    }
                }
            }
        }

        self.sessions.lock().remove(&peer_id);
        let _ = self.events.send(SessionEvent::Disconnected { peer_id, session_token }).await;
        info!("session: peer {peer_id} disconnected");
    }

    pub fn send_to(&self, peer_id: Uuid, msg: PeerMessage) -> EngineResult<()> {
        let sessions = self.sessions.lock();
        let handle = sessions
            .get(&peer_id)
            .ok_or_else(|| EngineError::UnknownPeer(peer_id.to_string()))?;
        if handle.state != SessionState::Ready {
            return Err(EngineError::TransportRefused(format!("session with {peer_id} not ready")));
        }
        handle
            .outbound
            .send(msg)
            .map_err(|_| EngineError::TransportReset(format!("session with {peer_id} closed")))
    }

    pub fn disconnect(&self, peer_id: Uuid) {
        if let Some(handle) = self.sessions.lock().get(&peer_id) {
            handle.close.cancel();
        }
    }

    pub fn ready_peers(&self) -> Vec<Uuid> {
        self.sessions
            .lock()
            .iter()
            .filter(|(_, h)| h.state == SessionState::Ready)
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn shutdown(&self) {
        self.cancel.cancel();
        for (_, handle) in self.sessions.lock().drain() {
            handle.close.cancel();
        }
    }
}

/// Spec.md §4.4 tie-break: the node with the lower `peer_id` always dials.
/// Equal ids never happen in practice (would mean talking to yourself) but
/// resolve to "don't dial" rather than looping.
pub fn should_dial(local_peer_id: Uuid, remote_peer_id: Uuid) -> bool {
    local_peer_id < remote_peer_id
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lower_peer_id_dials() {
        let low = Uuid::parse_str("00000000-0000-0000-0000-000000000001").unwrap();
        let high = Uuid::parse_str("ffffffff-ffff-ffff-ffff-ffffffffffff").unwrap();
        assert!(should_dial(low, high));
        assert!(!should_dial(high, low));
    }

    #[test]
    fn equal_ids_never_dial() {
        let id = Uuid::new_v4();
        assert!(!should_dial(id, id));
    }
}
