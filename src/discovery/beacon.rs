//! UDP broadcast discovery backend — generalized from the teacher's
//! `runtime/lan/discovery.rs` (`run_beacon_broadcaster`, `run_beacon_listener`,
//! `bind_reusable_udp`, `upsert_peer`, `prune_stale_peers`).

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use log::{debug, warn};
use parking_lot::Mutex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::protocol::{decode_beacon, encode_beacon, DiscoveredPeer, DiscoveryBeacon, DISCOVERY_INTERVAL_SECS, PEER_EXPIRY_SECS};
use super::{DiscoveryEvent, DiscoveryTransport};
use crate::error::{EngineError, EngineResult};

pub struct UdpBeaconDiscovery {
    peer_id: Uuid,
    display_name: Arc<Mutex<String>>,
    tcp_port: u16,
    discovery_port: u16,
    cancel: Mutex<Option<CancellationToken>>,
    known: Arc<Mutex<HashMap<Uuid, DiscoveredPeer>>>,
}

impl UdpBeaconDiscovery {
    pub fn new(peer_id: Uuid, display_name: String, tcp_port: u16, discovery_port: u16) -> Self {
        UdpBeaconDiscovery {
            peer_id,
            display_name: Arc::new(Mutex::new(display_name)),
            tcp_port,
            discovery_port,
            cancel: Mutex::new(None),
            known: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    fn bind_reusable_udp(&self) -> EngineResult<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|e| EngineError::DiscoveryUnavailable(e.to_string()))?;
        socket.set_reuse_address(true).ok();
        #[cfg(unix)]
        socket.set_reuse_port(true).ok();
        socket.set_broadcast(true).ok();
        let addr: SocketAddr = (Ipv4Addr::UNSPECIFIED, self.discovery_port).into();
        socket
            .bind(&addr.into())
            .map_err(|e| EngineError::DiscoveryUnavailable(e.to_string()))?;
        socket.set_nonblocking(true).ok();
        UdpSocket::from_std(socket.into()).map_err(|e| EngineError::DiscoveryUnavailable(e.to_string()))
    }
}

#[async_trait]
impl DiscoveryTransport for UdpBeaconDiscovery {
    async fn start(&self, events: mpsc::Sender<DiscoveryEvent>) -> EngineResult<()> {
        let token = CancellationToken::new();
        *self.cancel.lock() = Some(token.clone());

        let socket = Arc::new(self.bind_reusable_udp()?);

        tokio::spawn(run_broadcaster(
            socket.clone(),
            self.peer_id,
            self.display_name.clone(),
            self.tcp_port,
            self.discovery_port,
            token.clone(),
        ));

        tokio::spawn(run_listener(
            socket,
            self.peer_id,
            self.known.clone(),
            events.clone(),
            token.clone(),
        ));

        tokio::spawn(run_reaper(self.known.clone(), events, token));

        Ok(())
    }

    async fn stop(&self) {
        if let Some(token) = self.cancel.lock().take() {
            token.cancel();
        }
    }

    async fn update_name(&self, name: String) {
        *self.display_name.lock() = name;
    }

    /// Stops the current broadcaster/listener/reaper trio and starts a
    /// fresh one, forgetting every peer seen so far.
    async fn restart(&self, events: mpsc::Sender<DiscoveryEvent>) -> EngineResult<()> {
        self.stop().await;
        self.known.lock().clear();
        self.start(events).await
    }
}

async fn run_broadcaster(
    socket: Arc<UdpSocket>,
    peer_id: Uuid,
    display_name: Arc<Mutex<String>>,
    tcp_port: u16,
    discovery_port: u16,
    cancel: CancellationToken,
) {
    let target: SocketAddr = (Ipv4Addr::BROADCAST, discovery_port).into();
    let mut interval = tokio::time::interval(Duration::from_secs(DISCOVERY_INTERVAL_SECS));

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let name = display_name.lock().clone();
                let beacon = DiscoveryBeacon::new(peer_id, name, tcp_port);
                let bytes = encode_beacon(&beacon);
                if let Err(e) = socket.send_to(&bytes, target).await {
                    debug!("discovery: beacon send failed: {e}");
                }
            }
        }
    }
}

async fn run_listener(
    socket: Arc<UdpSocket>,
    self_id: Uuid,
    known: Arc<Mutex<HashMap<Uuid, DiscoveredPeer>>>,
    events: mpsc::Sender<DiscoveryEvent>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; 4096];
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            res = socket.recv_from(&mut buf) => {
                let (len, from) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        warn!("discovery: recv failed: {e}");
                        continue;
                    }
                };
                let Some(beacon) = decode_beacon(&buf[..len]) else { continue };
                if beacon.peer_id == self_id {
                    continue;
                }
                upsert_peer(&known, &events, beacon, from.ip()).await;
            }
        }
    }
}

async fn upsert_peer(
    known: &Arc<Mutex<HashMap<Uuid, DiscoveredPeer>>>,
    events: &mpsc::Sender<DiscoveryEvent>,
    beacon: DiscoveryBeacon,
    host: IpAddr,
) {
    let is_new = {
        let mut table = known.lock();
        let is_new = !table.contains_key(&beacon.peer_id);
        table.insert(
            beacon.peer_id,
            DiscoveredPeer {
                peer_id: beacon.peer_id,
                display_name: beacon.display_name.clone(),
                host,
                tcp_port: beacon.tcp_port,
                last_seen: Utc::now(),
                last_seen_monotonic: Instant::now(),
            },
        );
        is_new
    };

    if is_new {
        let peer = known.lock().get(&beacon.peer_id).cloned();
        if let Some(peer) = peer {
            let _ = events.send(DiscoveryEvent::PeerAppeared(peer)).await;
        }
    }
}

async fn run_reaper(
    known: Arc<Mutex<HashMap<Uuid, DiscoveredPeer>>>,
    events: mpsc::Sender<DiscoveryEvent>,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let expired: Vec<Uuid> = {
                    let mut table = known.lock();
                    let now = Instant::now();
                    let expired: Vec<Uuid> = table
                        .iter()
                        .filter(|(_, p)| now.duration_since(p.last_seen_monotonic) > Duration::from_secs(PEER_EXPIRY_SECS))
                        .map(|(id, _)| *id)
                        .collect();
                    for id in &expired {
                        table.remove(id);
                    }
                    expired
                };
                for id in expired {
                    let _ = events.send(DiscoveryEvent::PeerDisappeared(id)).await;
                }
            }
        }
    }
}
