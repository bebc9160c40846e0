//! LAN discovery — spec.md §4.3.
//!
//! `DiscoveryTransport` is the seam spec.md §9 asks for: one implementation
//! ships (`UdpBeaconDiscovery`, a periodic UDP broadcast beacon generalized
//! from the teacher's `runtime/lan/discovery.rs`), but callers only depend
//! on the trait so a second backend (mDNS/avahi, say) can be dropped in
//! later without touching the session or engine layers.

mod beacon;
pub mod protocol;

pub use beacon::UdpBeaconDiscovery;
pub use protocol::DiscoveredPeer;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

/// Events a discovery backend emits as peers come and go on the network.
#[derive(Debug, Clone)]
pub enum DiscoveryEvent {
    PeerAppeared(DiscoveredPeer),
    PeerDisappeared(Uuid),
}

#[async_trait]
pub trait DiscoveryTransport: Send + Sync {
    /// Begin broadcasting this node's presence and listening for peers.
    /// `events` receives appear/disappear notifications until `stop` is called.
    async fn start(&self, events: mpsc::Sender<DiscoveryEvent>) -> crate::error::EngineResult<()>;

    /// Stop broadcasting and listening. Idempotent.
    async fn stop(&self);

    /// Update the display name advertised in future beacons.
    async fn update_name(&self, name: String);

    /// Stop and start again, forgetting every previously-seen peer
    /// (spec.md §4.3/§6) — e.g. after the host's network interfaces change.
    async fn restart(&self, events: mpsc::Sender<DiscoveryEvent>) -> crate::error::EngineResult<()>;
}
