//! Beacon wire format and timing constants — generalized from the
//! teacher's `runtime/lan/protocol.rs` (`DISCOVERY_MAGIC`, `DiscoveryBeacon`)
//! and `runtime/lan/discovery.rs` (`DiscoveredPeer`, `PEER_EXPIRY_SECS`).

use std::net::IpAddr;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const DISCOVERY_MAGIC: &str = "meshdrop-beacon-v1";
pub const DEFAULT_DISCOVERY_PORT: u16 = 52741;
pub const DISCOVERY_INTERVAL_SECS: u64 = 3;
pub const PEER_EXPIRY_SECS: u64 = 15;

/// Datagram broadcast on the LAN every `DISCOVERY_INTERVAL_SECS`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoveryBeacon {
    pub magic: String,
    pub peer_id: Uuid,
    pub display_name: String,
    pub tcp_port: u16,
}

impl DiscoveryBeacon {
    pub fn new(peer_id: Uuid, display_name: String, tcp_port: u16) -> Self {
        DiscoveryBeacon {
            magic: DISCOVERY_MAGIC.to_string(),
            peer_id,
            display_name,
            tcp_port,
        }
    }
}

pub fn encode_beacon(beacon: &DiscoveryBeacon) -> Vec<u8> {
    serde_json::to_vec(beacon).unwrap_or_default()
}

pub fn decode_beacon(bytes: &[u8]) -> Option<DiscoveryBeacon> {
    let beacon: DiscoveryBeacon = serde_json::from_slice(bytes).ok()?;
    if beacon.magic != DISCOVERY_MAGIC {
        return None;
    }
    Some(beacon)
}

/// A peer currently visible on the network, as tracked by the discovery
/// backend's in-memory table. `last_seen_monotonic` drives expiry
/// (`PEER_EXPIRY_SECS`); `last_seen` is the wall-clock value surfaced to
/// API/UI consumers.
#[derive(Debug, Clone)]
pub struct DiscoveredPeer {
    pub peer_id: Uuid,
    pub display_name: String,
    pub host: IpAddr,
    pub tcp_port: u16,
    pub last_seen: DateTime<Utc>,
    pub last_seen_monotonic: Instant,
}
