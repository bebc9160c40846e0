//! Peer session wire protocol — spec.md §4.4/§4.5/§4.6.
//!
//! Generalized from the teacher's single `PeerMessage` enum
//! (`Hello`/`Welcome`/`Ping`/`Pong`/`Clipboard`) into the full message
//! family the spec's peer-to-peer surface needs: handshake, direct file
//! transfer, chunked transfer, and relay forwarding.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
pub const HEARTBEAT_INTERVAL_SECS: u64 = 5;
pub const HEARTBEAT_TIMEOUT_SECS: u64 = 15;
pub const INITIAL_RECONNECT_DELAY_SECS: u64 = 1;
pub const MAX_RECONNECT_DELAY_SECS: u64 = 30;
pub const DEFAULT_TCP_PORT: u16 = 52742;

/// Chunk size threshold above which a transfer is split into chunk
/// messages instead of sent as one `file-transfer` frame (spec.md §4.5).
pub const CHUNK_THRESHOLD_BYTES: u64 = 70 * 1024 * 1024;
pub const CHUNK_SIZE_BYTES: usize = 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum PeerMessage {
    #[serde(rename = "peer-handshake")]
    Handshake { peer_id: Uuid, display_name: String },

    #[serde(rename = "peer-handshake-ack")]
    HandshakeAck { peer_id: Uuid, display_name: String },

    #[serde(rename = "ping")]
    Ping,

    #[serde(rename = "pong")]
    Pong,

    #[serde(rename = "file-transfer")]
    FileTransfer {
        storage_name: String,
        display_name: String,
        mime: String,
        byte_size: u64,
        content_base64: String,
        is_clipboard: bool,
    },

    #[serde(rename = "chunk-start")]
    ChunkStart {
        transfer_token: Uuid,
        storage_name: String,
        display_name: String,
        mime: String,
        byte_size: u64,
        total_chunks: u32,
        sha256: String,
        is_clipboard: bool,
    },

    #[serde(rename = "chunk-data")]
    ChunkData {
        transfer_token: Uuid,
        index: u32,
        bytes_base64: String,
    },

    #[serde(rename = "chunk-end")]
    ChunkEnd { transfer_token: Uuid },

    #[serde(rename = "chunk-ack")]
    ChunkAck {
        transfer_token: Uuid,
        status: ChunkAckStatus,
        /// Set for a per-chunk ack (`chunk-data`); `None` for the
        /// `chunk-start`/`chunk-end` acks, which aren't about one index.
        chunk_index: Option<u32>,
        message: Option<String>,
    },

    /// Sent instead of a `chunk-ack` when the frame can't even be
    /// attributed to a transfer, e.g. `chunk-data` before `chunk-start`
    /// (spec.md §8).
    #[serde(rename = "chunk-error")]
    ChunkError { transfer_token: Uuid, error: String },

    /// Announces the hub's current local virtual devices to a connected
    /// peer (spec.md §4.6), re-sent whenever the local device set changes.
    #[serde(rename = "relay-devices")]
    RelayDevices { devices: Vec<RelayedDevice> },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayedDevice {
    pub device_id: Uuid,
    pub display_name: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChunkAckStatus {
    Ok,
    Error,
}
