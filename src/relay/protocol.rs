//! Messages exchanged between the Hub and local UI WebSocket clients —
//! spec.md §4.6/§4.7. Distinct from `session::protocol::PeerMessage`,
//! which only ever travels peer-to-peer over TCP.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// `client_uuid` is minted and persisted by the UI itself (e.g. in
    /// local storage) so a reconnecting client keeps the same device
    /// identity across socket drops, instead of minting a fresh one on
    /// every `device-setup`.
    DeviceSetup { client_uuid: Uuid, device_name: String },
    FileTransfer {
        target_device_id: Option<Uuid>,
        display_name: String,
        mime: String,
        content_base64: String,
        is_clipboard: bool,
    },
    ChunkStart {
        transfer_token: Uuid,
        target_device_id: Option<Uuid>,
        storage_name: String,
        display_name: String,
        mime: String,
        byte_size: u64,
        total_chunks: u32,
        sha256: String,
        is_clipboard: bool,
    },
    ChunkData {
        transfer_token: Uuid,
        index: u32,
        bytes_base64: String,
    },
    ChunkEnd { transfer_token: Uuid },
    TerminateConnection { device_id: Uuid },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "kebab-case")]
pub enum ServerMessage {
    SetupComplete { device: VirtualDevice, devices: Vec<VirtualDevice> },
    DeviceList { devices: Vec<VirtualDevice> },
    /// `socket_id` is `"local:<client_uuid>"` for another UI client or
    /// `"peer:<peer_id>"` for a remote node, so the UI can tell the two
    /// kinds of device apart without a separate lookup.
    DeviceConnected { socket_id: String, display_name: String, is_remote_peer: bool },
    DeviceDisconnected { socket_id: String },
    FileReceived { transfer_id: i64, display_name: String, origin_device_id: Option<Uuid> },
    ChunkAck {
        transfer_token: Uuid,
        status: crate::session::protocol::ChunkAckStatus,
        message: Option<String>,
    },
    Error { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct VirtualDevice {
    pub device_id: Uuid,
    pub display_name: String,
    pub is_remote_peer: bool,
    pub is_online: bool,
}
