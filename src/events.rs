//! Engine-wide events surfaced for logging/diagnostics — analogous to the
//! teacher's `RuntimeEvent`, minus the GUI-only variants (status text for
//! a window, clipboard toast strings) that have no counterpart here.

use uuid::Uuid;

#[derive(Debug, Clone)]
pub enum EngineEvent {
    PeerAppeared { peer_id: Uuid, display_name: String },
    PeerDisappeared { peer_id: Uuid },
    PeerConnected { peer_id: Uuid, display_name: String },
    PeerDisconnected { peer_id: Uuid },
    TransferReceived { transfer_id: i64, display_name: String, origin_peer_id: Option<Uuid> },
    Error { message: String },
}
