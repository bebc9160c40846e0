//! Row types for the durable store — mirrors spec.md §3.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeerRecord {
    pub peer_id: Uuid,
    pub display_name: String,
    pub last_host: Option<String>,
    pub last_port: Option<u16>,
    pub last_seen: DateTime<Utc>,
    pub is_online: bool,
    pub transport_session_token: Option<String>,
    pub enabled_by_user: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: i64,
    pub storage_name: String,
    pub display_name: String,
    pub mime: String,
    pub byte_size: u64,
    pub inline_content: Option<String>,
    pub origin_peer_id: Option<Uuid>,
    pub destination_peer_id: Option<Uuid>,
    pub connection_ref: Option<String>,
    pub is_clipboard: bool,
    pub created_at: DateTime<Utc>,
    pub origin_name_snapshot: Option<String>,
    pub destination_name_snapshot: Option<String>,
    pub tags: Vec<String>,
    pub extra_metadata: serde_json::Value,
}

/// Filter used by `list_transfers`.
#[derive(Debug, Clone, Default)]
pub struct TransferFilter {
    pub tag: Option<String>,
    pub device_id: Option<Uuid>,
}

pub fn normalize_tag(tag: &str) -> String {
    tag.trim().to_lowercase()
}

pub fn normalize_tags(tags: &[String]) -> Vec<String> {
    let mut out = Vec::new();
    for t in tags {
        let n = normalize_tag(t);
        if !n.is_empty() && !out.contains(&n) {
            out.push(n);
        }
    }
    out
}
