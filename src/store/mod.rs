//! Durable Store — spec.md §4.2.
//!
//! A single writer connection lives behind a `tokio::sync::Mutex` so
//! mutations are serialized process-wide (spec.md §9 "single-writer
//! store"). Reads open a short-lived connection of their own and never
//! contend with the writer, per the same section.
//!
//! `rusqlite` is synchronous; every method here does its SQL work inside
//! `tokio::task::spawn_blocking` so the async runtime's worker threads are
//! never blocked on disk I/O, mirroring how the teacher moves clipboard
//! I/O onto `task::spawn_blocking` in `clipboard.rs`.

pub mod models;
mod schema;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension, Row};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use models::{normalize_tags, PeerRecord, TransferFilter, TransferRecord};

#[derive(Clone)]
pub struct Store {
    db_path: PathBuf,
    writer: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(db_path: &Path) -> EngineResult<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        schema::ensure_schema(&conn)?;
        Ok(Store {
            db_path: db_path.to_path_buf(),
            writer: Arc::new(Mutex::new(conn)),
        })
    }

    fn open_reader(&self) -> EngineResult<Connection> {
        Ok(Connection::open(&self.db_path)?)
    }

    // ───────────────────────── Peers ─────────────────────────

    pub async fn upsert_peer_by_id(
        &self,
        peer_id: Uuid,
        display_name: String,
        last_host: Option<String>,
        last_port: Option<u16>,
    ) -> EngineResult<PeerRecord> {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || {
            let conn = writer.blocking_lock();
            let now = Utc::now().to_rfc3339();
            conn.execute(
                "INSERT INTO peers (peer_id, display_name, last_host, last_port, last_seen, is_online, enabled_by_user)
                 VALUES (?1, ?2, ?3, ?4, ?5, 0, 1)
                 ON CONFLICT(peer_id) DO UPDATE SET
                    display_name = excluded.display_name,
                    last_host = COALESCE(excluded.last_host, peers.last_host),
                    last_port = COALESCE(excluded.last_port, peers.last_port),
                    last_seen = excluded.last_seen",
                params![peer_id.to_string(), display_name, last_host, last_port, now],
            )?;
            peer_by_id(&conn, peer_id)?.ok_or_else(|| EngineError::UnknownPeer(peer_id.to_string()))
        })
        .await
        .map_err(|e| EngineError::StorageIoError(e.to_string()))?
    }

    pub async fn mark_peer_online(&self, peer_id: Uuid, session_token: String) -> EngineResult<PeerRecord> {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || {
            let conn = writer.blocking_lock();
            let changed = conn.execute(
                "UPDATE peers SET is_online = 1, transport_session_token = ?2, last_seen = ?3 WHERE peer_id = ?1",
                params![peer_id.to_string(), session_token, Utc::now().to_rfc3339()],
            )?;
            if changed == 0 {
                return Err(EngineError::UnknownPeer(peer_id.to_string()));
            }
            peer_by_id(&conn, peer_id)?.ok_or_else(|| EngineError::UnknownPeer(peer_id.to_string()))
        })
        .await
        .map_err(|e| EngineError::StorageIoError(e.to_string()))?
    }

    pub async fn mark_peer_offline(&self, session_token: &str) -> EngineResult<()> {
        let writer = self.writer.clone();
        let token = session_token.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = writer.blocking_lock();
            conn.execute(
                "UPDATE peers SET is_online = 0, transport_session_token = NULL WHERE transport_session_token = ?1",
                params![token],
            )?;
            Ok(())
        })
        .await
        .map_err(|e| EngineError::StorageIoError(e.to_string()))?
    }

    pub async fn rename_peer(&self, peer_id: Uuid, name: String) -> EngineResult<PeerRecord> {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || {
            let conn = writer.blocking_lock();
            let changed = conn.execute(
                "UPDATE peers SET display_name = ?2 WHERE peer_id = ?1",
                params![peer_id.to_string(), name],
            )?;
            if changed == 0 {
                return Err(EngineError::UnknownPeer(peer_id.to_string()));
            }
            peer_by_id(&conn, peer_id)?.ok_or_else(|| EngineError::UnknownPeer(peer_id.to_string()))
        })
        .await
        .map_err(|e| EngineError::StorageIoError(e.to_string()))?
    }

    pub async fn set_peer_enabled(&self, peer_id: Uuid, enabled: bool) -> EngineResult<PeerRecord> {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || {
            let conn = writer.blocking_lock();
            let changed = conn.execute(
                "UPDATE peers SET enabled_by_user = ?2 WHERE peer_id = ?1",
                params![peer_id.to_string(), enabled],
            )?;
            if changed == 0 {
                return Err(EngineError::UnknownPeer(peer_id.to_string()));
            }
            peer_by_id(&conn, peer_id)?.ok_or_else(|| EngineError::UnknownPeer(peer_id.to_string()))
        })
        .await
        .map_err(|e| EngineError::StorageIoError(e.to_string()))?
    }

    pub async fn get_peer(&self, peer_id: Uuid) -> EngineResult<Option<PeerRecord>> {
        let conn = self.open_reader()?;
        peer_by_id(&conn, peer_id)
    }

    pub async fn list_peers(&self) -> EngineResult<Vec<PeerRecord>> {
        let conn = self.open_reader()?;
        let mut stmt = conn.prepare("SELECT * FROM peers ORDER BY last_seen DESC")?;
        let rows = stmt.query_map([], row_to_peer)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    // ───────────────────────── Transfers ─────────────────────────

    #[allow(clippy::too_many_arguments)]
    pub async fn create_transfer(&self, rec: NewTransfer) -> EngineResult<TransferRecord> {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || {
            let conn = writer.blocking_lock();
            let tags = normalize_tags(&rec.tags);
            let tags_json = serde_json::to_string(&tags).unwrap_or_else(|_| "[]".to_string());
            let meta_json = serde_json::to_string(&rec.extra_metadata).unwrap_or_else(|_| "{}".to_string());
            let now = Utc::now().to_rfc3339();

            conn.execute(
                "INSERT INTO transfers (
                    storage_name, display_name, mime, byte_size, inline_content,
                    origin_peer_id, destination_peer_id, connection_ref, is_clipboard,
                    created_at, origin_name_snapshot, destination_name_snapshot, tags, extra_metadata
                 ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14)",
                params![
                    rec.storage_name,
                    rec.display_name,
                    rec.mime,
                    rec.byte_size as i64,
                    rec.inline_content,
                    rec.origin_peer_id.map(|u| u.to_string()),
                    rec.destination_peer_id.map(|u| u.to_string()),
                    rec.connection_ref,
                    rec.is_clipboard,
                    now,
                    rec.origin_name_snapshot,
                    rec.destination_name_snapshot,
                    tags_json,
                    meta_json,
                ],
            )?;
            let id = conn.last_insert_rowid();
            transfer_by_id(&conn, id)?.ok_or(EngineError::UnknownTransfer(id))
        })
        .await
        .map_err(|e| EngineError::StorageIoError(e.to_string()))?
    }

    pub async fn get_transfer(&self, id: i64) -> EngineResult<Option<TransferRecord>> {
        let conn = self.open_reader()?;
        transfer_by_id(&conn, id)
    }

    pub async fn by_storage_name(&self, storage_name: &str) -> EngineResult<Option<TransferRecord>> {
        let conn = self.open_reader()?;
        let mut stmt = conn.prepare("SELECT * FROM transfers WHERE storage_name = ?1")?;
        stmt.query_row(params![storage_name], row_to_transfer).optional().map_err(Into::into)
    }

    pub async fn list_transfers(&self, filter: TransferFilter) -> EngineResult<Vec<TransferRecord>> {
        let conn = self.open_reader()?;
        let mut stmt = conn.prepare("SELECT * FROM transfers ORDER BY created_at DESC")?;
        let rows = stmt.query_map([], row_to_transfer)?;
        let mut out = Vec::new();
        for r in rows {
            let rec = r?;
            if let Some(tag) = &filter.tag {
                let needle = models::normalize_tag(tag);
                if !rec.tags.contains(&needle) {
                    continue;
                }
            }
            if let Some(device) = &filter.device_id {
                let matches = rec.origin_peer_id.as_ref() == Some(device) || rec.destination_peer_id.as_ref() == Some(device);
                if !matches {
                    continue;
                }
            }
            out.push(rec);
        }
        Ok(out)
    }

    pub async fn rename_transfer(&self, id: i64, new_display_name: String) -> EngineResult<TransferRecord> {
        if new_display_name.trim().is_empty() {
            return Err(EngineError::InvalidArgument("display name must not be empty".into()));
        }
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || {
            let conn = writer.blocking_lock();
            let changed = conn.execute(
                "UPDATE transfers SET display_name = ?2 WHERE id = ?1",
                params![id, new_display_name],
            )?;
            if changed == 0 {
                return Err(EngineError::UnknownTransfer(id));
            }
            transfer_by_id(&conn, id)?.ok_or(EngineError::UnknownTransfer(id))
        })
        .await
        .map_err(|e| EngineError::StorageIoError(e.to_string()))?
    }

    pub async fn set_transfer_tags(&self, id: i64, tags: Vec<String>) -> EngineResult<TransferRecord> {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || {
            let conn = writer.blocking_lock();
            let normalized = normalize_tags(&tags);
            let json = serde_json::to_string(&normalized).unwrap_or_else(|_| "[]".to_string());
            let changed = conn.execute("UPDATE transfers SET tags = ?2 WHERE id = ?1", params![id, json])?;
            if changed == 0 {
                return Err(EngineError::UnknownTransfer(id));
            }
            for tag in &normalized {
                conn.execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", params![tag])?;
            }
            transfer_by_id(&conn, id)?.ok_or(EngineError::UnknownTransfer(id))
        })
        .await
        .map_err(|e| EngineError::StorageIoError(e.to_string()))?
    }

    pub async fn set_transfer_metadata(&self, id: i64, metadata: serde_json::Value) -> EngineResult<TransferRecord> {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || {
            let conn = writer.blocking_lock();
            let json = serde_json::to_string(&metadata).unwrap_or_else(|_| "{}".to_string());
            let changed = conn.execute("UPDATE transfers SET extra_metadata = ?2 WHERE id = ?1", params![id, json])?;
            if changed == 0 {
                return Err(EngineError::UnknownTransfer(id));
            }
            transfer_by_id(&conn, id)?.ok_or(EngineError::UnknownTransfer(id))
        })
        .await
        .map_err(|e| EngineError::StorageIoError(e.to_string()))?
    }

    pub async fn delete_transfer(&self, id: i64) -> EngineResult<TransferRecord> {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || {
            let conn = writer.blocking_lock();
            let rec = transfer_by_id(&conn, id)?.ok_or(EngineError::UnknownTransfer(id))?;
            conn.execute("DELETE FROM transfers WHERE id = ?1", params![id])?;
            Ok(rec)
        })
        .await
        .map_err(|e| EngineError::StorageIoError(e.to_string()))?
    }

    // ───────────────────────── Tags ─────────────────────────

    pub async fn list_tags(&self) -> EngineResult<Vec<String>> {
        let conn = self.open_reader()?;
        let mut names: std::collections::BTreeSet<String> = std::collections::BTreeSet::new();

        let mut stmt = conn.prepare("SELECT name FROM tags")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        for r in rows {
            names.insert(r?);
        }

        let mut stmt = conn.prepare("SELECT tags FROM transfers")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        for r in rows {
            let tags: Vec<String> = serde_json::from_str(&r?).unwrap_or_default();
            names.extend(tags);
        }

        Ok(names.into_iter().collect())
    }

    pub async fn add_tag(&self, name: String) -> EngineResult<()> {
        let writer = self.writer.clone();
        tokio::task::spawn_blocking(move || {
            let conn = writer.blocking_lock();
            let normalized = models::normalize_tag(&name);
            if normalized.is_empty() {
                return Err(EngineError::InvalidArgument("tag name must not be empty".into()));
            }
            conn.execute("INSERT OR IGNORE INTO tags (name) VALUES (?1)", params![normalized])?;
            Ok(())
        })
        .await
        .map_err(|e| EngineError::StorageIoError(e.to_string()))?
    }

    /// Deletes a tag from the vocabulary and strips it from every transfer.
    /// Returns the number of transfer records that were updated.
    pub async fn delete_tag(&self, name: &str) -> EngineResult<usize> {
        let writer = self.writer.clone();
        let normalized = models::normalize_tag(name);
        tokio::task::spawn_blocking(move || {
            let conn = writer.blocking_lock();
            conn.execute("DELETE FROM tags WHERE name = ?1", params![normalized])?;

            let mut stmt = conn.prepare("SELECT id, tags FROM transfers")?;
            let rows: Vec<(i64, String)> = stmt
                .query_map([], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            drop(stmt);

            let mut updated = 0usize;
            for (id, tags_json) in rows {
                let mut tags: Vec<String> = serde_json::from_str(&tags_json).unwrap_or_default();
                let before = tags.len();
                tags.retain(|t| t != &normalized);
                if tags.len() != before {
                    let json = serde_json::to_string(&tags).unwrap_or_else(|_| "[]".to_string());
                    conn.execute("UPDATE transfers SET tags = ?2 WHERE id = ?1", params![id, json])?;
                    updated += 1;
                }
            }
            Ok(updated)
        })
        .await
        .map_err(|e| EngineError::StorageIoError(e.to_string()))?
    }
}

/// Fields needed to persist a new transfer record (spec.md §3, minus
/// derived columns `id`/`created_at`).
#[derive(Debug, Clone, Default)]
pub struct NewTransfer {
    pub storage_name: String,
    pub display_name: String,
    pub mime: String,
    pub byte_size: u64,
    pub inline_content: Option<String>,
    pub origin_peer_id: Option<Uuid>,
    pub destination_peer_id: Option<Uuid>,
    pub connection_ref: Option<String>,
    pub is_clipboard: bool,
    pub origin_name_snapshot: Option<String>,
    pub destination_name_snapshot: Option<String>,
    pub tags: Vec<String>,
    pub extra_metadata: serde_json::Value,
}

fn row_to_peer(row: &Row) -> rusqlite::Result<PeerRecord> {
    let peer_id: String = row.get("peer_id")?;
    let last_seen: String = row.get("last_seen")?;
    let last_port: Option<i64> = row.get("last_port")?;
    Ok(PeerRecord {
        peer_id: Uuid::parse_str(&peer_id).unwrap_or_default(),
        display_name: row.get("display_name")?,
        last_host: row.get("last_host")?,
        last_port: last_port.map(|p| p as u16),
        last_seen: last_seen.parse().unwrap_or_else(|_| Utc::now()),
        is_online: row.get::<_, i64>("is_online")? != 0,
        transport_session_token: row.get("transport_session_token")?,
        enabled_by_user: row.get::<_, i64>("enabled_by_user")? != 0,
    })
}

fn peer_by_id(conn: &Connection, peer_id: Uuid) -> EngineResult<Option<PeerRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM peers WHERE peer_id = ?1")?;
    stmt.query_row(params![peer_id.to_string()], row_to_peer).optional().map_err(Into::into)
}

fn row_to_transfer(row: &Row) -> rusqlite::Result<TransferRecord> {
    let created_at: String = row.get("created_at")?;
    let origin_peer_id: Option<String> = row.get("origin_peer_id")?;
    let destination_peer_id: Option<String> = row.get("destination_peer_id")?;
    let tags_json: String = row.get("tags")?;
    let meta_json: String = row.get("extra_metadata")?;
    Ok(TransferRecord {
        id: row.get("id")?,
        storage_name: row.get("storage_name")?,
        display_name: row.get("display_name")?,
        mime: row.get("mime")?,
        byte_size: row.get::<_, i64>("byte_size")? as u64,
        inline_content: row.get("inline_content")?,
        origin_peer_id: origin_peer_id.and_then(|s| Uuid::parse_str(&s).ok()),
        destination_peer_id: destination_peer_id.and_then(|s| Uuid::parse_str(&s).ok()),
        connection_ref: row.get("connection_ref")?,
        is_clipboard: row.get::<_, i64>("is_clipboard")? != 0,
        created_at: created_at.parse().unwrap_or_else(|_| Utc::now()),
        origin_name_snapshot: row.get("origin_name_snapshot")?,
        destination_name_snapshot: row.get("destination_name_snapshot")?,
        tags: serde_json::from_str(&tags_json).unwrap_or_default(),
        extra_metadata: serde_json::from_str(&meta_json).unwrap_or_else(|_| serde_json::json!({})),
    })
}

fn transfer_by_id(conn: &Connection, id: i64) -> EngineResult<Option<TransferRecord>> {
    let mut stmt = conn.prepare("SELECT * FROM transfers WHERE id = ?1")?;
    stmt.query_row(params![id], row_to_transfer).optional().map_err(Into::into)
}
