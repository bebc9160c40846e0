//! Schema bootstrap and additive migrations — spec.md §4.2.
//!
//! Migrations are `CREATE TABLE IF NOT EXISTS` plus best-effort `ALTER
//! TABLE ... ADD COLUMN`, ignoring "duplicate column name" failures, so
//! that re-running against an older database file is always safe.

use rusqlite::{Connection, Result as SqlResult};

const CREATE_PEERS: &str = "
CREATE TABLE IF NOT EXISTS peers (
    peer_id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL,
    last_host TEXT,
    last_port INTEGER,
    last_seen TEXT NOT NULL,
    is_online INTEGER NOT NULL DEFAULT 0,
    transport_session_token TEXT,
    enabled_by_user INTEGER NOT NULL DEFAULT 1
)";

const CREATE_TRANSFERS: &str = "
CREATE TABLE IF NOT EXISTS transfers (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    storage_name TEXT NOT NULL UNIQUE,
    display_name TEXT NOT NULL,
    mime TEXT NOT NULL,
    byte_size INTEGER NOT NULL,
    inline_content TEXT,
    origin_peer_id TEXT,
    destination_peer_id TEXT,
    connection_ref TEXT,
    is_clipboard INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    origin_name_snapshot TEXT,
    destination_name_snapshot TEXT,
    tags TEXT NOT NULL DEFAULT '[]',
    extra_metadata TEXT NOT NULL DEFAULT '{}'
)";

const CREATE_TAGS: &str = "
CREATE TABLE IF NOT EXISTS tags (
    name TEXT PRIMARY KEY
)";

/// Columns added after the initial schema. Each entry is applied with
/// `ALTER TABLE <table> ADD COLUMN <def>`; failures other than "duplicate
/// column name" are logged and otherwise ignored, matching spec.md's
/// "ALTER-ADD-COLUMN-IF-MISSING" migration semantics.
const ADDITIVE_COLUMNS: &[(&str, &str)] = &[
    ("transfers", "connection_ref TEXT"),
    ("peers", "enabled_by_user INTEGER NOT NULL DEFAULT 1"),
];

pub fn ensure_schema(conn: &Connection) -> SqlResult<()> {
    conn.execute_batch(&format!(
        "{CREATE_PEERS}; {CREATE_TRANSFERS}; {CREATE_TAGS};"
    ))?;

    for (table, column_def) in ADDITIVE_COLUMNS {
        let sql = format!("ALTER TABLE {table} ADD COLUMN {column_def}");
        if let Err(e) = conn.execute(&sql, []) {
            let msg = e.to_string();
            if !msg.contains("duplicate column name") {
                log::warn!("schema migration: ALTER TABLE {table} failed: {msg}");
            }
        }
    }

    // Clean slate: every peer is offline until it completes a fresh
    // handshake (spec.md §4.2 / §8 property 5).
    conn.execute("UPDATE peers SET is_online = 0, transport_session_token = NULL", [])?;

    Ok(())
}
