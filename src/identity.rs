//! Identity & Config Store — §4.1.
//!
//! Small key=value text file under the per-user data directory. Values are
//! last-write-wins except `node-id`, which is written once and never
//! touched again. Mirrors the teacher's `dirs`-based data-dir resolution
//! and flat-file settings style, generalized from a single TOML struct
//! (one settings blob) to the independently-writable scalar keys spec.md
//! §4.1 calls for.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::Result;
use log::warn;
use uuid::Uuid;

const CONFIG_FILE: &str = "config.txt";

const KEY_NODE_ID: &str = "node-id";
const KEY_DISPLAY_NAME: &str = "display-name";
const KEY_PORT: &str = "port";
const KEY_API_PORT: &str = "api-port";
const KEY_MODE: &str = "mode";
const KEY_REMOTE_HUB_URL: &str = "remote-hub-url";

pub const DEFAULT_PORT: u16 = 53000;
pub const DEFAULT_API_PORT: u16 = 53080;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    AutoHub,
    PureClient,
}

impl Mode {
    fn as_str(self) -> &'static str {
        match self {
            Mode::AutoHub => "auto-hub",
            Mode::PureClient => "pure-client",
        }
    }

    fn parse(s: &str) -> Mode {
        match s {
            "pure-client" => Mode::PureClient,
            _ => Mode::AutoHub,
        }
    }
}

/// In-memory snapshot of identity/config values, backed by a flat file.
///
/// If the backing directory is unwritable the store still functions with
/// in-memory defaults (spec.md §4.1 failure semantics) — callers should log
/// the warning this returns once at startup.
pub struct IdentityStore {
    path: Option<PathBuf>,
    values: BTreeMap<String, String>,
    writable: bool,
}

impl IdentityStore {
    /// Load (or create) the identity store rooted at `data_dir`.
    pub fn open(data_dir: &Path) -> Self {
        let path = data_dir.join(CONFIG_FILE);
        let mut values = BTreeMap::new();
        let mut writable = true;

        if let Err(e) = fs::create_dir_all(data_dir) {
            warn!("identity store: data dir unwritable ({e}); running with in-memory defaults");
            writable = false;
        }

        if writable {
            if let Ok(contents) = fs::read_to_string(&path) {
                for line in contents.lines() {
                    if let Some((k, v)) = line.split_once('=') {
                        values.insert(k.trim().to_string(), v.trim().to_string());
                    }
                }
            }
        }

        let mut store = IdentityStore {
            path: if writable { Some(path) } else { None },
            values,
            writable,
        };

        if !store.values.contains_key(KEY_NODE_ID) {
            let id = Uuid::new_v4().to_string();
            store.values.insert(KEY_NODE_ID.to_string(), id);
            store.persist();
        }

        store
    }

    fn persist(&self) {
        let Some(path) = &self.path else { return };
        let mut out = String::new();
        for (k, v) in &self.values {
            out.push_str(k);
            out.push('=');
            out.push_str(v);
            out.push('\n');
        }
        if let Err(e) = fs::write(path, out) {
            warn!("identity store: failed to persist config: {e}");
        }
    }

    pub fn is_writable(&self) -> bool {
        self.writable
    }

    pub fn node_id(&self) -> Uuid {
        self.values
            .get(KEY_NODE_ID)
            .and_then(|s| Uuid::parse_str(s).ok())
            .unwrap_or_else(Uuid::new_v4)
    }

    pub fn display_name(&self) -> String {
        self.values
            .get(KEY_DISPLAY_NAME)
            .cloned()
            .unwrap_or_else(default_display_name)
    }

    pub fn set_display_name(&mut self, name: &str) {
        self.values.insert(KEY_DISPLAY_NAME.to_string(), name.to_string());
        self.persist();
    }

    pub fn port(&self) -> u16 {
        self.values
            .get(KEY_PORT)
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PORT)
    }

    pub fn set_port(&mut self, port: u16) {
        self.values.insert(KEY_PORT.to_string(), port.to_string());
        self.persist();
    }

    pub fn api_port(&self) -> u16 {
        self.values
            .get(KEY_API_PORT)
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_API_PORT)
    }

    pub fn set_api_port(&mut self, port: u16) {
        self.values.insert(KEY_API_PORT.to_string(), port.to_string());
        self.persist();
    }

    pub fn mode(&self) -> Mode {
        self.values.get(KEY_MODE).map(|s| Mode::parse(s)).unwrap_or(Mode::AutoHub)
    }

    pub fn set_mode(&mut self, mode: Mode) {
        self.values.insert(KEY_MODE.to_string(), mode.as_str().to_string());
        self.persist();
    }

    pub fn remote_hub_url(&self) -> Option<String> {
        self.values.get(KEY_REMOTE_HUB_URL).cloned()
    }

    pub fn set_remote_hub_url(&mut self, url: &str) {
        self.values.insert(KEY_REMOTE_HUB_URL.to_string(), url.to_string());
        self.persist();
    }
}

fn default_display_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("meshdrop-{}", &Uuid::new_v4().to_string()[..8]))
}

pub fn resolve_data_dir(override_dir: Option<PathBuf>) -> Result<PathBuf> {
    if let Some(dir) = override_dir {
        return Ok(dir);
    }
    let base = dirs::data_dir().unwrap_or_else(std::env::temp_dir);
    Ok(base.join("meshdrop"))
}
