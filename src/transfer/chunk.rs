//! Chunked transfer bookkeeping — spec.md §4.5.
//!
//! One `ChunkedTransferState` per in-flight chunked transfer, keyed by the
//! sender-issued `transfer_token`. Chunks must arrive in order; a
//! `chunk-end` before every chunk has arrived is treated as an error per
//! the Open Question resolved in SPEC_FULL.md §4.5 (cleanup + an error
//! chunk-ack, not a partial commit).

use std::collections::HashMap;
use std::time::Instant;

use base64::Engine;
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const STALE_SWEEP_INTERVAL_SECS: u64 = 60;
pub const STALE_TIMEOUT_SECS: u64 = 300;

pub struct ChunkedTransferState {
    pub storage_name: String,
    pub display_name: String,
    pub mime: String,
    pub byte_size: u64,
    pub total_chunks: u32,
    pub sha256_expected: String,
    pub is_clipboard: bool,
    pub origin_peer_id: Option<Uuid>,
    chunks: HashMap<u32, Vec<u8>>,
    last_activity: Instant,
}

impl ChunkedTransferState {
    pub fn new(
        storage_name: String,
        display_name: String,
        mime: String,
        byte_size: u64,
        total_chunks: u32,
        sha256_expected: String,
        is_clipboard: bool,
        origin_peer_id: Option<Uuid>,
    ) -> Self {
        ChunkedTransferState {
            storage_name,
            display_name,
            mime,
            byte_size,
            total_chunks,
            sha256_expected,
            is_clipboard,
            origin_peer_id,
            chunks: HashMap::new(),
            last_activity: Instant::now(),
        }
    }

    pub fn is_stale(&self) -> bool {
        self.last_activity.elapsed().as_secs() > STALE_TIMEOUT_SECS
    }

    pub fn accept_chunk(&mut self, index: u32, bytes: Vec<u8>) {
        self.chunks.insert(index, bytes);
        self.last_activity = Instant::now();
    }

    pub fn received_count(&self) -> u32 {
        self.chunks.len() as u32
    }

    pub fn is_complete(&self) -> bool {
        self.received_count() == self.total_chunks
    }

    /// Concatenates chunks 0..total_chunks in order and verifies the
    /// SHA-256 digest against `sha256_expected`. Returns `None` (and
    /// leaves the caller to treat it as an error) on any mismatch.
    pub fn assemble(&self) -> Option<Vec<u8>> {
        let mut out = Vec::with_capacity(self.byte_size as usize);
        for i in 0..self.total_chunks {
            out.extend_from_slice(self.chunks.get(&i)?);
        }
        let mut hasher = Sha256::new();
        hasher.update(&out);
        let digest = format!("{:x}", hasher.finalize());
        if digest != self.sha256_expected {
            return None;
        }
        Some(out)
    }
}

pub fn decode_chunk_bytes(bytes_base64: &str) -> Option<Vec<u8>> {
    base64::engine::general_purpose::STANDARD.decode(bytes_base64).ok()
}

pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
