//! Transfer Engine — spec.md §4.5.
//!
//! Small payloads travel as one `file-transfer` frame and are stored
//! inline in the database (`TransferRecord::inline_content`, base64).
//! Payloads at or above `CHUNK_THRESHOLD_BYTES` are split into
//! `chunk-start`/`chunk-data`/`chunk-end` frames and land on disk under
//! `<data_dir>/blobs/<storage_name>`, verified by SHA-256 on completion.

pub mod chunk;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use log::{info, warn};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::{EngineError, EngineResult};
use crate::session::protocol::{ChunkAckStatus, PeerMessage, CHUNK_SIZE_BYTES, CHUNK_THRESHOLD_BYTES};
use crate::store::{NewTransfer, Store};
use chunk::{decode_chunk_bytes, sha256_hex, ChunkedTransferState, STALE_SWEEP_INTERVAL_SECS};

pub struct TransferEngine {
    store: Store,
    blobs_dir: PathBuf,
    pending: Mutex<HashMap<Uuid, ChunkedTransferState>>,
}

impl TransferEngine {
    pub fn new(store: Store, data_dir: &Path) -> Self {
        TransferEngine {
            store,
            blobs_dir: data_dir.join("blobs"),
            pending: Mutex::new(HashMap::new()),
        }
    }

    fn blob_path(&self, storage_name: &str) -> PathBuf {
        self.blobs_dir.join(storage_name)
    }

    async fn write_blob(&self, storage_name: &str, bytes: &[u8]) -> std::io::Result<()> {
        tokio::fs::create_dir_all(&self.blobs_dir).await?;
        let mut file = tokio::fs::File::create(self.blob_path(storage_name)).await?;
        file.write_all(bytes).await
    }

    pub async fn read_blob(&self, storage_name: &str) -> std::io::Result<Vec<u8>> {
        let mut file = tokio::fs::File::open(self.blob_path(storage_name)).await?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf).await?;
        Ok(buf)
    }

    /// Small direct transfer (spec.md §4.5(a)). Clipboard payloads stay
    /// inline in the store; everything else is written to `blobs_dir` and
    /// the record keeps no copy of the bytes in `inline_content`.
    pub async fn handle_file_transfer(
        &self,
        origin_peer_id: Option<Uuid>,
        storage_name: String,
        display_name: String,
        mime: String,
        byte_size: u64,
        content_base64: String,
        is_clipboard: bool,
    ) -> EngineResult<i64> {
        let inline_content = if is_clipboard {
            Some(content_base64)
        } else {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(&content_base64)
                .map_err(|e| EngineError::ProtocolViolation(format!("invalid base64 payload: {e}")))?;
            self.write_blob(&storage_name, &bytes).await?;
            None
        };

        let rec = NewTransfer {
            storage_name,
            display_name,
            mime,
            byte_size,
            inline_content,
            origin_peer_id,
            destination_peer_id: None,
            connection_ref: None,
            is_clipboard,
            origin_name_snapshot: None,
            destination_name_snapshot: None,
            tags: Vec::new(),
            extra_metadata: serde_json::json!({}),
        };
        let saved = self.store.create_transfer(rec).await?;
        Ok(saved.id)
    }

    /// Registers a new pending chunked transfer and returns the ack frame
    /// for it (spec.md §4.5/§8 — every `chunk-start` is acked, not just
    /// `chunk-end`).
    pub fn handle_chunk_start(
        &self,
        origin_peer_id: Option<Uuid>,
        transfer_token: Uuid,
        storage_name: String,
        display_name: String,
        mime: String,
        byte_size: u64,
        total_chunks: u32,
        sha256: String,
        is_clipboard: bool,
    ) -> PeerMessage {
        let state = ChunkedTransferState::new(
            storage_name,
            display_name,
            mime,
            byte_size,
            total_chunks,
            sha256,
            is_clipboard,
            origin_peer_id,
        );
        self.pending.lock().insert(transfer_token, state);
        PeerMessage::ChunkAck {
            transfer_token,
            status: ChunkAckStatus::Ok,
            chunk_index: None,
            message: None,
        }
    }

    /// Accepts one chunk and returns the ack/error frame for it. `chunk-data`
    /// for a transfer with no matching `chunk-start` is a `chunk-error`
    /// (spec.md §8), not a silent drop.
    pub fn handle_chunk_data(&self, transfer_token: Uuid, index: u32, bytes_base64: &str) -> PeerMessage {
        let Some(bytes) = decode_chunk_bytes(bytes_base64) else {
            return PeerMessage::ChunkError {
                transfer_token,
                error: "invalid base64 chunk data".to_string(),
            };
        };
        let mut pending = self.pending.lock();
        let Some(state) = pending.get_mut(&transfer_token) else {
            return PeerMessage::ChunkError {
                transfer_token,
                error: "Unknown transfer".to_string(),
            };
        };
        if index != state.received_count() {
            return PeerMessage::ChunkAck {
                transfer_token,
                status: ChunkAckStatus::Error,
                chunk_index: Some(index),
                message: Some(format!("out-of-order chunk {index}, expected {}", state.received_count())),
            };
        }
        state.accept_chunk(index, bytes);
        PeerMessage::ChunkAck {
            transfer_token,
            status: ChunkAckStatus::Ok,
            chunk_index: Some(index),
            message: None,
        }
    }

    /// Assembles and persists a completed chunked transfer. A `chunk-end`
    /// received before every chunk has arrived is an error: the partial
    /// state is discarded, nothing is written to the store. On success,
    /// returns the ack alongside the new transfer's id and display name
    /// so the caller can notify local clients without re-querying.
    pub async fn handle_chunk_end(&self, transfer_token: Uuid) -> (PeerMessage, Option<(i64, String)>) {
        let state = self.pending.lock().remove(&transfer_token);
        let Some(state) = state else {
            return (ack_error(transfer_token, "unknown transfer token"), None);
        };

        if !state.is_complete() {
            warn!(
                "transfer: chunk-end for {transfer_token} with {}/{} chunks received",
                state.received_count(),
                state.total_chunks
            );
            return (ack_error(transfer_token, "chunk-end received before all chunks"), None);
        }

        let Some(bytes) = state.assemble() else {
            return (ack_error(transfer_token, "sha256 mismatch"), None);
        };

        if let Err(e) = self.write_blob(&state.storage_name, &bytes).await {
            warn!("transfer: failed to write blob {}: {e}", state.storage_name);
            return (ack_error(transfer_token, "failed to persist blob"), None);
        }

        let rec = NewTransfer {
            storage_name: state.storage_name.clone(),
            display_name: state.display_name.clone(),
            mime: state.mime.clone(),
            byte_size: state.byte_size,
            inline_content: None,
            origin_peer_id: state.origin_peer_id,
            destination_peer_id: None,
            connection_ref: None,
            is_clipboard: state.is_clipboard,
            origin_name_snapshot: None,
            destination_name_snapshot: None,
            tags: Vec::new(),
            extra_metadata: serde_json::json!({}),
        };

        match self.store.create_transfer(rec).await {
            Ok(saved) => (
                PeerMessage::ChunkAck {
                    transfer_token,
                    status: ChunkAckStatus::Ok,
                    chunk_index: None,
                    message: None,
                },
                Some((saved.id, state.display_name)),
            ),
            Err(e) => (ack_error(transfer_token, &e.to_string()), None),
        }
    }

    /// Splits `bytes` into outbound wire messages: one `file-transfer`
    /// frame for payloads below `CHUNK_THRESHOLD_BYTES`, otherwise a
    /// `chunk-start`/`chunk-data*`/`chunk-end` sequence.
    pub fn prepare_outgoing(
        storage_name: String,
        display_name: String,
        mime: String,
        bytes: &[u8],
        is_clipboard: bool,
    ) -> Vec<PeerMessage> {
        let byte_size = bytes.len() as u64;
        if byte_size < CHUNK_THRESHOLD_BYTES {
            return vec![PeerMessage::FileTransfer {
                storage_name,
                display_name,
                mime,
                byte_size,
                content_base64: base64::engine::general_purpose::STANDARD.encode(bytes),
                is_clipboard,
            }];
        }

        let transfer_token = Uuid::new_v4();
        let total_chunks = bytes.len().div_ceil(CHUNK_SIZE_BYTES) as u32;
        let sha256 = sha256_hex(bytes);

        let mut messages = vec![PeerMessage::ChunkStart {
            transfer_token,
            storage_name,
            display_name,
            mime,
            byte_size,
            total_chunks,
            sha256,
            is_clipboard,
        }];

        for (index, chunk) in bytes.chunks(CHUNK_SIZE_BYTES).enumerate() {
            messages.push(PeerMessage::ChunkData {
                transfer_token,
                index: index as u32,
                bytes_base64: base64::engine::general_purpose::STANDARD.encode(chunk),
            });
        }
        messages.push(PeerMessage::ChunkEnd { transfer_token });
        messages
    }

    pub fn spawn_stale_reaper(self: &Arc<Self>, cancel: CancellationToken) {
        let this = self.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(STALE_SWEEP_INTERVAL_SECS));
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let stale: Vec<Uuid> = this
                            .pending
                            .lock()
                            .iter()
                            .filter(|(_, s)| s.is_stale())
                            .map(|(id, _)| *id)
                            .collect();
                        for id in stale {
                            this.pending.lock().remove(&id);
                            info!("transfer: reaped stale chunked transfer {id}");
                        }
                    }
                }
            }
        });
    }
}

fn ack_error(transfer_token: Uuid, message: &str) -> PeerMessage {
    PeerMessage::ChunkAck {
        transfer_token,
        status: ChunkAckStatus::Error,
        chunk_index: None,
        message: Some(message.to_string()),
    }
}
