//! Integration tests for the transfer engine — spec.md §4.5/§8.

use base64::Engine;
use meshdrop_engine::session::protocol::{ChunkAckStatus, PeerMessage, CHUNK_THRESHOLD_BYTES};
use meshdrop_engine::store::Store;
use meshdrop_engine::transfer::TransferEngine;
use uuid::Uuid;

fn temp_engine() -> (tempfile::TempDir, TransferEngine) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("meshdrop.db")).unwrap();
    let engine = TransferEngine::new(store, dir.path());
    (dir, engine)
}

#[test]
fn small_payload_is_sent_as_one_frame() {
    let bytes = vec![7u8; 1024];
    let messages = TransferEngine::prepare_outgoing("s1".to_string(), "a.bin".to_string(), "application/octet-stream".to_string(), &bytes, false);
    assert_eq!(messages.len(), 1);
    assert!(matches!(messages[0], PeerMessage::FileTransfer { .. }));
}

#[test]
fn payload_at_threshold_is_chunked() {
    let bytes = vec![9u8; CHUNK_THRESHOLD_BYTES as usize];
    let messages = TransferEngine::prepare_outgoing("s2".to_string(), "b.bin".to_string(), "application/octet-stream".to_string(), &bytes, false);
    assert!(matches!(messages.first(), Some(PeerMessage::ChunkStart { .. })));
    assert!(matches!(messages.last(), Some(PeerMessage::ChunkEnd { .. })));
    assert!(messages.len() > 2);
}

#[tokio::test]
async fn chunk_end_before_all_chunks_is_an_error() {
    let (_dir, engine) = temp_engine();
    let token = Uuid::new_v4();

    engine.handle_chunk_start(None, token, "storage-x".to_string(), "doc.pdf".to_string(), "application/pdf".to_string(), 100, 3, "deadbeef".to_string(), false);
    engine.handle_chunk_data(token, 0, &base64::engine::general_purpose::STANDARD.encode(b"abc"));

    let (ack, completed) = engine.handle_chunk_end(token).await;
    assert!(completed.is_none());
    match ack {
        PeerMessage::ChunkAck { status, .. } => assert_eq!(status, ChunkAckStatus::Error),
        other => panic!("expected ChunkAck, got {other:?}"),
    }
}

#[tokio::test]
async fn out_of_order_chunk_data_is_rejected() {
    let (_dir, engine) = temp_engine();
    let token = Uuid::new_v4();
    engine.handle_chunk_start(None, token, "storage-y".to_string(), "doc.pdf".to_string(), "application/pdf".to_string(), 100, 3, "deadbeef".to_string(), false);

    let bytes = base64::engine::general_purpose::STANDARD.encode(b"abc");
    let ack = engine.handle_chunk_data(token, 1, &bytes);
    match ack {
        PeerMessage::ChunkAck { status, chunk_index, .. } => {
            assert_eq!(status, ChunkAckStatus::Error);
            assert_eq!(chunk_index, Some(1));
        }
        other => panic!("expected ChunkAck, got {other:?}"),
    }
}

#[tokio::test]
async fn chunk_data_for_unknown_transfer_is_a_chunk_error() {
    let (_dir, engine) = temp_engine();
    let token = Uuid::new_v4();
    let bytes = base64::engine::general_purpose::STANDARD.encode(b"abc");

    let ack = engine.handle_chunk_data(token, 0, &bytes);
    match ack {
        PeerMessage::ChunkError { error, .. } => assert_eq!(error, "Unknown transfer"),
        other => panic!("expected ChunkError, got {other:?}"),
    }
}

#[tokio::test]
async fn complete_chunked_transfer_is_persisted_with_matching_hash() {
    let (_dir, engine) = temp_engine();
    let token = Uuid::new_v4();
    let payload = b"hello meshdrop world".to_vec();
    let sha256 = meshdrop_engine::transfer::chunk::sha256_hex(&payload);

    engine.handle_chunk_start(None, token, "storage-z".to_string(), "note.txt".to_string(), "text/plain".to_string(), payload.len() as u64, 1, sha256, false);
    engine.handle_chunk_data(token, 0, &base64::engine::general_purpose::STANDARD.encode(&payload));

    let (ack, completed) = engine.handle_chunk_end(token).await;
    assert!(matches!(ack, PeerMessage::ChunkAck { status: ChunkAckStatus::Ok, .. }));
    let (transfer_id, display_name) = completed.expect("transfer should have been recorded");
    assert_eq!(display_name, "note.txt");
    assert!(transfer_id > 0);

    let blob = engine.read_blob("storage-z").await.unwrap();
    assert_eq!(blob, payload);
}

#[tokio::test]
async fn sha256_mismatch_is_rejected_without_writing_a_blob() {
    let (_dir, engine) = temp_engine();
    let token = Uuid::new_v4();
    let payload = b"tampered".to_vec();

    engine.handle_chunk_start(None, token, "storage-bad".to_string(), "note.txt".to_string(), "text/plain".to_string(), payload.len() as u64, 1, "0".repeat(64), false);
    engine.handle_chunk_data(token, 0, &base64::engine::general_purpose::STANDARD.encode(&payload));

    let (ack, completed) = engine.handle_chunk_end(token).await;
    assert!(completed.is_none());
    assert!(matches!(ack, PeerMessage::ChunkAck { status: ChunkAckStatus::Error, .. }));
    assert!(engine.read_blob("storage-bad").await.is_err());
}
