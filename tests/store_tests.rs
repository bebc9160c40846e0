//! Integration tests for the durable store — spec.md §8.

use meshdrop_engine::store::models::TransferFilter;
use meshdrop_engine::store::{NewTransfer, Store};
use uuid::Uuid;

fn new_transfer(storage_name: &str) -> NewTransfer {
    NewTransfer {
        storage_name: storage_name.to_string(),
        display_name: "photo.png".to_string(),
        mime: "image/png".to_string(),
        byte_size: 1024,
        inline_content: Some("aGVsbG8=".to_string()),
        origin_peer_id: None,
        destination_peer_id: None,
        connection_ref: None,
        is_clipboard: false,
        origin_name_snapshot: None,
        destination_name_snapshot: None,
        tags: vec!["Work".to_string(), "work".to_string(), " Pets ".to_string()],
        extra_metadata: serde_json::json!({}),
    }
}

fn temp_store() -> (tempfile::TempDir, Store) {
    let dir = tempfile::tempdir().unwrap();
    let store = Store::open(&dir.path().join("meshdrop.db")).unwrap();
    (dir, store)
}

#[tokio::test]
async fn create_transfer_normalizes_and_dedupes_tags() {
    let (_dir, store) = temp_store();
    let rec = store.create_transfer(new_transfer("file-a")).await.unwrap();
    assert_eq!(rec.tags, vec!["work".to_string(), "pets".to_string()]);
}

#[tokio::test]
async fn rename_transfer_round_trips_through_list() {
    let (_dir, store) = temp_store();
    let rec = store.create_transfer(new_transfer("file-b")).await.unwrap();
    store.rename_transfer(rec.id, "renamed.png".to_string()).await.unwrap();

    let all = store.list_transfers(TransferFilter::default()).await.unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].display_name, "renamed.png");
}

#[tokio::test]
async fn rename_transfer_rejects_empty_name() {
    let (_dir, store) = temp_store();
    let rec = store.create_transfer(new_transfer("file-c")).await.unwrap();
    let err = store.rename_transfer(rec.id, "   ".to_string()).await.unwrap_err();
    assert!(err.to_string().contains("invalid argument"));
}

#[tokio::test]
async fn list_transfers_filters_by_tag() {
    let (_dir, store) = temp_store();
    store.create_transfer(new_transfer("file-d")).await.unwrap();
    let mut other = new_transfer("file-e");
    other.tags = vec!["receipts".to_string()];
    store.create_transfer(other).await.unwrap();

    let filtered = store
        .list_transfers(TransferFilter { tag: Some("pets".to_string()), device_id: None })
        .await
        .unwrap();
    assert_eq!(filtered.len(), 1);
    assert_eq!(filtered[0].storage_name, "file-d");
}

#[tokio::test]
async fn delete_tag_strips_it_from_every_transfer() {
    let (_dir, store) = temp_store();
    let rec = store.create_transfer(new_transfer("file-f")).await.unwrap();
    assert!(rec.tags.contains(&"work".to_string()));

    let updated = store.delete_tag("work").await.unwrap();
    assert_eq!(updated, 1);

    let reloaded = store.get_transfer(rec.id).await.unwrap().unwrap();
    assert!(!reloaded.tags.contains(&"work".to_string()));
    assert!(reloaded.tags.contains(&"pets".to_string()));
}

#[tokio::test]
async fn peers_start_offline_after_schema_bootstrap() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("meshdrop.db");
    let peer_id = Uuid::new_v4();

    {
        let store = Store::open(&db_path).unwrap();
        store
            .upsert_peer_by_id(peer_id, "laptop".to_string(), Some("192.168.1.5".to_string()), Some(52742))
            .await
            .unwrap();
        store.mark_peer_online(peer_id, "token-1".to_string()).await.unwrap();
        let peer = store.get_peer(peer_id).await.unwrap().unwrap();
        assert!(peer.is_online);
    }

    // Reopening (simulating a restart) must force every peer back offline.
    let store = Store::open(&db_path).unwrap();
    let peer = store.get_peer(peer_id).await.unwrap().unwrap();
    assert!(!peer.is_online);
    assert!(peer.transport_session_token.is_none());
}

#[tokio::test]
async fn mark_peer_offline_only_clears_the_matching_session_token() {
    let (_dir, store) = temp_store();
    let a = Uuid::new_v4();
    let b = Uuid::new_v4();
    store.upsert_peer_by_id(a, "a".to_string(), None, None).await.unwrap();
    store.upsert_peer_by_id(b, "b".to_string(), None, None).await.unwrap();
    store.mark_peer_online(a, "tok-a".to_string()).await.unwrap();
    store.mark_peer_online(b, "tok-b".to_string()).await.unwrap();

    store.mark_peer_offline("tok-a").await.unwrap();

    assert!(!store.get_peer(a).await.unwrap().unwrap().is_online);
    assert!(store.get_peer(b).await.unwrap().unwrap().is_online);
}

#[tokio::test]
async fn delete_transfer_returns_the_deleted_record() {
    let (_dir, store) = temp_store();
    let rec = store.create_transfer(new_transfer("file-g")).await.unwrap();
    let deleted = store.delete_transfer(rec.id).await.unwrap();
    assert_eq!(deleted.storage_name, "file-g");
    assert!(store.get_transfer(rec.id).await.unwrap().is_none());
}
