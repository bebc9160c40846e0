//! Integration tests for the discovery beacon wire format — spec.md §4.3.

use meshdrop_engine::discovery::protocol::{decode_beacon, encode_beacon, DiscoveryBeacon};
use uuid::Uuid;

#[test]
fn beacon_round_trips_through_encode_decode() {
    let peer_id = Uuid::new_v4();
    let beacon = DiscoveryBeacon::new(peer_id, "kitchen-pi".to_string(), 52742);
    let bytes = encode_beacon(&beacon);
    let decoded = decode_beacon(&bytes).expect("beacon should decode");

    assert_eq!(decoded.peer_id, peer_id);
    assert_eq!(decoded.display_name, "kitchen-pi");
    assert_eq!(decoded.tcp_port, 52742);
}

#[test]
fn decode_rejects_foreign_magic() {
    let garbage = serde_json::json!({
        "magic": "some-other-protocol-v9",
        "peer_id": Uuid::new_v4(),
        "display_name": "intruder",
        "tcp_port": 1234
    });
    let bytes = serde_json::to_vec(&garbage).unwrap();
    assert!(decode_beacon(&bytes).is_none());
}

#[test]
fn decode_rejects_garbage_bytes() {
    assert!(decode_beacon(b"not json at all").is_none());
}
