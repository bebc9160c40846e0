//! Length-prefixed JSON framing — generalized from the teacher's
//! `write_peer_message`/`read_peer_message` in `runtime/lan/peer.rs`.
//! Each frame is a 4-byte big-endian length prefix followed by the JSON
//! payload; `MAX_FRAME_SIZE` bounds the length to reject runaway/garbage
//! frames before allocating.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};

use super::protocol::{PeerMessage, MAX_FRAME_SIZE};
use crate::error::EngineError;

pub async fn write_peer_message(writer: &mut OwnedWriteHalf, msg: &PeerMessage) -> Result<(), EngineError> {
    let bytes = serde_json::to_vec(msg).map_err(|e| EngineError::ProtocolViolation(e.to_string()))?;
    if bytes.len() > MAX_FRAME_SIZE {
        return Err(EngineError::ProtocolViolation(format!(
            "outgoing frame too large: {} bytes",
            bytes.len()
        )));
    }
    let len = bytes.len() as u32;
    writer
        .write_all(&len.to_be_bytes())
        .await
        .map_err(|e| EngineError::TransportReset(e.to_string()))?;
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| EngineError::TransportReset(e.to_string()))?;
    Ok(())
}

pub async fn read_peer_message(reader: &mut OwnedReadHalf) -> Result<PeerMessage, EngineError> {
    let mut len_buf = [0u8; 4];
    reader
        .read_exact(&mut len_buf)
        .await
        .map_err(|e| EngineError::TransportReset(e.to_string()))?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(EngineError::ProtocolViolation(format!("incoming frame too large: {len} bytes")));
    }
    let mut buf = vec![0u8; len];
    reader
        .read_exact(&mut buf)
        .await
        .map_err(|e| EngineError::TransportReset(e.to_string()))?;
    serde_json::from_slice(&buf).map_err(|e| EngineError::ProtocolViolation(e.to_string()))
}
