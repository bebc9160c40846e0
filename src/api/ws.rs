//! WebSocket endpoint for local UI clients — spec.md §4.7.
//!
//! One socket per UI client. The first message must be `device-setup`,
//! carrying a client-minted `client_uuid` so a reconnecting client keeps
//! the same device identity across socket drops. After that the client can
//! send `file-transfer`, chunked-transfer frames, and
//! `terminate-connection`. Outbound `ServerMessage`s (device lists,
//! file-received notifications) are pushed as they occur via the Hub's
//! per-client channel.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use log::{debug, warn};
use uuid::Uuid;

use super::AppState;
use crate::relay::protocol::{ClientMessage, ServerMessage, VirtualDevice};

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: AppState) {
    let Some(Ok(Message::Text(text))) = socket.recv().await else {
        debug!("ws: client disconnected before device-setup");
        return;
    };
    let (client_id, device_name) = match serde_json::from_str::<ClientMessage>(&text) {
        Ok(ClientMessage::DeviceSetup { client_uuid, device_name }) => (client_uuid, device_name),
        _ => {
            warn!("ws: first message was not device-setup");
            return;
        }
    };

    let mut outbound = state.hub.register_client(client_id, device_name.clone()).await;

    let device = VirtualDevice {
        device_id: client_id,
        display_name: device_name,
        is_remote_peer: false,
        is_online: true,
    };
    let devices = state.hub.list_devices(client_id).await;
    if socket
        .send(Message::Text(serde_json::to_string(&ServerMessage::SetupComplete { device, devices }).unwrap()))
        .await
        .is_err()
    {
        state.hub.unregister_client(client_id).await;
        return;
    }

    loop {
        tokio::select! {
            outgoing = outbound.recv() => {
                match outgoing {
                    Some(msg) => {
                        let Ok(text) = serde_json::to_string(&msg) else { continue };
                        if socket.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            incoming = socket.recv() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        if let Err(e) = handle_client_message(&state, client_id, &text).await {
                            warn!("ws: {client_id} request failed: {e}");
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        debug!("ws: {client_id} read error: {e}");
                        break;
                    }
                }
            }
        }
    }

    state.hub.unregister_client(client_id).await;
    debug!("ws: {client_id} disconnected");
}

async fn handle_client_message(state: &AppState, client_id: Uuid, text: &str) -> crate::error::EngineResult<()> {
    let msg: ClientMessage = serde_json::from_str(text).map_err(|e| crate::error::EngineError::ProtocolViolation(e.to_string()))?;
    match msg {
        ClientMessage::DeviceSetup { .. } => {
            // Only valid as the first message; ignore repeats.
        }
        ClientMessage::FileTransfer { target_device_id, display_name, mime, content_base64, is_clipboard } => {
            state
                .hub
                .route_file_transfer(client_id, target_device_id, display_name, mime, content_base64, is_clipboard)
                .await?;
        }
        ClientMessage::ChunkStart {
            transfer_token,
            target_device_id,
            storage_name,
            display_name,
            mime,
            byte_size,
            total_chunks,
            sha256,
            is_clipboard,
        } => {
            state.hub.route_chunk_start(
                client_id,
                transfer_token,
                target_device_id,
                storage_name,
                display_name,
                mime,
                byte_size,
                total_chunks,
                sha256,
                is_clipboard,
            );
        }
        ClientMessage::ChunkData { transfer_token, index, bytes_base64 } => {
            state.hub.route_chunk_data(transfer_token, index, bytes_base64);
        }
        ClientMessage::ChunkEnd { transfer_token } => {
            state.hub.route_chunk_end(transfer_token).await;
        }
        ClientMessage::TerminateConnection { device_id } => {
            state.hub.terminate_connection(device_id);
        }
    }
    Ok(())
}
