//! REST handlers for the local API — spec.md §4.7.

use axum::body::Bytes;
use axum::extract::{Multipart, Path, Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use base64::Engine;
use serde::Deserialize;
use uuid::Uuid;

use super::AppState;
use crate::store::models::TransferFilter;
use crate::store::NewTransfer;

type ApiResult<T> = Result<T, ApiError>;

pub struct ApiError(crate::error::EngineError);

impl From<crate::error::EngineError> for ApiError {
    fn from(e: crate::error::EngineError) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        use crate::error::EngineError::*;
        let status = match &self.0 {
            UnknownPeer(_) | UnknownTransfer(_) | UnknownTag(_) => StatusCode::NOT_FOUND,
            InvalidArgument(_) => StatusCode::BAD_REQUEST,
            TransportRefused(_) => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, Json(serde_json::json!({ "error": self.0.to_string() }))).into_response()
    }
}

pub async fn list_devices(State(state): State<AppState>) -> Json<serde_json::Value> {
    let devices = state.hub.list_devices(Uuid::nil()).await;
    Json(serde_json::json!({ "devices": devices }))
}

pub async fn list_tags(State(state): State<AppState>) -> ApiResult<Json<serde_json::Value>> {
    let tags = state.store.list_tags().await?;
    Ok(Json(serde_json::json!({ "tags": tags })))
}

#[derive(Deserialize)]
pub struct AddTagBody {
    name: String,
}

pub async fn add_tag(State(state): State<AppState>, Json(body): Json<AddTagBody>) -> ApiResult<StatusCode> {
    state.store.add_tag(body.name).await?;
    Ok(StatusCode::CREATED)
}

pub async fn delete_tag(State(state): State<AppState>, Path(name): Path<String>) -> ApiResult<Json<serde_json::Value>> {
    let updated = state.store.delete_tag(&name).await?;
    Ok(Json(serde_json::json!({ "transfers_updated": updated })))
}

pub async fn get_connection(State(state): State<AppState>, Path(device_id): Path<Uuid>) -> ApiResult<Json<serde_json::Value>> {
    let peer = state.store.get_peer(device_id).await?;
    Ok(Json(serde_json::json!({ "peer": peer })))
}

#[derive(Deserialize)]
pub struct SetEnabledBody {
    enabled: bool,
}

/// Enables or disables dialing a known peer (spec.md §8 scenario 5).
pub async fn set_connection_enabled(
    State(state): State<AppState>,
    Path(device_id): Path<Uuid>,
    Json(body): Json<SetEnabledBody>,
) -> ApiResult<Json<serde_json::Value>> {
    state.handle.set_peer_enabled(device_id, body.enabled).await?;
    let peer = state.store.get_peer(device_id).await?;
    Ok(Json(serde_json::json!({ "peer": peer })))
}

/// Restarts UDP beacon discovery (spec.md §4.3/§6).
pub async fn restart_discovery(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.handle.restart_discovery().await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Deserialize, Default)]
pub struct FilesQuery {
    tag: Option<String>,
}

/// `GET /api/files?tag=<t>` — every transfer regardless of device, filtered
/// only by tag (spec.md §6), distinct from the device-scoped variant below.
pub async fn list_files(State(state): State<AppState>, Query(q): Query<FilesQuery>) -> ApiResult<Json<serde_json::Value>> {
    let filter = TransferFilter { tag: q.tag, device_id: None };
    let files = state.store.list_transfers(filter).await?;
    Ok(Json(serde_json::json!({ "files": files })))
}

pub async fn list_files_for_device(
    State(state): State<AppState>,
    Path(device_id): Path<Uuid>,
    Query(q): Query<FilesQuery>,
) -> ApiResult<Json<serde_json::Value>> {
    let filter = TransferFilter { tag: q.tag, device_id: Some(device_id) };
    let files = state.store.list_transfers(filter).await?;
    Ok(Json(serde_json::json!({ "files": files })))
}

#[derive(Deserialize)]
pub struct RecordSentBody {
    storage_name: String,
    display_name: String,
    mime: String,
    byte_size: u64,
    destination_peer_id: Option<Uuid>,
    is_clipboard: bool,
}

/// Records a transfer the local UI already pushed to a peer directly
/// (e.g. a large download streamed straight from disk), so the history
/// stays complete without the engine re-reading the bytes.
pub async fn record_sent(State(state): State<AppState>, Json(body): Json<RecordSentBody>) -> ApiResult<Json<serde_json::Value>> {
    let rec = NewTransfer {
        storage_name: body.storage_name,
        display_name: body.display_name,
        mime: body.mime,
        byte_size: body.byte_size,
        inline_content: None,
        origin_peer_id: None,
        destination_peer_id: body.destination_peer_id,
        connection_ref: None,
        is_clipboard: body.is_clipboard,
        origin_name_snapshot: None,
        destination_name_snapshot: None,
        tags: Vec::new(),
        extra_metadata: serde_json::json!({}),
    };
    let saved = state.store.create_transfer(rec).await?;
    Ok(Json(serde_json::json!({ "transfer": saved })))
}

pub async fn upload(State(state): State<AppState>, mut multipart: Multipart) -> ApiResult<Json<serde_json::Value>> {
    let mut display_name = String::from("upload");
    let mut mime = String::from("application/octet-stream");
    let mut bytes: Vec<u8> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(|e| crate::error::EngineError::InvalidArgument(e.to_string()))? {
        if let Some(name) = field.file_name() {
            display_name = name.to_string();
        }
        if let Some(ct) = field.content_type() {
            mime = ct.to_string();
        }
        bytes = field.bytes().await.map_err(|e| crate::error::EngineError::InvalidArgument(e.to_string()))?.to_vec();
    }

    let storage_name = Uuid::new_v4().to_string();
    let content_base64 = base64::engine::general_purpose::STANDARD.encode(&bytes);
    let rec = NewTransfer {
        storage_name,
        display_name,
        mime,
        byte_size: bytes.len() as u64,
        inline_content: Some(content_base64),
        origin_peer_id: None,
        destination_peer_id: None,
        connection_ref: None,
        is_clipboard: false,
        origin_name_snapshot: None,
        destination_name_snapshot: None,
        tags: Vec::new(),
        extra_metadata: serde_json::json!({}),
    };
    let saved = state.store.create_transfer(rec).await?;
    Ok(Json(serde_json::json!({ "transfer": saved })))
}

pub async fn download(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Response> {
    let rec = state
        .store
        .get_transfer(id)
        .await?
        .ok_or(crate::error::EngineError::UnknownTransfer(id))?;

    // The blob on disk is authoritative; `inline_content` only exists for
    // clipboard payloads and any other transfer small enough to skip
    // writing a blob at all (spec.md §4.7).
    let bytes = match state.transfers.read_blob(&rec.storage_name).await {
        Ok(bytes) => bytes,
        Err(_) => {
            let inline = rec
                .inline_content
                .as_ref()
                .ok_or_else(|| crate::error::EngineError::StorageIoError("transfer has neither a blob nor inline content".to_string()))?;
            base64::engine::general_purpose::STANDARD
                .decode(inline)
                .map_err(|e| crate::error::EngineError::StorageIoError(e.to_string()))?
        }
    };

    let mime = rec.mime.clone();
    let disposition = format!("attachment; filename=\"{}\"", rec.display_name);
    Ok((
        [(header::CONTENT_TYPE, mime), (header::CONTENT_DISPOSITION, disposition)],
        Bytes::from(bytes),
    )
        .into_response())
}

#[derive(Deserialize)]
pub struct RenameBody {
    display_name: String,
}

pub async fn rename_file(State(state): State<AppState>, Path(id): Path<i64>, Json(body): Json<RenameBody>) -> ApiResult<Json<serde_json::Value>> {
    let rec = state.store.rename_transfer(id, body.display_name).await?;
    Ok(Json(serde_json::json!({ "transfer": rec })))
}

pub async fn delete_file(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<serde_json::Value>> {
    let rec = state.store.delete_transfer(id).await?;
    Ok(Json(serde_json::json!({ "transfer": rec })))
}

#[derive(Deserialize)]
pub struct TagsBody {
    tags: Vec<String>,
}

pub async fn set_file_tags(State(state): State<AppState>, Path(id): Path<i64>, Json(body): Json<TagsBody>) -> ApiResult<Json<serde_json::Value>> {
    let rec = state.store.set_transfer_tags(id, body.tags).await?;
    Ok(Json(serde_json::json!({ "transfer": rec })))
}

pub async fn set_file_metadata(State(state): State<AppState>, Path(id): Path<i64>, Json(metadata): Json<serde_json::Value>) -> ApiResult<Json<serde_json::Value>> {
    let rec = state.store.set_transfer_metadata(id, metadata).await?;
    Ok(Json(serde_json::json!({ "transfer": rec })))
}
