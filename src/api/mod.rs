//! Local HTTP + WebSocket API — spec.md §4.7.
//!
//! Built directly on `axum`/`tower-http`, the way `other_examples`'
//! chad-freeq manifest pairs them with `rusqlite`; there is no separate
//! IPC binary boundary here; the engine process serves this surface
//! itself.

mod routes;
mod ws;

use std::sync::Arc;

use axum::routing::{delete, get, patch, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::engine::EngineHandle;
use crate::identity::IdentityStore;
use crate::relay::Hub;
use crate::store::Store;
use crate::transfer::TransferEngine;
use tokio::sync::Mutex as AsyncMutex;

#[derive(Clone)]
pub struct AppState {
    pub store: Store,
    pub transfers: Arc<TransferEngine>,
    pub hub: Arc<Hub>,
    pub identity: Arc<AsyncMutex<IdentityStore>>,
    pub handle: EngineHandle,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/api/devices", get(routes::list_devices))
        .route("/api/tags", get(routes::list_tags).post(routes::add_tag))
        .route("/api/tags/:name", delete(routes::delete_tag))
        .route("/api/connections/:device_id", get(routes::get_connection))
        .route("/api/connections/:device_id/enabled", patch(routes::set_connection_enabled))
        .route("/api/discovery/restart", post(routes::restart_discovery))
        .route("/api/files", get(routes::list_files))
        .route("/api/files/:device_id", get(routes::list_files_for_device))
        .route("/api/files/record-sent", post(routes::record_sent))
        .route("/api/upload", post(routes::upload))
        .route("/api/files/:id/download", get(routes::download))
        .route("/api/files/:id", patch(routes::rename_file).delete(routes::delete_file))
        .route("/api/files/:id/tags", patch(routes::set_file_tags))
        .route("/api/files/:id/metadata", patch(routes::set_file_metadata))
        .route("/ws", get(ws::ws_handler))
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
