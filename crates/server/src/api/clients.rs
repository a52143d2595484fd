//! Configured torrent clients.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use btbridge_core::{config::SanitizedClientConfig, SharedClient, TorrentClient};
use serde::Serialize;
use uuid::Uuid;

use super::error::{api_error, client_error, ApiError};
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct PingResponse {
    pub online: bool,
}

/// Adapter for `uuid`, or a 404 when no such client is configured.
pub async fn resolve_client(state: &AppState, uuid: &Uuid) -> Result<SharedClient, ApiError> {
    match state.client(uuid).await {
        Some(result) => result.map_err(client_error),
        None => Err(api_error(
            StatusCode::NOT_FOUND,
            format!("Client not found: {}", uuid),
        )),
    }
}

/// GET /api/v1/clients
pub async fn list_clients(State(state): State<Arc<AppState>>) -> Json<Vec<SanitizedClientConfig>> {
    Json(state.sanitized_config().clients)
}

/// GET /api/v1/clients/{uuid}/ping
pub async fn ping_client(
    State(state): State<Arc<AppState>>,
    Path(uuid): Path<Uuid>,
) -> Result<Json<PingResponse>, ApiError> {
    let client = resolve_client(&state, &uuid).await?;
    Ok(Json(PingResponse {
        online: client.ping().await,
    }))
}
