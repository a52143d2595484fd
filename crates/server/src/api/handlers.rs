//! Service-level endpoints.

use std::sync::Arc;

use axum::{extract::State, Json};
use btbridge_core::SanitizedConfig;
use serde::Serialize;

use crate::state::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    /// Number of configured clients.
    pub clients: usize,
}

/// GET /api/v1/health
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        clients: state.client_count(),
    })
}

/// GET /api/v1/config
///
/// Configuration with passwords replaced by a `password_configured` flag.
pub async fn get_config(State(state): State<Arc<AppState>>) -> Json<SanitizedConfig> {
    Json(state.sanitized_config())
}
