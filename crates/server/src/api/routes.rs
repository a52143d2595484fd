use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use super::{backends, clients, handlers, torrents};
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    // API routes
    let api_routes = Router::new()
        // Health and config
        .route("/health", get(handlers::health))
        .route("/config", get(handlers::get_config))
        // Backend capability descriptors
        .route("/backends", get(backends::list_backends))
        .route("/backends/{client_type}", get(backends::get_backend))
        // Configured clients
        .route("/clients", get(clients::list_clients))
        .route("/clients/{uuid}/ping", get(clients::ping_client))
        // Torrents of one client
        .route(
            "/clients/{uuid}/torrents",
            get(torrents::list_torrents).post(torrents::add_torrent),
        )
        .route(
            "/clients/{uuid}/torrents/{id}",
            get(torrents::get_torrent).delete(torrents::remove_torrent),
        )
        .route("/clients/{uuid}/torrents/{id}/pause", post(torrents::pause_torrent))
        .route("/clients/{uuid}/torrents/{id}/resume", post(torrents::resume_torrent))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
}
