//! Backend capability descriptors.

use axum::{extract::Path, http::StatusCode, Json};
use btbridge_core::{ClientMetadata, ClientRegistry};

use super::error::{api_error, ApiError};

/// GET /api/v1/backends
pub async fn list_backends() -> Json<Vec<&'static ClientMetadata>> {
    Json(ClientRegistry::backends())
}

/// GET /api/v1/backends/{client_type}
pub async fn get_backend(
    Path(client_type): Path<String>,
) -> Result<Json<&'static ClientMetadata>, ApiError> {
    ClientRegistry::describe(&client_type)
        .map(Json)
        .map_err(|e| api_error(StatusCode::NOT_FOUND, e.to_string()))
}
