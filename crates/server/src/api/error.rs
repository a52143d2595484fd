//! Error responses shared by the API handlers.

use axum::{http::StatusCode, Json};
use btbridge_core::TorrentClientError;
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

pub type ApiError = (StatusCode, Json<ErrorResponse>);

pub fn api_error(status: StatusCode, error: impl Into<String>) -> ApiError {
    (
        status,
        Json(ErrorResponse {
            error: error.into(),
        }),
    )
}

/// Map an adapter error onto the HTTP status reported to callers.
pub fn client_error(e: TorrentClientError) -> ApiError {
    let status = match &e {
        TorrentClientError::NotFound(_) => StatusCode::NOT_FOUND,
        TorrentClientError::AuthRejected(_) => StatusCode::UNAUTHORIZED,
        TorrentClientError::Timeout => StatusCode::GATEWAY_TIMEOUT,
        TorrentClientError::InvalidTorrent(_) => StatusCode::BAD_REQUEST,
        TorrentClientError::UnknownBackendType(_) => StatusCode::INTERNAL_SERVER_ERROR,
        TorrentClientError::Network(_)
        | TorrentClientError::BackendFault { .. }
        | TorrentClientError::Decode(_) => StatusCode::BAD_GATEWAY,
    };
    api_error(status, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_status() {
        assert_eq!(
            client_error(TorrentClientError::NotFound("1".into())).0,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            client_error(TorrentClientError::AuthRejected("no".into())).0,
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            client_error(TorrentClientError::Timeout).0,
            StatusCode::GATEWAY_TIMEOUT
        );
        assert_eq!(
            client_error(TorrentClientError::Network("down".into())).0,
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            client_error(TorrentClientError::backend("boom")).0,
            StatusCode::BAD_GATEWAY
        );
    }
}
