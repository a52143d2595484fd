//! Common test utilities for E2E testing with mocks.
//!
//! Builds an in-process router whose only configured client is backed by a
//! `MockTorrentClient`, so the HTTP surface can be exercised without a daemon.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;
use uuid::Uuid;

use btbridge_core::{
    config::ServerConfig, testing::MockTorrentClient, BackendType, ClientConfig, ClientRegistry,
    Config,
};
use btbridge_server::{api::create_router, state::AppState};

/// Re-export fixtures for test convenience
pub use btbridge_core::testing::fixtures;

/// Test fixture with one mock-backed client configured.
pub struct TestFixture {
    /// The Axum router for testing
    pub router: Router,
    /// Mock behind the configured client
    pub mock: Arc<MockTorrentClient>,
    /// Uuid of the configured client
    pub client_uuid: Uuid,
}

/// Response from a test request
#[derive(Debug)]
pub struct TestResponse {
    pub status: StatusCode,
    pub body: Value,
}

impl TestFixture {
    pub async fn new() -> Self {
        let mut client = ClientConfig::with_defaults(BackendType::Transmission);
        client.name = "home".to_string();
        client.username = "admin".to_string();
        client.password = "secret".to_string();

        let config = Config {
            server: ServerConfig {
                host: std::net::IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
                port: 0, // Not used for in-process testing
            },
            clients: vec![client.clone()],
        };

        let mock = Arc::new(MockTorrentClient::new(client.clone()));
        let registry = ClientRegistry::new();
        registry.insert(client.clone(), mock.clone()).await;

        let state = Arc::new(AppState::new(config, registry));

        Self {
            router: create_router(state),
            mock,
            client_uuid: client.uuid,
        }
    }

    /// Path under the configured client.
    pub fn client_path(&self, suffix: &str) -> String {
        format!("/api/v1/clients/{}{}", self.client_uuid, suffix)
    }

    /// Send a GET request to the test server.
    pub async fn get(&self, path: &str) -> TestResponse {
        self.request("GET", path, None).await
    }

    /// Send a POST request with JSON body.
    pub async fn post(&self, path: &str, body: Value) -> TestResponse {
        self.request("POST", path, Some(body)).await
    }

    /// Send a POST request without a body.
    pub async fn post_empty(&self, path: &str) -> TestResponse {
        self.request("POST", path, None).await
    }

    /// Send a DELETE request.
    pub async fn delete(&self, path: &str) -> TestResponse {
        self.request("DELETE", path, None).await
    }

    async fn request(&self, method: &str, path: &str, body: Option<Value>) -> TestResponse {
        let builder = Request::builder().method(method).uri(path);
        let request = match body {
            Some(json_body) => builder
                .header("Content-Type", "application/json")
                .body(Body::from(json_body.to_string())),
            None => builder.body(Body::empty()),
        }
        .unwrap();

        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();

        TestResponse {
            status,
            body: serde_json::from_slice(&bytes).unwrap_or(Value::Null),
        }
    }
}

/// Helper to assert a response has expected status.
#[macro_export]
macro_rules! assert_status {
    ($response:expr, $status:expr) => {
        assert_eq!(
            $response.status, $status,
            "Expected status {:?}, got {:?}. Body: {}",
            $status,
            $response.status,
            serde_json::to_string_pretty(&$response.body).unwrap_or_default()
        );
    };
}
