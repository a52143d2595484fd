//! Authenticated HTTP transport shared by the backend adapters.
//!
//! A [`Transport`] owns one connection's session credential. Each backend
//! plugs in a [`SessionScheme`] describing how the credential is attached,
//! how an expired session is recognized, and how a new one is obtained.
//! [`Transport::execute`] renews at most once per call.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, SET_COOKIE};
use reqwest::{multipart, Client, Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::torrent_client::TorrentClientError;

/// Maximum number of body characters kept in diagnostics.
const DIAGNOSTIC_BODY_LIMIT: usize = 200;

/// Errors raised while talking to a backend.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Connection failed: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Backend fault (HTTP {status}): {body}")]
    BackendFault { status: u16, body: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            TransportError::Timeout
        } else {
            TransportError::Network(e.to_string())
        }
    }
}

impl From<TransportError> for TorrentClientError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::Network(msg) => TorrentClientError::Network(msg),
            TransportError::Timeout => TorrentClientError::Timeout,
            TransportError::AuthRejected(msg) => TorrentClientError::AuthRejected(msg),
            TransportError::BackendFault { status, body } => TorrentClientError::BackendFault {
                status: Some(status),
                message: body,
            },
            TransportError::InvalidRequest(msg) => TorrentClientError::InvalidTorrent(msg),
        }
    }
}

/// Request body. Kept as data so a retry can rebuild an identical request.
#[derive(Debug, Clone, Default)]
pub enum Payload {
    #[default]
    Empty,
    Json(serde_json::Value),
    Form(Vec<(String, String)>),
    Multipart(Vec<MultipartField>),
}

/// One part of a multipart body.
#[derive(Debug, Clone)]
pub enum MultipartField {
    Text {
        name: String,
        value: String,
    },
    File {
        name: String,
        filename: String,
        mime: String,
        data: Vec<u8>,
    },
}

impl MultipartField {
    pub fn text(name: impl Into<String>, value: impl Into<String>) -> Self {
        MultipartField::Text {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl Payload {
    fn apply(&self, builder: RequestBuilder) -> Result<RequestBuilder, TransportError> {
        Ok(match self {
            Payload::Empty => builder,
            Payload::Json(value) => builder.json(value),
            Payload::Form(pairs) => builder.form(pairs),
            Payload::Multipart(fields) => {
                let mut form = multipart::Form::new();
                for field in fields {
                    form = match field {
                        MultipartField::Text { name, value } => form.text(name.clone(), value.clone()),
                        MultipartField::File {
                            name,
                            filename,
                            mime,
                            data,
                        } => {
                            let part = multipart::Part::bytes(data.clone())
                                .file_name(filename.clone())
                                .mime_str(mime)
                                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
                            form.part(name.clone(), part)
                        }
                    };
                }
                builder.multipart(form)
            }
        })
    }
}

/// A backend call, relative to the transport's endpoint.
#[derive(Debug, Clone)]
pub struct RpcRequest {
    pub method: Method,
    /// Path appended to the endpoint; empty for the endpoint itself.
    pub path: String,
    pub query: Vec<(String, String)>,
    pub payload: Payload,
}

impl RpcRequest {
    pub fn get(path: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            path: path.into(),
            query: Vec::new(),
            payload: Payload::Empty,
        }
    }

    pub fn post(path: impl Into<String>, payload: Payload) -> Self {
        Self {
            method: Method::POST,
            path: path.into(),
            query: Vec::new(),
            payload,
        }
    }

    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }
}

/// Reply as received, before any backend-level interpretation.
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl RawResponse {
    /// Decode the body as JSON.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, TorrentClientError> {
        serde_json::from_str(&self.body).map_err(|e| {
            TorrentClientError::Decode(format!(
                "{} (body: {})",
                e,
                truncate(&self.body)
            ))
        })
    }

    /// Value of a header as a string, if present and valid UTF-8.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Value of a cookie set by this response.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all(SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .filter_map(|v| v.split(';').next())
            .filter_map(|pair| pair.split_once('='))
            .find(|(key, _)| key.trim() == name)
            .map(|(_, value)| value.trim().to_string())
    }
}

pub(crate) fn truncate(body: &str) -> String {
    body.chars().take(DIAGNOSTIC_BODY_LIMIT).collect()
}

/// Backend-specific session handshake.
#[async_trait]
pub trait SessionScheme: Send + Sync {
    /// Attach the held credential to an outgoing request.
    fn attach(&self, request: RequestBuilder, credential: &str) -> RequestBuilder;

    /// Whether HTTP basic auth carries the configured username/password.
    fn uses_basic_auth(&self) -> bool {
        false
    }

    /// Whether `response` means the session is missing or expired.
    fn is_session_invalid(&self, response: &RawResponse) -> bool;

    /// Obtain a new credential after `rejected` was classified as invalid,
    /// either from the rejection itself or through a login round trip.
    async fn renew(
        &self,
        transport: &Transport,
        rejected: &RawResponse,
    ) -> Result<String, TransportError>;
}

/// Where a call stands in the renewal handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SessionPhase {
    /// Sent with whatever credential was held.
    Fresh,
    /// Sent again after one renewal; another rejection is final.
    Renewed,
}

/// HTTP transport bound to one client configuration.
pub struct Transport {
    http: Client,
    endpoint: String,
    client_name: String,
    username: String,
    password: String,
    timeout: Duration,
    scheme: Box<dyn SessionScheme>,
    credential: RwLock<Option<String>>,
}

impl Transport {
    /// Create a transport calling `endpoint` with `config`'s credentials and timeout.
    pub fn new(
        config: &ClientConfig,
        endpoint: impl Into<String>,
        scheme: Box<dyn SessionScheme>,
    ) -> Result<Self, TorrentClientError> {
        let http = Client::builder()
            .timeout(config.timeout_duration())
            .build()
            .map_err(|e| TorrentClientError::Network(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http,
            endpoint: endpoint.into(),
            client_name: config.name.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            timeout: config.timeout_duration(),
            scheme,
            credential: RwLock::new(None),
        })
    }

    /// Endpoint all request paths are relative to.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Underlying HTTP client, for requests outside the backend session.
    pub fn http(&self) -> &Client {
        &self.http
    }

    /// Currently held session credential.
    pub async fn credential(&self) -> Option<String> {
        self.credential.read().await.clone()
    }

    /// Execute a request, renewing the session at most once.
    ///
    /// The configured timeout bounds the whole call including the renewal
    /// round trip and the retry.
    pub async fn execute(&self, request: &RpcRequest) -> Result<RawResponse, TransportError> {
        match tokio::time::timeout(self.timeout, self.execute_with_renewal(request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(client = %self.client_name, path = %request.path, "Request timed out");
                Err(TransportError::Timeout)
            }
        }
    }

    async fn execute_with_renewal(
        &self,
        request: &RpcRequest,
    ) -> Result<RawResponse, TransportError> {
        let mut phase = SessionPhase::Fresh;

        loop {
            let credential = self.credential.read().await.clone();
            let response = self.send_once(request, credential.as_deref()).await?;

            if self.scheme.is_session_invalid(&response) {
                match phase {
                    SessionPhase::Fresh => {
                        info!(client = %self.client_name, "Session expired, renewing");
                        let renewed = self.scheme.renew(self, &response).await?;
                        *self.credential.write().await = Some(renewed);
                        phase = SessionPhase::Renewed;
                        continue;
                    }
                    SessionPhase::Renewed => {
                        warn!(client = %self.client_name, "Session rejected after renewal");
                        return Err(TransportError::AuthRejected(format!(
                            "session rejected after renewal (HTTP {})",
                            response.status.as_u16()
                        )));
                    }
                }
            }

            if !response.status.is_success() {
                return Err(TransportError::BackendFault {
                    status: response.status.as_u16(),
                    body: truncate(&response.body),
                });
            }

            return Ok(response);
        }
    }

    /// Send one request without any session handling.
    pub async fn send_once(
        &self,
        request: &RpcRequest,
        credential: Option<&str>,
    ) -> Result<RawResponse, TransportError> {
        let url = self.url_for(&request.path);
        let mut builder = self.http.request(request.method.clone(), &url);

        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if self.scheme.uses_basic_auth() && (!self.username.is_empty() || !self.password.is_empty())
        {
            builder = builder.basic_auth(&self.username, Some(&self.password));
        }
        if let Some(credential) = credential {
            builder = self.scheme.attach(builder, credential);
        }
        builder = request.payload.apply(builder)?;

        debug!(client = %self.client_name, method = %request.method, url = %url, "Sending request");

        let response = builder.send().await?;
        let status = response.status();
        let headers = response.headers().clone();
        let body = response.text().await?;

        debug!(client = %self.client_name, status = status.as_u16(), "Received response");

        Ok(RawResponse {
            status,
            headers,
            body,
        })
    }

    fn url_for(&self, path: &str) -> String {
        if path.is_empty() {
            self.endpoint.clone()
        } else {
            format!("{}{}", self.endpoint.trim_end_matches('/'), path)
        }
    }
}
