//! Deluge torrent client implementation.
//!
//! Uses the Web UI's JSON-RPC endpoint (`/json`). Calls are
//! `{ method, params, id }`; replies are `{ result, error, id }` and always
//! come back with HTTP 200, so session expiry is detected from the error
//! code rather than the status.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::header::COOKIE;
use reqwest::RequestBuilder;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::registry::{BackendType, ClientFeatures, ClientMetadata, ConfigField};
use crate::transport::{
    Payload, RawResponse, RpcRequest, SessionScheme, Transport, TransportError,
};

use super::{
    AddTorrentOptions, ResolvedSource, TaskId, TaskSelector, TorrentClient, TorrentClientError,
    TorrentFilterRules, TorrentSource, TorrentState, TorrentTask,
};

const SESSION_COOKIE: &str = "_session_id";

/// JSON-RPC error code for a missing or expired web session.
const NOT_AUTHENTICATED: i64 = 1;

pub(crate) static METADATA: ClientMetadata = ClientMetadata {
    backend: BackendType::Deluge,
    description: "Plugin-based BitTorrent client controlled through the Web UI's JSON-RPC interface.",
    warnings: &[
        "Only the Web UI password is used; the username is ignored.",
        "Labels require the Label plugin to be enabled.",
        "The Web UI connects to the first configured daemon when not already connected.",
    ],
    default_address: "http://localhost:8112/",
    default_timeout_ms: 60_000,
    features: ClientFeatures {
        custom_path: true,
        label: true,
        add_paused: true,
        local_download: true,
        recently_active: true,
    },
    config_fields: &[
        ConfigField::required("address"),
        ConfigField::required("password"),
    ],
};

/// Status keys requested from `core.get_torrents_status`.
const TORRENT_KEYS: &[&str] = &[
    "hash",
    "name",
    "progress",
    "ratio",
    "time_added",
    "save_path",
    "label",
    "state",
    "total_size",
    "total_wanted",
    "total_done",
    "is_finished",
    "upload_payload_rate",
    "download_payload_rate",
    "total_uploaded",
    "all_time_download",
];

#[derive(Debug, Deserialize)]
struct DelugeReply {
    #[serde(default)]
    result: Value,
    error: Option<DelugeError>,
}

#[derive(Debug, Deserialize)]
struct DelugeError {
    #[serde(default)]
    message: String,
    #[serde(default)]
    code: i64,
}

impl DelugeReply {
    fn into_result<T: DeserializeOwned>(self, method: &str) -> Result<T, TorrentClientError> {
        if let Some(error) = self.error {
            return Err(TorrentClientError::backend(format!(
                "{} failed: {}",
                method, error.message
            )));
        }
        serde_json::from_value(self.result)
            .map_err(|e| TorrentClientError::Decode(format!("{}: {}", method, e)))
    }
}

fn rpc_body(method: &str, params: Value, id: u64) -> Payload {
    Payload::Json(json!({ "method": method, "params": params, "id": id }))
}

/// Web UI session: `auth.login` issues a `_session_id` cookie, after which
/// the web server may still need to be attached to a daemon.
#[derive(Default)]
struct DelugeSession {
    request_id: AtomicU64,
}

impl DelugeSession {
    async fn call(
        &self,
        transport: &Transport,
        cookie: Option<&str>,
        method: &str,
        params: Value,
    ) -> Result<Value, TransportError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::post("", rpc_body(method, params, id));
        let response = transport.send_once(&request, cookie).await?;

        let reply: DelugeReply = serde_json::from_str(&response.body).map_err(|e| {
            TransportError::BackendFault {
                status: response.status.as_u16(),
                body: format!("{} returned malformed reply: {}", method, e),
            }
        })?;
        match reply.error {
            Some(error) if error.code == NOT_AUTHENTICATED => Err(TransportError::AuthRejected(
                format!("{}: {}", method, error.message),
            )),
            Some(error) => Err(TransportError::BackendFault {
                status: response.status.as_u16(),
                body: format!("{}: {}", method, error.message),
            }),
            None => Ok(reply.result),
        }
    }

    /// Attach the web server to a daemon if it is not connected yet.
    async fn ensure_daemon(&self, transport: &Transport, cookie: &str) -> Result<(), TransportError> {
        let connected = self
            .call(transport, Some(cookie), "web.connected", json!([]))
            .await?;
        if connected.as_bool() == Some(true) {
            return Ok(());
        }

        let hosts = self
            .call(transport, Some(cookie), "web.get_hosts", json!([]))
            .await?;
        let host_id = hosts
            .get(0)
            .and_then(|host| host.get(0))
            .and_then(Value::as_str)
            .ok_or_else(|| TransportError::BackendFault {
                status: 200,
                body: "Deluge Web UI has no daemon hosts configured".to_string(),
            })?
            .to_string();

        info!(host = %host_id, "Connecting Deluge Web UI to daemon");
        self.call(transport, Some(cookie), "web.connect", json!([host_id]))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl SessionScheme for DelugeSession {
    fn attach(&self, request: RequestBuilder, credential: &str) -> RequestBuilder {
        request.header(COOKIE, format!("{}={}", SESSION_COOKIE, credential))
    }

    fn is_session_invalid(&self, response: &RawResponse) -> bool {
        serde_json::from_str::<DelugeReply>(&response.body)
            .ok()
            .and_then(|reply| reply.error)
            .is_some_and(|error| error.code == NOT_AUTHENTICATED)
    }

    async fn renew(
        &self,
        transport: &Transport,
        _rejected: &RawResponse,
    ) -> Result<String, TransportError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let login = RpcRequest::post("", rpc_body("auth.login", json!([transport.password()]), id));
        let response = transport.send_once(&login, None).await?;

        let accepted = serde_json::from_str::<DelugeReply>(&response.body)
            .ok()
            .and_then(|reply| reply.result.as_bool())
            .unwrap_or(false);
        if !accepted {
            return Err(TransportError::AuthRejected("invalid password".to_string()));
        }

        let cookie = response.cookie(SESSION_COOKIE).ok_or_else(|| {
            TransportError::AuthRejected("login accepted without a session cookie".to_string())
        })?;
        debug!("Deluge login successful");

        self.ensure_daemon(transport, &cookie).await?;
        Ok(cookie)
    }
}

/// Deluge torrent status as returned by `core.get_torrents_status`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct DelugeTorrent {
    hash: String,
    name: String,
    /// Percentage, 0 - 100.
    progress: f64,
    ratio: f64,
    time_added: f64,
    save_path: String,
    label: String,
    state: String,
    total_size: i64,
    total_wanted: i64,
    total_done: i64,
    is_finished: bool,
    upload_payload_rate: i64,
    download_payload_rate: i64,
    total_uploaded: i64,
    all_time_download: i64,
}

impl DelugeTorrent {
    fn into_task(self, key: String) -> TorrentTask {
        let hash = if self.hash.is_empty() {
            key.to_lowercase()
        } else {
            self.hash.to_lowercase()
        };

        TorrentTask {
            id: TaskId::Str(hash.clone()),
            info_hash: Some(hash),
            name: self.name,
            progress: (self.progress / 100.0).clamp(0.0, 1.0),
            is_completed: self.is_finished
                || (self.total_wanted > 0 && self.total_done >= self.total_wanted),
            ratio: self.ratio.max(0.0),
            date_added: self.time_added as i64,
            save_path: self.save_path,
            label: if self.label.is_empty() {
                None
            } else {
                Some(self.label)
            },
            state: map_state(&self.state),
            total_size: self.total_size.max(0) as u64,
            upload_speed: self.upload_payload_rate.max(0) as u64,
            download_speed: self.download_payload_rate.max(0) as u64,
            total_uploaded: self.total_uploaded.max(0) as u64,
            total_downloaded: self.all_time_download.max(0) as u64,
        }
    }
}

/// Map Deluge's state name onto the canonical state.
pub fn map_state(state: &str) -> TorrentState {
    match state {
        "Downloading" | "Allocating" => TorrentState::Downloading,
        "Seeding" => TorrentState::Seeding,
        "Paused" => TorrentState::Paused,
        "Checking" | "Moving" => TorrentState::Checking,
        "Queued" => TorrentState::Queued,
        _ => TorrentState::Unknown,
    }
}

/// JSON-RPC endpoint for a configured address.
fn json_endpoint(address: &str) -> String {
    let base = address.trim_end_matches('/');
    if base.ends_with("/json") {
        base.to_string()
    } else {
        format!("{}/json", base)
    }
}

/// Deluge reports removal of an unknown torrent as an error.
fn is_unknown_torrent(message: &str) -> bool {
    let message = message.to_lowercase();
    message.contains("invalid torrent") || message.contains("not in session")
}

/// Deluge client implementation.
pub struct DelugeClient {
    config: ClientConfig,
    transport: Transport,
    request_id: AtomicU64,
}

impl DelugeClient {
    /// Create a new Deluge client. Logs in lazily on the first rejected call.
    pub fn new(config: ClientConfig) -> Result<Self, TorrentClientError> {
        let endpoint = json_endpoint(&config.address);
        let transport = Transport::new(&config, endpoint, Box::new(DelugeSession::default()))?;
        info!(client = %config.name, endpoint = transport.endpoint(), "Initialized Deluge client");
        Ok(Self {
            config,
            transport,
            request_id: AtomicU64::new(1),
        })
    }

    async fn reply(&self, method: &str, params: Value) -> Result<DelugeReply, TorrentClientError> {
        let id = self.request_id.fetch_add(1, Ordering::Relaxed);
        let request = RpcRequest::post("", rpc_body(method, params, id));
        self.transport.execute(&request).await?.json()
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<T, TorrentClientError> {
        self.reply(method, params).await?.into_result(method)
    }

    /// Best-effort label assignment after creation.
    async fn assign_label(&self, hash: &str, label: &str) {
        let label = label.to_lowercase();
        // Fails when the label already exists.
        if let Err(e) = self.call::<Value>("label.add", json!([label])).await {
            debug!(client = %self.config.name, error = %e, "label.add failed");
        }
        if let Err(e) = self
            .call::<Value>("label.set_torrent", json!([hash, label]))
            .await
        {
            warn!(client = %self.config.name, hash = hash, error = %e, "Failed to set label on added torrent");
        }
    }
}

#[async_trait]
impl TorrentClient for DelugeClient {
    fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn backend(&self) -> BackendType {
        BackendType::Deluge
    }

    async fn check_connection(&self) -> Result<(), TorrentClientError> {
        // `web.connected` answers without a session; a daemon call does not.
        self.call::<Value>("core.get_session_state", json!([])).await?;
        Ok(())
    }

    async fn try_add_torrent(
        &self,
        source: TorrentSource,
        options: &AddTorrentOptions,
    ) -> Result<(), TorrentClientError> {
        let mut add_options = serde_json::Map::new();
        if let Some(path) = &options.save_path {
            add_options.insert("download_location".to_string(), json!(path));
        }
        add_options.insert("add_paused".to_string(), json!(options.add_at_paused));
        let add_options = Value::Object(add_options);

        let added: Option<String> = match source
            .resolve(options.local_download, self.transport.http())
            .await?
        {
            ResolvedSource::Link(url) if url.starts_with("magnet:") => {
                self.call("core.add_torrent_magnet", json!([url, add_options]))
                    .await?
            }
            ResolvedSource::Link(url) => {
                self.call("core.add_torrent_url", json!([url, add_options]))
                    .await?
            }
            ResolvedSource::Metainfo { data, filename } => {
                let filename = filename.unwrap_or_else(|| "torrent.torrent".to_string());
                self.call(
                    "core.add_torrent_file",
                    json!([filename, BASE64.encode(data), add_options]),
                )
                .await?
            }
        };

        // A null id means the daemon refused the torrent (usually a duplicate).
        let hash = added.ok_or_else(|| TorrentClientError::backend("torrent was not added"))?;

        if let Some(label) = &options.label {
            self.assign_label(&hash, label).await;
        }

        Ok(())
    }

    async fn get_torrents_by(
        &self,
        filter: &TorrentFilterRules,
    ) -> Result<Vec<TorrentTask>, TorrentClientError> {
        let native_filter = match &filter.ids {
            Some(TaskSelector::Ids(ids)) if ids.is_empty() => return Ok(Vec::new()),
            Some(TaskSelector::Ids(ids)) => {
                let hashes: Vec<String> = ids.iter().map(|id| id.to_string().to_lowercase()).collect();
                json!({ "id": hashes })
            }
            Some(TaskSelector::RecentlyActive) => json!({ "state": "Active" }),
            None => json!({}),
        };

        let torrents: BTreeMap<String, DelugeTorrent> = self
            .call(
                "core.get_torrents_status",
                json!([native_filter, TORRENT_KEYS]),
            )
            .await?;

        Ok(filter.apply(
            torrents
                .into_iter()
                .map(|(key, torrent)| torrent.into_task(key))
                .collect(),
        ))
    }

    async fn try_pause_torrent(&self, id: &TaskId) -> Result<(), TorrentClientError> {
        self.call::<Value>("core.pause_torrent", json!([id.to_string()]))
            .await?;
        Ok(())
    }

    async fn try_resume_torrent(&self, id: &TaskId) -> Result<(), TorrentClientError> {
        self.call::<Value>("core.resume_torrent", json!([id.to_string()]))
            .await?;
        Ok(())
    }

    async fn try_remove_torrent(
        &self,
        id: &TaskId,
        delete_data: bool,
    ) -> Result<(), TorrentClientError> {
        let reply = self
            .reply("core.remove_torrent", json!([id.to_string(), delete_data]))
            .await?;

        match &reply.error {
            Some(error) if is_unknown_torrent(&error.message) => {
                debug!(client = %self.config.name, id = %id, "Torrent already removed");
                Ok(())
            }
            _ => reply.into_result::<Value>("core.remove_torrent").map(|_| ()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_state() {
        assert_eq!(map_state("Downloading"), TorrentState::Downloading);
        assert_eq!(map_state("Allocating"), TorrentState::Downloading);
        assert_eq!(map_state("Seeding"), TorrentState::Seeding);
        assert_eq!(map_state("Paused"), TorrentState::Paused);
        assert_eq!(map_state("Checking"), TorrentState::Checking);
        assert_eq!(map_state("Moving"), TorrentState::Checking);
        assert_eq!(map_state("Queued"), TorrentState::Queued);
        assert_eq!(map_state("Error"), TorrentState::Unknown);
        assert_eq!(map_state("downloading"), TorrentState::Unknown);
    }

    #[test]
    fn test_progress_normalized() {
        let torrent = DelugeTorrent {
            hash: "ABCD".to_string(),
            progress: 42.0,
            total_wanted: 100,
            total_done: 42,
            state: "Downloading".to_string(),
            ..Default::default()
        };
        let task = torrent.into_task("abcd".to_string());
        assert!((task.progress - 0.42).abs() < 1e-9);
        assert!(!task.is_completed);
        assert_eq!(task.id, TaskId::from("abcd"));
    }

    #[test]
    fn test_completion_signals() {
        let finished = DelugeTorrent {
            is_finished: true,
            total_wanted: 100,
            total_done: 10,
            ..Default::default()
        };
        assert!(finished.into_task("a".to_string()).is_completed);

        let done = DelugeTorrent {
            total_wanted: 100,
            total_done: 100,
            state: "Paused".to_string(),
            ..Default::default()
        };
        let task = done.into_task("b".to_string());
        assert!(task.is_completed);
        assert_eq!(task.state, TorrentState::Paused);
    }

    #[test]
    fn test_fetching_metadata_is_not_completed() {
        let raw: DelugeTorrent = serde_json::from_str(
            r#"{"state":"Downloading","total_wanted":0,"total_done":0,"is_finished":false}"#,
        )
        .unwrap();
        let task = raw.into_task("abcd".to_string());
        assert!(!task.is_completed);
        assert_eq!(task.state, TorrentState::Downloading);
    }

    #[test]
    fn test_hash_falls_back_to_key() {
        let task = DelugeTorrent::default().into_task("FFEE".to_string());
        assert_eq!(task.info_hash.as_deref(), Some("ffee"));
        assert!(task.label.is_none());
    }

    #[test]
    fn test_json_endpoint() {
        assert_eq!(json_endpoint("http://localhost:8112/"), "http://localhost:8112/json");
        assert_eq!(json_endpoint("http://nas:8112/deluge/json"), "http://nas:8112/deluge/json");
    }

    #[test]
    fn test_session_invalid_detection() {
        let scheme = DelugeSession::default();
        let response = |body: &str| RawResponse {
            status: reqwest::StatusCode::OK,
            headers: reqwest::header::HeaderMap::new(),
            body: body.to_string(),
        };
        assert!(scheme.is_session_invalid(&response(
            r#"{"result":null,"error":{"message":"Not authenticated","code":1},"id":1}"#
        )));
        assert!(!scheme.is_session_invalid(&response(
            r#"{"result":null,"error":{"message":"boom","code":4},"id":1}"#
        )));
        assert!(!scheme.is_session_invalid(&response(r#"{"result":true,"error":null,"id":1}"#)));
        assert!(!scheme.is_session_invalid(&response("not json")));
    }

    #[test]
    fn test_unknown_torrent_detection() {
        assert!(is_unknown_torrent("torrent_id abc not in session."));
        assert!(is_unknown_torrent("Invalid torrent ID"));
        assert!(!is_unknown_torrent("Permission denied"));
    }
}
