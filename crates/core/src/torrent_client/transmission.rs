//! Transmission torrent client implementation.
//!
//! Talks to the JSON RPC endpoint (`/transmission/rpc`). Every request is a
//! `{ method, arguments }` object; replies carry `{ result, arguments }`
//! where `result` is `"success"` or an error string. The daemon hands out a
//! session id through a 409 reply that must be echoed in
//! `X-Transmission-Session-Id`.

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::{info, warn};

use crate::config::ClientConfig;
use crate::registry::{BackendType, ClientFeatures, ClientMetadata, ConfigField};
use crate::transport::{
    Payload, RawResponse, RpcRequest, SessionScheme, Transport, TransportError,
};

use super::{
    AddTorrentOptions, ResolvedSource, TaskId, TaskSelector, TorrentClient, TorrentClientError,
    TorrentFilterRules, TorrentSource, TorrentState, TorrentTask,
};

/// Header carrying the RPC session id.
pub const SESSION_HEADER: &str = "X-Transmission-Session-Id";

pub(crate) static METADATA: ClientMetadata = ClientMetadata {
    backend: BackendType::Transmission,
    description: "Lightweight cross-platform BitTorrent client controlled through its JSON RPC interface.",
    warnings: &[
        "Requests go to http://host:port/transmission/rpc unless the address already contains \"rpc\". If the connection fails, check `rpc-url` in settings.json.",
        "Labels require Transmission 3.0 or newer; older daemons add the torrent without one.",
    ],
    default_address: "http://localhost:9091/",
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
        ConfigField::optional("username"),
        ConfigField::optional("password"),
    ],
};

/// Fields requested from `torrent-get`.
const TORRENT_FIELDS: &[&str] = &[
    "id",
    "hashString",
    "name",
    "percentDone",
    "uploadRatio",
    "addedDate",
    "downloadDir",
    "status",
    "totalSize",
    "leftUntilDone",
    "labels",
    "rateDownload",
    "rateUpload",
    "uploadedEver",
    "downloadedEver",
];

/// 409 handshake: the rejecting reply carries the new session id.
struct TransmissionSession;

#[async_trait]
impl SessionScheme for TransmissionSession {
    fn attach(&self, request: RequestBuilder, credential: &str) -> RequestBuilder {
        request.header(SESSION_HEADER, credential)
    }

    fn uses_basic_auth(&self) -> bool {
        true
    }

    fn is_session_invalid(&self, response: &RawResponse) -> bool {
        response.status == StatusCode::CONFLICT
    }

    async fn renew(
        &self,
        _transport: &Transport,
        rejected: &RawResponse,
    ) -> Result<String, TransportError> {
        rejected
            .header(SESSION_HEADER)
            .map(str::to_string)
            .ok_or_else(|| {
                TransportError::AuthRejected("409 reply without a session id".to_string())
            })
    }
}

/// RPC endpoint for a configured address.
fn rpc_endpoint(address: &str) -> String {
    if address.contains("rpc") {
        address.to_string()
    } else {
        format!("{}/transmission/rpc", address.trim_end_matches('/'))
    }
}

/// Map Transmission's numeric status onto the canonical state.
///
/// 0 stopped, 1 queued to verify, 2 verifying, 3 queued to download,
/// 4 downloading, 5 queued to seed, 6 seeding.
pub fn map_status(status: i64) -> TorrentState {
    match status {
        0 => TorrentState::Paused,
        1 | 2 => TorrentState::Checking,
        3 | 5 => TorrentState::Queued,
        4 => TorrentState::Downloading,
        6 => TorrentState::Seeding,
        _ => TorrentState::Unknown,
    }
}

#[derive(Debug, Deserialize)]
struct RpcReply<T> {
    result: String,
    arguments: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TorrentGetArguments {
    torrents: Vec<RawTorrent>,
}

#[derive(Debug, Deserialize)]
struct TorrentAddArguments {
    #[serde(rename = "torrent-added")]
    torrent_added: Option<AddedTorrent>,
    #[serde(rename = "torrent-duplicate")]
    torrent_duplicate: Option<AddedTorrent>,
}

#[derive(Debug, Deserialize)]
struct AddedTorrent {
    id: i64,
}

/// Transmission torrent as returned by `torrent-get`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawTorrent {
    id: i64,
    #[serde(default)]
    hash_string: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    percent_done: f64,
    /// -1 when nothing was downloaded, -2 for infinite.
    #[serde(default)]
    upload_ratio: f64,
    #[serde(default)]
    added_date: i64,
    #[serde(default)]
    download_dir: String,
    #[serde(default = "unknown_status")]
    status: i64,
    #[serde(default)]
    total_size: i64,
    #[serde(default)]
    left_until_done: i64,
    #[serde(default)]
    labels: Vec<String>,
    #[serde(default)]
    rate_download: i64,
    #[serde(default)]
    rate_upload: i64,
    #[serde(default)]
    uploaded_ever: i64,
    #[serde(default)]
    downloaded_ever: i64,
}

fn unknown_status() -> i64 {
    -1
}

impl RawTorrent {
    fn into_task(self) -> TorrentTask {
        TorrentTask {
            id: TaskId::Int(self.id),
            info_hash: if self.hash_string.is_empty() {
                None
            } else {
                Some(self.hash_string.to_lowercase())
            },
            name: self.name,
            progress: self.percent_done.clamp(0.0, 1.0),
            is_completed: self.left_until_done < 1,
            ratio: self.upload_ratio.max(0.0),
            date_added: self.added_date,
            save_path: self.download_dir,
            label: self.labels.into_iter().next(),
            state: map_status(self.status),
            total_size: self.total_size.max(0) as u64,
            upload_speed: self.rate_upload.max(0) as u64,
            download_speed: self.rate_download.max(0) as u64,
            total_uploaded: self.uploaded_ever.max(0) as u64,
            total_downloaded: self.downloaded_ever.max(0) as u64,
        }
    }
}

/// Transmission client implementation.
pub struct TransmissionClient {
    config: ClientConfig,
    transport: Transport,
}

impl TransmissionClient {
    /// Create a new Transmission client. No request is made until first use.
    pub fn new(config: ClientConfig) -> Result<Self, TorrentClientError> {
        let endpoint = rpc_endpoint(&config.address);
        let transport = Transport::new(&config, endpoint, Box::new(TransmissionSession))?;
        info!(client = %config.name, endpoint = transport.endpoint(), "Initialized Transmission client");
        Ok(Self { config, transport })
    }

    /// Call an RPC method and return its arguments.
    async fn request<T: DeserializeOwned>(
        &self,
        method: &str,
        arguments: Value,
    ) -> Result<Option<T>, TorrentClientError> {
        let body = json!({ "method": method, "arguments": arguments });
        let response = self
            .transport
            .execute(&RpcRequest::post("", Payload::Json(body)))
            .await?;

        let reply: RpcReply<T> = response.json()?;
        if reply.result != "success" {
            return Err(TorrentClientError::backend(reply.result));
        }
        Ok(reply.arguments)
    }

    /// Run an action on a single torrent.
    async fn torrent_action(
        &self,
        method: &str,
        id: &TaskId,
        mut extra: Map<String, Value>,
    ) -> Result<(), TorrentClientError> {
        extra.insert("ids".to_string(), json!([id]));
        self.request::<Value>(method, Value::Object(extra)).await?;
        Ok(())
    }

    /// Best-effort label assignment after creation.
    async fn assign_label(&self, id: i64, label: &str) {
        let arguments = json!({ "ids": [id], "labels": [label] });
        if let Err(e) = self.request::<Value>("torrent-set", arguments).await {
            warn!(client = %self.config.name, id = id, error = %e, "Failed to set label on added torrent");
        }
    }
}

#[async_trait]
impl TorrentClient for TransmissionClient {
    fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn backend(&self) -> BackendType {
        BackendType::Transmission
    }

    async fn check_connection(&self) -> Result<(), TorrentClientError> {
        self.request::<Value>("session-get", json!({})).await?;
        Ok(())
    }

    async fn try_add_torrent(
        &self,
        source: TorrentSource,
        options: &AddTorrentOptions,
    ) -> Result<(), TorrentClientError> {
        let mut arguments = Map::new();
        match source
            .resolve(options.local_download, self.transport.http())
            .await?
        {
            ResolvedSource::Link(url) => {
                arguments.insert("filename".to_string(), Value::String(url));
            }
            ResolvedSource::Metainfo { data, .. } => {
                arguments.insert("metainfo".to_string(), Value::String(BASE64.encode(data)));
            }
        }
        if let Some(path) = &options.save_path {
            arguments.insert("download-dir".to_string(), Value::String(path.clone()));
        }
        arguments.insert("paused".to_string(), Value::Bool(options.add_at_paused));

        let added: Option<TorrentAddArguments> =
            self.request("torrent-add", Value::Object(arguments)).await?;

        if let Some(label) = &options.label {
            match added.and_then(|a| a.torrent_added.or(a.torrent_duplicate)) {
                Some(torrent) => self.assign_label(torrent.id, label).await,
                None => warn!(client = %self.config.name, "Added torrent id unknown, label not set"),
            }
        }

        Ok(())
    }

    async fn get_torrents_by(
        &self,
        filter: &TorrentFilterRules,
    ) -> Result<Vec<TorrentTask>, TorrentClientError> {
        let mut arguments = Map::new();
        arguments.insert("fields".to_string(), json!(TORRENT_FIELDS));

        match &filter.ids {
            Some(TaskSelector::Ids(ids)) if ids.is_empty() => return Ok(Vec::new()),
            Some(TaskSelector::Ids(ids)) => {
                arguments.insert("ids".to_string(), json!(ids));
            }
            Some(TaskSelector::RecentlyActive) => {
                arguments.insert("ids".to_string(), json!("recently-active"));
            }
            None => {}
        }

        let reply: Option<TorrentGetArguments> =
            self.request("torrent-get", Value::Object(arguments)).await?;
        let torrents = reply
            .ok_or_else(|| TorrentClientError::Decode("torrent-get reply without arguments".to_string()))?
            .torrents;

        Ok(filter.apply(torrents.into_iter().map(RawTorrent::into_task).collect()))
    }

    async fn try_pause_torrent(&self, id: &TaskId) -> Result<(), TorrentClientError> {
        self.torrent_action("torrent-stop", id, Map::new()).await
    }

    async fn try_resume_torrent(&self, id: &TaskId) -> Result<(), TorrentClientError> {
        self.torrent_action("torrent-start", id, Map::new()).await
    }

    async fn try_remove_torrent(
        &self,
        id: &TaskId,
        delete_data: bool,
    ) -> Result<(), TorrentClientError> {
        let mut extra = Map::new();
        extra.insert("delete-local-data".to_string(), Value::Bool(delete_data));
        self.torrent_action("torrent-remove", id, extra).await
    }
}
