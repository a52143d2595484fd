//! qBittorrent torrent client implementation.

use async_trait::async_trait;
use reqwest::header::COOKIE;
use reqwest::{RequestBuilder, StatusCode};
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::ClientConfig;
use crate::registry::{BackendType, ClientFeatures, ClientMetadata, ConfigField};
use crate::transport::{
    truncate, MultipartField, Payload, RawResponse, RpcRequest, SessionScheme, Transport,
    TransportError,
};

use super::{
    AddTorrentOptions, ResolvedSource, TaskId, TaskSelector, TorrentClient, TorrentClientError,
    TorrentFilterRules, TorrentSource, TorrentState, TorrentTask,
};

const SESSION_COOKIE: &str = "SID";

pub(crate) static METADATA: ClientMetadata = ClientMetadata {
    backend: BackendType::QBittorrent,
    description: "Feature-rich BitTorrent client controlled through its Web API (v2).",
    warnings: &[
        "The Web UI must be enabled in Tools > Options > Web UI.",
        "Labels map to qBittorrent categories.",
    ],
    default_address: "http://localhost:8080/",
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
        ConfigField::required("username"),
        ConfigField::required("password"),
    ],
};

/// Cookie session: a 403 means the `SID` cookie is missing or expired.
struct QBittorrentSession;

#[async_trait]
impl SessionScheme for QBittorrentSession {
    fn attach(&self, request: RequestBuilder, credential: &str) -> RequestBuilder {
        if credential.is_empty() {
            request
        } else {
            request.header(COOKIE, format!("{}={}", SESSION_COOKIE, credential))
        }
    }

    fn is_session_invalid(&self, response: &RawResponse) -> bool {
        response.status == StatusCode::FORBIDDEN
    }

    async fn renew(
        &self,
        transport: &Transport,
        _rejected: &RawResponse,
    ) -> Result<String, TransportError> {
        let login = RpcRequest::post(
            "/api/v2/auth/login",
            Payload::Form(vec![
                ("username".to_string(), transport.username().to_string()),
                ("password".to_string(), transport.password().to_string()),
            ]),
        );
        let response = transport.send_once(&login, None).await?;

        if response.status == StatusCode::FORBIDDEN {
            // Too many failed attempts, the WebUI bans the IP for a while.
            return Err(TransportError::AuthRejected(
                "login banned after repeated failures".to_string(),
            ));
        }
        if !response.status.is_success() {
            return Err(TransportError::BackendFault {
                status: response.status.as_u16(),
                body: truncate(&response.body),
            });
        }
        if response.body.trim() != "Ok." {
            return Err(TransportError::AuthRejected("invalid credentials".to_string()));
        }

        debug!("qBittorrent login successful");
        // Auth bypass for trusted subnets answers "Ok." without a cookie.
        Ok(response.cookie(SESSION_COOKIE).unwrap_or_default())
    }
}

/// qBittorrent torrent info response.
#[derive(Debug, Deserialize)]
struct QBTorrentInfo {
    hash: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    progress: f64,
    #[serde(default)]
    size: i64,
    #[serde(default)]
    amount_left: i64,
    #[serde(default)]
    downloaded: i64,
    #[serde(default)]
    uploaded: i64,
    #[serde(default)]
    dlspeed: i64,
    #[serde(default)]
    upspeed: i64,
    #[serde(default)]
    ratio: f64,
    #[serde(default)]
    added_on: i64,
    #[serde(default)]
    save_path: String,
    #[serde(default)]
    category: String,
    /// Comma separated.
    #[serde(default)]
    tags: String,
}

impl QBTorrentInfo {
    fn into_task(self) -> TorrentTask {
        let label = if self.category.is_empty() {
            self.tags
                .split(',')
                .map(str::trim)
                .find(|t| !t.is_empty())
                .map(str::to_string)
        } else {
            Some(self.category)
        };
        let hash = self.hash.to_lowercase();
        // Before metadata arrives the size is unknown and `amount_left` reads 0.
        let has_metadata = self.size > 0 && !matches!(self.state.as_str(), "metaDL" | "forcedMetaDL");
        let is_completed = has_metadata && (self.amount_left == 0 || self.progress >= 1.0);

        TorrentTask {
            id: TaskId::Str(hash.clone()),
            info_hash: Some(hash),
            name: self.name,
            progress: self.progress.clamp(0.0, 1.0),
            is_completed,
            ratio: self.ratio.max(0.0),
            date_added: self.added_on,
            save_path: self.save_path,
            label,
            state: parse_qb_state(&self.state),
            total_size: self.size.max(0) as u64,
            upload_speed: self.upspeed.max(0) as u64,
            download_speed: self.dlspeed.max(0) as u64,
            total_uploaded: self.uploaded.max(0) as u64,
            total_downloaded: self.downloaded.max(0) as u64,
        }
    }
}

/// Summary returned by `torrents/add` since 5.1.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct AddSummary {
    success_count: u64,
    failure_count: u64,
    pending_count: u64,
}

/// Whether a `torrents/add` reply confirms the torrent: `Ok.` up to 5.0, a
/// JSON summary without failures afterwards.
fn add_accepted(body: &str) -> bool {
    let body = body.trim();
    if body == "Ok." {
        return true;
    }
    serde_json::from_str::<AddSummary>(body).is_ok_and(|summary| {
        summary.failure_count == 0 && summary.success_count + summary.pending_count > 0
    })
}

/// Parse qBittorrent state string to TorrentState.
pub fn parse_qb_state(state: &str) -> TorrentState {
    match state {
        "downloading" | "forcedDL" | "metaDL" | "forcedMetaDL" | "allocating" | "stalledDL" => {
            TorrentState::Downloading
        }
        "uploading" | "forcedUP" | "stalledUP" => TorrentState::Seeding,
        "pausedDL" | "pausedUP" | "stoppedDL" | "stoppedUP" => TorrentState::Paused,
        "checkingDL" | "checkingUP" | "checkingResumeData" | "moving" => TorrentState::Checking,
        "queuedDL" | "queuedUP" => TorrentState::Queued,
        _ => TorrentState::Unknown,
    }
}

/// qBittorrent addresses torrents by lowercase info hash.
fn hash_of(id: &TaskId) -> String {
    id.to_string().to_lowercase()
}

/// qBittorrent client implementation.
pub struct QBittorrentClient {
    config: ClientConfig,
    transport: Transport,
}

impl QBittorrentClient {
    /// Create a new qBittorrent client. Logs in lazily on the first 403.
    pub fn new(config: ClientConfig) -> Result<Self, TorrentClientError> {
        let endpoint = config.address.trim_end_matches('/').to_string();
        let transport = Transport::new(&config, endpoint, Box::new(QBittorrentSession))?;
        info!(client = %config.name, endpoint = transport.endpoint(), "Initialized qBittorrent client");
        Ok(Self { config, transport })
    }

    async fn post_form(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<String, TorrentClientError> {
        let form = params
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        let response = self
            .transport
            .execute(&RpcRequest::post(path, Payload::Form(form)))
            .await?;
        Ok(response.body)
    }

    /// Torrent action with a fallback endpoint for v5, which renamed
    /// pause/resume to stop/start.
    async fn hash_action(
        &self,
        path: &str,
        fallback: &str,
        id: &TaskId,
    ) -> Result<(), TorrentClientError> {
        let params = [("hashes", hash_of(id))];
        match self.post_form(path, &params).await {
            Err(TorrentClientError::BackendFault {
                status: Some(404), ..
            }) => {
                debug!(client = %self.config.name, path = path, fallback = fallback, "Endpoint missing, retrying with v5 name");
                self.post_form(fallback, &params).await.map(|_| ())
            }
            other => other.map(|_| ()),
        }
    }
}

#[async_trait]
impl TorrentClient for QBittorrentClient {
    fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn backend(&self) -> BackendType {
        BackendType::QBittorrent
    }

    async fn check_connection(&self) -> Result<(), TorrentClientError> {
        let response = self
            .transport
            .execute(&RpcRequest::get("/api/v2/app/version"))
            .await?;
        debug!(client = %self.config.name, version = %response.body.trim(), "qBittorrent reachable");
        Ok(())
    }

    async fn try_add_torrent(
        &self,
        source: TorrentSource,
        options: &AddTorrentOptions,
    ) -> Result<(), TorrentClientError> {
        let mut fields = Vec::new();
        match source
            .resolve(options.local_download, self.transport.http())
            .await?
        {
            ResolvedSource::Link(url) => fields.push(MultipartField::text("urls", url)),
            ResolvedSource::Metainfo { data, filename } => fields.push(MultipartField::File {
                name: "torrents".to_string(),
                filename: filename.unwrap_or_else(|| "torrent.torrent".to_string()),
                mime: "application/x-bittorrent".to_string(),
                data,
            }),
        }
        if let Some(path) = &options.save_path {
            fields.push(MultipartField::text("savepath", path.clone()));
        }
        if let Some(label) = &options.label {
            fields.push(MultipartField::text("category", label.clone()));
        }
        if options.add_at_paused {
            // v4 reads `paused`, v5 reads `stopped`.
            fields.push(MultipartField::text("paused", "true"));
            fields.push(MultipartField::text("stopped", "true"));
        }

        let response = self
            .transport
            .execute(&RpcRequest::post(
                "/api/v2/torrents/add",
                Payload::Multipart(fields),
            ))
            .await?;

        if add_accepted(&response.body) {
            Ok(())
        } else {
            Err(TorrentClientError::backend(format!(
                "torrent rejected: {}",
                truncate(response.body.trim())
            )))
        }
    }

    async fn get_torrents_by(
        &self,
        filter: &TorrentFilterRules,
    ) -> Result<Vec<TorrentTask>, TorrentClientError> {
        let mut request = RpcRequest::get("/api/v2/torrents/info");
        match &filter.ids {
            Some(TaskSelector::Ids(ids)) if ids.is_empty() => return Ok(Vec::new()),
            Some(TaskSelector::Ids(ids)) => {
                let hashes: Vec<String> = ids.iter().map(hash_of).collect();
                request = request.with_query("hashes", hashes.join("|"));
            }
            Some(TaskSelector::RecentlyActive) => {
                request = request.with_query("filter", "active");
            }
            None => {}
        }

        let torrents: Vec<QBTorrentInfo> = self.transport.execute(&request).await?.json()?;
        Ok(filter.apply(torrents.into_iter().map(QBTorrentInfo::into_task).collect()))
    }

    async fn try_pause_torrent(&self, id: &TaskId) -> Result<(), TorrentClientError> {
        self.hash_action("/api/v2/torrents/pause", "/api/v2/torrents/stop", id)
            .await
    }

    async fn try_resume_torrent(&self, id: &TaskId) -> Result<(), TorrentClientError> {
        self.hash_action("/api/v2/torrents/resume", "/api/v2/torrents/start", id)
            .await
    }

    async fn try_remove_torrent(
        &self,
        id: &TaskId,
        delete_data: bool,
    ) -> Result<(), TorrentClientError> {
        // Unknown hashes are ignored by qBittorrent, so a repeat is a no-op.
        self.post_form(
            "/api/v2/torrents/delete",
            &[
                ("hashes", hash_of(id)),
                ("deleteFiles", delete_data.to_string()),
            ],
        )
        .await
        .map(|_| ())
    }
}
