//! Canonical types shared by every torrent client backend.

use std::cmp::Ordering;
use std::convert::Infallible;
use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::config::ClientConfig;
use crate::registry::BackendType;

/// Errors that can occur during torrent client operations.
#[derive(Debug, Error)]
pub enum TorrentClientError {
    #[error("Connection failed: {0}")]
    Network(String),

    #[error("Request timeout")]
    Timeout,

    #[error("Authentication rejected: {0}")]
    AuthRejected(String),

    #[error("Backend fault: {message}")]
    BackendFault {
        /// HTTP status, when the fault came from a non-success status.
        status: Option<u16>,
        /// Backend diagnostic (error string or truncated body).
        message: String,
    },

    #[error("Torrent not found: {0}")]
    NotFound(String),

    #[error("Unknown backend type: {0}")]
    UnknownBackendType(String),

    #[error("Invalid torrent data: {0}")]
    InvalidTorrent(String),

    #[error("Malformed backend response: {0}")]
    Decode(String),
}

impl TorrentClientError {
    /// Fault reported by the backend inside an otherwise successful reply.
    pub fn backend(message: impl Into<String>) -> Self {
        TorrentClientError::BackendFault {
            status: None,
            message: message.into(),
        }
    }
}

/// Backend-scoped task identifier.
///
/// Transmission uses integers, hash-addressed backends use the info hash.
/// Callers must treat it as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TaskId {
    Int(i64),
    Str(String),
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskId::Int(id) => write!(f, "{}", id),
            TaskId::Str(id) => f.write_str(id),
        }
    }
}

impl FromStr for TaskId {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.parse::<i64>() {
            Ok(id) => TaskId::Int(id),
            Err(_) => TaskId::Str(s.to_string()),
        })
    }
}

impl From<i64> for TaskId {
    fn from(id: i64) -> Self {
        TaskId::Int(id)
    }
}

impl From<&str> for TaskId {
    fn from(id: &str) -> Self {
        TaskId::Str(id.to_string())
    }
}

impl From<String> for TaskId {
    fn from(id: String) -> Self {
        TaskId::Str(id)
    }
}

/// State of a torrent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentState {
    /// State could not be determined from the backend's status.
    #[default]
    Unknown,
    /// Downloading from peers.
    Downloading,
    /// Seeding to peers.
    Seeding,
    /// Download or upload is paused.
    Paused,
    /// Checking file integrity.
    Checking,
    /// Queued for download or seeding.
    Queued,
}

impl TorrentState {
    /// Returns the string representation for API responses.
    pub fn as_str(&self) -> &'static str {
        match self {
            TorrentState::Unknown => "unknown",
            TorrentState::Downloading => "downloading",
            TorrentState::Seeding => "seeding",
            TorrentState::Paused => "paused",
            TorrentState::Checking => "checking",
            TorrentState::Queued => "queued",
        }
    }
}

/// A download/seed job, normalized across backends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TorrentTask {
    pub id: TaskId,
    /// Info hash (lowercase hex).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub info_hash: Option<String>,
    pub name: String,
    /// Fraction of the selected data downloaded (0.0 - 1.0).
    pub progress: f64,
    /// Derived from the backend's completion signal, not from `state`.
    pub is_completed: bool,
    pub ratio: f64,
    /// Epoch seconds.
    pub date_added: i64,
    pub save_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub state: TorrentState,
    pub total_size: u64,
    pub upload_speed: u64,
    pub download_speed: u64,
    pub total_uploaded: u64,
    pub total_downloaded: u64,
}

impl TorrentTask {
    /// `date_added` as a timestamp, if the backend reported one.
    pub fn added_at(&self) -> Option<DateTime<Utc>> {
        timestamp_to_datetime(self.date_added)
    }
}

/// Convert Unix timestamp to DateTime<Utc>.
pub(crate) fn timestamp_to_datetime(ts: i64) -> Option<DateTime<Utc>> {
    if ts > 0 {
        Utc.timestamp_opt(ts, 0).single()
    } else {
        None
    }
}

/// Where the torrent comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TorrentSource {
    /// An http(s) URL to a .torrent file, or a magnet link.
    Url(String),
    /// Raw .torrent bytes already fetched by the caller.
    Metainfo {
        data: Vec<u8>,
        /// Original filename (for logging and multipart uploads).
        filename: Option<String>,
    },
}

impl TorrentSource {
    pub fn url(url: impl Into<String>) -> Self {
        TorrentSource::Url(url.into())
    }

    pub fn metainfo(data: Vec<u8>) -> Self {
        TorrentSource::Metainfo {
            data,
            filename: None,
        }
    }

    pub fn is_magnet(&self) -> bool {
        matches!(self, TorrentSource::Url(url) if url.starts_with("magnet:"))
    }
}

/// Placement and behaviour hints for a new torrent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddTorrentOptions {
    /// Download directory override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub save_path: Option<String>,
    /// Label/category to assign.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    /// Add without starting.
    #[serde(default)]
    pub add_at_paused: bool,
    /// Fetch the .torrent here and upload its bytes instead of letting the
    /// backend fetch the URL.
    #[serde(default)]
    pub local_download: bool,
}

impl AddTorrentOptions {
    /// Set the download path.
    pub fn with_save_path(mut self, path: impl Into<String>) -> Self {
        self.save_path = Some(path.into());
        self
    }

    /// Set the label.
    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    /// Set whether to start paused.
    pub fn with_paused(mut self, paused: bool) -> Self {
        self.add_at_paused = paused;
        self
    }

    /// Set whether the torrent file is fetched locally.
    pub fn with_local_download(mut self, local: bool) -> Self {
        self.local_download = local;
        self
    }
}

/// Which tasks a query addresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskSelector {
    /// Explicit identifiers.
    Ids(Vec<TaskId>),
    /// Tasks with recent activity, as defined by the backend.
    RecentlyActive,
}

/// Key for client-side ordering of query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorrentSortKey {
    Name,
    DateAdded,
    Progress,
    Ratio,
    TotalSize,
    UploadSpeed,
    DownloadSpeed,
}

impl TorrentSortKey {
    fn compare(&self, a: &TorrentTask, b: &TorrentTask) -> Ordering {
        match self {
            TorrentSortKey::Name => a.name.cmp(&b.name),
            TorrentSortKey::DateAdded => a.date_added.cmp(&b.date_added),
            TorrentSortKey::Progress => a.progress.total_cmp(&b.progress),
            TorrentSortKey::Ratio => a.ratio.total_cmp(&b.ratio),
            TorrentSortKey::TotalSize => a.total_size.cmp(&b.total_size),
            TorrentSortKey::UploadSpeed => a.upload_speed.cmp(&b.upload_speed),
            TorrentSortKey::DownloadSpeed => a.download_speed.cmp(&b.download_speed),
        }
    }
}

/// Single-key sort request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentSort {
    pub key: TorrentSortKey,
    #[serde(default)]
    pub descending: bool,
}

/// Query for listing torrents. Rules combine with AND; a `None` field places
/// no constraint.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TorrentFilterRules {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ids: Option<TaskSelector>,
    /// `Some(true)` keeps completed tasks, `Some(false)` keeps incomplete ones.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub complete: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort: Option<TorrentSort>,
}

impl TorrentFilterRules {
    /// Rules matching a single task.
    pub fn by_id(id: TaskId) -> Self {
        Self {
            ids: Some(TaskSelector::Ids(vec![id])),
            ..Default::default()
        }
    }

    pub fn with_complete(mut self, complete: bool) -> Self {
        self.complete = Some(complete);
        self
    }

    pub fn with_sort(mut self, key: TorrentSortKey, descending: bool) -> Self {
        self.sort = Some(TorrentSort { key, descending });
        self
    }

    /// Check if any rules are set.
    pub fn is_empty(&self) -> bool {
        self.ids.is_none() && self.complete.is_none() && self.sort.is_none()
    }

    /// Apply the client-side part of the rules (completion and ordering) to
    /// already mapped tasks.
    pub fn apply(&self, mut tasks: Vec<TorrentTask>) -> Vec<TorrentTask> {
        if let Some(complete) = self.complete {
            tasks.retain(|t| t.is_completed == complete);
        }

        if let Some(sort) = self.sort {
            tasks.sort_by(|a, b| {
                let ord = sort.key.compare(a, b);
                if sort.descending {
                    ord.reverse()
                } else {
                    ord
                }
            });
        }

        tasks
    }
}

/// Unified contract every backend adapter implements.
///
/// Adapters implement the fallible `try_*`/query methods; the boolean
/// convenience methods are provided on top of them and report only whether
/// the action completed, logging the reason when it did not.
#[async_trait]
pub trait TorrentClient: Send + Sync {
    /// Configuration this adapter was built from.
    fn config(&self) -> &ClientConfig;

    /// Backend kind.
    fn backend(&self) -> BackendType;

    /// Display name for logging.
    fn name(&self) -> &str {
        &self.config().name
    }

    /// Verify the backend is reachable and accepts our credentials.
    async fn check_connection(&self) -> Result<(), TorrentClientError>;

    /// Add a torrent, reporting why it failed.
    async fn try_add_torrent(
        &self,
        source: TorrentSource,
        options: &AddTorrentOptions,
    ) -> Result<(), TorrentClientError>;

    /// List torrents matching `filter`.
    async fn get_torrents_by(
        &self,
        filter: &TorrentFilterRules,
    ) -> Result<Vec<TorrentTask>, TorrentClientError>;

    async fn try_pause_torrent(&self, id: &TaskId) -> Result<(), TorrentClientError>;

    async fn try_resume_torrent(&self, id: &TaskId) -> Result<(), TorrentClientError>;

    /// Remove a torrent. If `delete_data` is true, also delete downloaded files.
    async fn try_remove_torrent(
        &self,
        id: &TaskId,
        delete_data: bool,
    ) -> Result<(), TorrentClientError>;

    /// Best-effort liveness check.
    async fn ping(&self) -> bool {
        completed(self.name(), "ping", self.check_connection().await)
    }

    /// Add a torrent. `false` covers rejection and unreachability alike.
    async fn add_torrent(&self, source: TorrentSource, options: &AddTorrentOptions) -> bool {
        completed(
            self.name(),
            "add_torrent",
            self.try_add_torrent(source, options).await,
        )
    }

    async fn get_all_torrents(&self) -> Result<Vec<TorrentTask>, TorrentClientError> {
        self.get_torrents_by(&TorrentFilterRules::default()).await
    }

    async fn get_torrent(&self, id: &TaskId) -> Result<TorrentTask, TorrentClientError> {
        self.get_torrents_by(&TorrentFilterRules::by_id(id.clone()))
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| TorrentClientError::NotFound(id.to_string()))
    }

    async fn pause_torrent(&self, id: &TaskId) -> bool {
        completed(self.name(), "pause_torrent", self.try_pause_torrent(id).await)
    }

    async fn resume_torrent(&self, id: &TaskId) -> bool {
        completed(self.name(), "resume_torrent", self.try_resume_torrent(id).await)
    }

    async fn remove_torrent(&self, id: &TaskId, delete_data: bool) -> bool {
        completed(
            self.name(),
            "remove_torrent",
            self.try_remove_torrent(id, delete_data).await,
        )
    }
}

fn completed(client: &str, operation: &str, result: Result<(), TorrentClientError>) -> bool {
    match result {
        Ok(()) => true,
        Err(e) => {
            warn!(client = client, operation = operation, error = %e, "Torrent client action did not complete");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: i64, name: &str, completed: bool, size: u64) -> TorrentTask {
        TorrentTask {
            id: TaskId::Int(id),
            info_hash: None,
            name: name.to_string(),
            progress: if completed { 1.0 } else { 0.5 },
            is_completed: completed,
            ratio: 0.0,
            date_added: 1_700_000_000 + id,
            save_path: "/downloads".to_string(),
            label: None,
            state: TorrentState::Downloading,
            total_size: size,
            upload_speed: 0,
            download_speed: 0,
            total_uploaded: 0,
            total_downloaded: 0,
        }
    }

    #[test]
    fn test_torrent_state_as_str() {
        assert_eq!(TorrentState::Unknown.as_str(), "unknown");
        assert_eq!(TorrentState::Downloading.as_str(), "downloading");
        assert_eq!(TorrentState::Seeding.as_str(), "seeding");
        assert_eq!(TorrentState::Paused.as_str(), "paused");
        assert_eq!(TorrentState::Checking.as_str(), "checking");
        assert_eq!(TorrentState::Queued.as_str(), "queued");
    }

    #[test]
    fn test_torrent_state_serialization() {
        assert_eq!(
            serde_json::to_string(&TorrentState::Seeding).unwrap(),
            "\"seeding\""
        );
        assert_eq!(TorrentState::default(), TorrentState::Unknown);
    }

    #[test]
    fn test_task_id_parsing_and_serde() {
        assert_eq!("42".parse::<TaskId>().unwrap(), TaskId::Int(42));
        assert_eq!(
            "abc123".parse::<TaskId>().unwrap(),
            TaskId::Str("abc123".to_string())
        );
        assert_eq!(serde_json::to_string(&TaskId::Int(7)).unwrap(), "7");
        assert_eq!(
            serde_json::from_str::<TaskId>("\"deadbeef\"").unwrap(),
            TaskId::from("deadbeef")
        );
        assert_eq!(TaskId::Int(3).to_string(), "3");
    }

    #[test]
    fn test_torrent_task_serializes_camel_case() {
        let json = serde_json::to_value(task(1, "a", true, 10)).unwrap();
        assert_eq!(json["isCompleted"], true);
        assert_eq!(json["dateAdded"], 1_700_000_001i64);
        assert_eq!(json["state"], "downloading");
        assert!(json.get("infoHash").is_none());
        assert!(json.get("label").is_none());
    }

    #[test]
    fn test_added_at() {
        assert!(task(1, "a", false, 1).added_at().is_some());
        let mut t = task(1, "a", false, 1);
        t.date_added = 0;
        assert!(t.added_at().is_none());
    }

    #[test]
    fn test_add_torrent_options_builder() {
        let options = AddTorrentOptions::default()
            .with_save_path("/downloads")
            .with_label("movies")
            .with_paused(true)
            .with_local_download(true);

        assert_eq!(options.save_path.as_deref(), Some("/downloads"));
        assert_eq!(options.label.as_deref(), Some("movies"));
        assert!(options.add_at_paused);
        assert!(options.local_download);
    }

    #[test]
    fn test_add_torrent_options_deserialize_defaults() {
        let options: AddTorrentOptions = serde_json::from_str(r#"{"label":"tv"}"#).unwrap();
        assert_eq!(options.label.as_deref(), Some("tv"));
        assert!(!options.add_at_paused);
        assert!(!options.local_download);
    }

    #[test]
    fn test_torrent_source_is_magnet() {
        assert!(TorrentSource::url("magnet:?xt=urn:btih:abc").is_magnet());
        assert!(!TorrentSource::url("https://example.com/a.torrent").is_magnet());
        assert!(!TorrentSource::metainfo(vec![1, 2, 3]).is_magnet());
    }

    #[test]
    fn test_filter_rules_is_empty() {
        assert!(TorrentFilterRules::default().is_empty());
        assert!(!TorrentFilterRules::by_id(TaskId::Int(1)).is_empty());
        assert!(!TorrentFilterRules::default().with_complete(false).is_empty());
    }

    #[test]
    fn test_filter_complete_true_keeps_completed_only() {
        let tasks = vec![task(1, "a", true, 1), task(2, "b", false, 1), task(3, "c", true, 1)];
        let out = TorrentFilterRules::default().with_complete(true).apply(tasks);
        let ids: Vec<_> = out.iter().map(|t| t.id.clone()).collect();
        assert_eq!(ids, vec![TaskId::Int(1), TaskId::Int(3)]);
    }

    #[test]
    fn test_filter_complete_false_keeps_incomplete_only() {
        let tasks = vec![task(1, "a", true, 1), task(2, "b", false, 1)];
        let out = TorrentFilterRules::default().with_complete(false).apply(tasks);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].id, TaskId::Int(2));
    }

    #[test]
    fn test_filter_without_rules_keeps_order() {
        let tasks = vec![task(3, "c", true, 1), task(1, "a", false, 1)];
        let out = TorrentFilterRules::default().apply(tasks.clone());
        assert_eq!(out, tasks);
    }

    #[test]
    fn test_sort_is_stable() {
        let tasks = vec![
            task(1, "x", false, 200),
            task(2, "y", false, 100),
            task(3, "z", false, 200),
            task(4, "w", false, 100),
        ];
        let out = TorrentFilterRules::default()
            .with_sort(TorrentSortKey::TotalSize, false)
            .apply(tasks);
        let ids: Vec<_> = out.iter().map(|t| t.id.to_string()).collect();
        assert_eq!(ids, vec!["2", "4", "1", "3"]);
    }

    #[test]
    fn test_sort_descending_by_name() {
        let tasks = vec![task(1, "alpha", false, 1), task(2, "gamma", false, 1), task(3, "beta", false, 1)];
        let out = TorrentFilterRules::default()
            .with_sort(TorrentSortKey::Name, true)
            .apply(tasks);
        let names: Vec<_> = out.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(names, vec!["gamma", "beta", "alpha"]);
    }

    #[test]
    fn test_filter_rules_deserialize() {
        let rules: TorrentFilterRules =
            serde_json::from_str(r#"{"ids":{"ids":[1,"abc"]},"complete":true}"#).unwrap();
        assert_eq!(
            rules.ids,
            Some(TaskSelector::Ids(vec![TaskId::Int(1), TaskId::from("abc")]))
        );
        assert_eq!(rules.complete, Some(true));

        let rules: TorrentFilterRules =
            serde_json::from_str(r#"{"ids":"recently_active"}"#).unwrap();
        assert_eq!(rules.ids, Some(TaskSelector::RecentlyActive));
    }
}
