//! Mock torrent client for testing.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::config::ClientConfig;
use crate::registry::BackendType;
use crate::torrent_client::{
    AddTorrentOptions, TaskId, TaskSelector, TorrentClient, TorrentClientError,
    TorrentFilterRules, TorrentSource, TorrentState, TorrentTask,
};

/// A recorded torrent addition for test assertions.
#[derive(Debug, Clone)]
pub struct RecordedAddTorrent {
    pub source: TorrentSource,
    pub options: AddTorrentOptions,
    /// When the request was made.
    pub timestamp: chrono::DateTime<Utc>,
}

/// In-memory implementation of the TorrentClient trait.
///
/// Provides controllable behavior for testing:
/// - Track added torrents for assertions
/// - Control task progress/state
/// - Simulate failures and an unreachable daemon
///
/// Pause, resume and remove of unknown ids succeed, as the real daemons do.
///
/// # Example
///
/// ```rust,ignore
/// let client = MockTorrentClient::new(ClientConfig::with_defaults(BackendType::Transmission));
///
/// assert!(client.add_torrent(TorrentSource::url("magnet:?xt=urn:btih:abc"), &Default::default()).await);
/// let task = client.get_all_torrents().await?.remove(0);
///
/// client.set_progress(&task.id, 1.0).await;
/// assert!(client.get_torrent(&task.id).await?.is_completed);
/// ```
#[derive(Debug)]
pub struct MockTorrentClient {
    config: ClientConfig,
    backend: BackendType,
    /// Recorded add_torrent calls.
    added: Arc<RwLock<Vec<RecordedAddTorrent>>>,
    /// Current tasks in insertion order.
    tasks: Arc<RwLock<Vec<TorrentTask>>>,
    /// If set, the next operation will fail with this error.
    next_error: Arc<RwLock<Option<TorrentClientError>>>,
    online: AtomicBool,
    id_counter: AtomicI64,
}

impl MockTorrentClient {
    /// Create a new mock client for `config`. Unknown backend types act as
    /// Transmission.
    pub fn new(config: ClientConfig) -> Self {
        let backend = config.backend().unwrap_or(BackendType::Transmission);
        Self {
            config,
            backend,
            added: Arc::new(RwLock::new(Vec::new())),
            tasks: Arc::new(RwLock::new(Vec::new())),
            next_error: Arc::new(RwLock::new(None)),
            online: AtomicBool::new(true),
            id_counter: AtomicI64::new(0),
        }
    }

    /// Get all recorded add_torrent calls.
    pub async fn added_torrents(&self) -> Vec<RecordedAddTorrent> {
        self.added.read().await.clone()
    }

    /// Clear recorded add_torrent calls.
    pub async fn clear_recorded(&self) {
        self.added.write().await.clear();
    }

    /// Pre-populate a task (for testing get/list operations).
    pub async fn add_mock_task(&self, task: TorrentTask) {
        self.tasks.write().await.push(task);
    }

    /// Set the progress for a task (0.0 to 1.0).
    ///
    /// When progress reaches 1.0 the task completes and starts seeding.
    pub async fn set_progress(&self, id: &TaskId, progress: f64) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.iter_mut().find(|t| &t.id == id) {
            let progress = progress.clamp(0.0, 1.0);
            task.progress = progress;
            task.total_downloaded = (task.total_size as f64 * progress) as u64;
            task.is_completed = progress >= 1.0;
            if task.is_completed && task.state == TorrentState::Downloading {
                task.state = TorrentState::Seeding;
            }
        }
    }

    /// Set the state for a task directly.
    pub async fn set_state(&self, id: &TaskId, state: TorrentState) {
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.iter_mut().find(|t| &t.id == id) {
            task.state = state;
        }
    }

    /// Configure the next operation to fail with the given error.
    pub async fn set_next_error(&self, error: TorrentClientError) {
        *self.next_error.write().await = Some(error);
    }

    /// Clear any pending error.
    pub async fn clear_next_error(&self) {
        *self.next_error.write().await = None;
    }

    /// Simulate the daemon going away or coming back.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Get the number of tasks.
    pub async fn task_count(&self) -> usize {
        self.tasks.read().await.len()
    }

    /// Fail with the injected error, or a network error while offline.
    async fn check_available(&self) -> Result<(), TorrentClientError> {
        if let Some(err) = self.next_error.write().await.take() {
            return Err(err);
        }
        if !self.online.load(Ordering::SeqCst) {
            return Err(TorrentClientError::Network(format!(
                "{} is offline",
                self.config.name
            )));
        }
        Ok(())
    }

    fn new_task(&self, source: &TorrentSource, options: &AddTorrentOptions) -> TorrentTask {
        let id = self.id_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let info_hash = match source {
            TorrentSource::Url(url) => extract_hash_from_magnet(url),
            TorrentSource::Metainfo { .. } => None,
        };
        let name = match source {
            TorrentSource::Metainfo {
                filename: Some(filename),
                ..
            } => filename.clone(),
            _ => format!("Mock Torrent {}", id),
        };

        TorrentTask {
            id: TaskId::Int(id),
            info_hash,
            name,
            progress: 0.0,
            is_completed: false,
            ratio: 0.0,
            date_added: Utc::now().timestamp(),
            save_path: options
                .save_path
                .clone()
                .unwrap_or_else(|| "/mock/downloads".to_string()),
            label: options.label.clone(),
            state: if options.add_at_paused {
                TorrentState::Paused
            } else {
                TorrentState::Downloading
            },
            total_size: 100 * 1024 * 1024,
            upload_speed: 0,
            download_speed: 0,
            total_uploaded: 0,
            total_downloaded: 0,
        }
    }
}

/// Extract info hash from a magnet URI.
fn extract_hash_from_magnet(magnet: &str) -> Option<String> {
    let (_, query) = magnet.strip_prefix("magnet:")?.split_once('?')?;
    query
        .split('&')
        .find_map(|param| param.strip_prefix("xt=urn:btih:"))
        .map(str::to_lowercase)
}

#[async_trait]
impl TorrentClient for MockTorrentClient {
    fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn backend(&self) -> BackendType {
        self.backend
    }

    async fn check_connection(&self) -> Result<(), TorrentClientError> {
        self.check_available().await
    }

    async fn try_add_torrent(
        &self,
        source: TorrentSource,
        options: &AddTorrentOptions,
    ) -> Result<(), TorrentClientError> {
        self.check_available().await?;

        if options.local_download && source.is_magnet() {
            return Err(TorrentClientError::InvalidTorrent(
                "magnet links cannot be downloaded locally".to_string(),
            ));
        }

        let task = self.new_task(&source, options);
        self.added.write().await.push(RecordedAddTorrent {
            source,
            options: options.clone(),
            timestamp: Utc::now(),
        });
        self.tasks.write().await.push(task);
        Ok(())
    }

    async fn get_torrents_by(
        &self,
        filter: &TorrentFilterRules,
    ) -> Result<Vec<TorrentTask>, TorrentClientError> {
        self.check_available().await?;

        let tasks = self.tasks.read().await;
        let selected: Vec<TorrentTask> = match &filter.ids {
            Some(TaskSelector::Ids(ids)) => tasks
                .iter()
                .filter(|t| ids.contains(&t.id))
                .cloned()
                .collect(),
            Some(TaskSelector::RecentlyActive) => tasks
                .iter()
                .filter(|t| t.upload_speed > 0 || t.download_speed > 0)
                .cloned()
                .collect(),
            None => tasks.clone(),
        };
        Ok(filter.apply(selected))
    }

    async fn try_pause_torrent(&self, id: &TaskId) -> Result<(), TorrentClientError> {
        self.check_available().await?;
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.iter_mut().find(|t| &t.id == id) {
            task.state = TorrentState::Paused;
            task.download_speed = 0;
            task.upload_speed = 0;
        }
        Ok(())
    }

    async fn try_resume_torrent(&self, id: &TaskId) -> Result<(), TorrentClientError> {
        self.check_available().await?;
        let mut tasks = self.tasks.write().await;
        if let Some(task) = tasks.iter_mut().find(|t| &t.id == id) {
            task.state = if task.is_completed {
                TorrentState::Seeding
            } else {
                TorrentState::Downloading
            };
        }
        Ok(())
    }

    async fn try_remove_torrent(
        &self,
        id: &TaskId,
        _delete_data: bool,
    ) -> Result<(), TorrentClientError> {
        self.check_available().await?;
        self.tasks.write().await.retain(|t| &t.id != id);
        Ok(())
    }
}
