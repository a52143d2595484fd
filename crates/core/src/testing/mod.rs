//! Testing utilities and mock implementations.
//!
//! Provides an in-memory `TorrentClient` so code built on the registry can be
//! exercised without a running daemon.
//!
//! # Example
//!
//! ```rust,ignore
//! use btbridge_core::testing::MockTorrentClient;
//!
//! let config = ClientConfig::with_defaults(BackendType::Transmission);
//! let mock = Arc::new(MockTorrentClient::new(config.clone()));
//! registry.insert(config, mock.clone()).await;
//!
//! mock.set_online(false);
//! assert!(!registry.get(&uuid).await.unwrap().ping().await);
//! ```

mod mock_torrent_client;

pub use mock_torrent_client::{MockTorrentClient, RecordedAddTorrent};

/// Test fixtures and helper functions.
pub mod fixtures {
    use crate::torrent_client::{TaskId, TorrentState, TorrentTask};

    /// Create a test task with reasonable defaults.
    pub fn task(id: impl Into<TaskId>, name: &str) -> TorrentTask {
        TorrentTask {
            id: id.into(),
            info_hash: None,
            name: name.to_string(),
            progress: 0.0,
            is_completed: false,
            ratio: 0.0,
            date_added: 1_700_000_000,
            save_path: "/downloads".to_string(),
            label: None,
            state: TorrentState::Downloading,
            total_size: 1024 * 1024 * 100, // 100 MB
            upload_speed: 0,
            download_speed: 0,
            total_uploaded: 0,
            total_downloaded: 0,
        }
    }

    /// Create a finished, seeding task.
    pub fn completed_task(id: impl Into<TaskId>, name: &str) -> TorrentTask {
        TorrentTask {
            progress: 1.0,
            is_completed: true,
            state: TorrentState::Seeding,
            total_downloaded: 1024 * 1024 * 100,
            ..task(id, name)
        }
    }
}
