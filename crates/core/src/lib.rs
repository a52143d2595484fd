pub mod config;
pub mod registry;
pub mod testing;
pub mod torrent_client;
pub mod transport;

pub use config::{
    load_config, load_config_from_str, validate_config, ClientConfig, Config, ConfigError,
    SanitizedConfig,
};
pub use registry::{BackendType, ClientMetadata, ClientRegistry, SharedClient};
pub use torrent_client::{
    AddTorrentOptions, TaskId, TaskSelector, TorrentClient, TorrentClientError,
    TorrentFilterRules, TorrentSort, TorrentSortKey, TorrentSource, TorrentState, TorrentTask,
};
