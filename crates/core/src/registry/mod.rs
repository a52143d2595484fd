//! Backend type discrimination, capability metadata and adapter instances.

mod metadata;

pub use metadata::*;

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::ClientConfig;
use crate::torrent_client::{
    deluge, qbittorrent, transmission, DelugeClient, QBittorrentClient, TorrentClient,
    TorrentClientError, TransmissionClient,
};

/// Shared handle to an adapter.
pub type SharedClient = Arc<dyn TorrentClient>;

/// Supported torrent daemons.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BackendType {
    #[serde(rename = "Transmission")]
    Transmission,
    #[serde(rename = "qBittorrent")]
    QBittorrent,
    #[serde(rename = "Deluge")]
    Deluge,
}

impl BackendType {
    pub const ALL: [BackendType; 3] = [
        BackendType::Transmission,
        BackendType::QBittorrent,
        BackendType::Deluge,
    ];

    /// Discriminator as written in client configs.
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendType::Transmission => "Transmission",
            BackendType::QBittorrent => "qBittorrent",
            BackendType::Deluge => "Deluge",
        }
    }

    /// Static capability descriptor.
    pub fn metadata(&self) -> &'static ClientMetadata {
        match self {
            BackendType::Transmission => &transmission::METADATA,
            BackendType::QBittorrent => &qbittorrent::METADATA,
            BackendType::Deluge => &deluge::METADATA,
        }
    }
}

impl fmt::Display for BackendType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendType {
    type Err = TorrentClientError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        BackendType::ALL
            .into_iter()
            .find(|b| b.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| TorrentClientError::UnknownBackendType(s.to_string()))
    }
}

impl ClientConfig {
    /// A new client definition pre-filled with the backend's defaults.
    pub fn with_defaults(backend: BackendType) -> Self {
        let metadata = backend.metadata();
        Self {
            client_type: backend.as_str().to_string(),
            name: backend.as_str().to_string(),
            uuid: Uuid::new_v4(),
            address: metadata.default_address.to_string(),
            username: String::new(),
            password: String::new(),
            timeout: metadata.default_timeout_ms,
        }
    }

    /// Parsed backend discriminator.
    pub fn backend(&self) -> Result<BackendType, TorrentClientError> {
        self.client_type.parse()
    }
}

struct CachedClient {
    config: ClientConfig,
    client: SharedClient,
}

/// Adapter instances keyed by client uuid, owned by the application.
///
/// Each config identity gets one adapter (and so one session). Passing an
/// edited config replaces the cached adapter.
#[derive(Default)]
pub struct ClientRegistry {
    instances: RwLock<HashMap<Uuid, CachedClient>>,
}

impl ClientRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a new adapter for `config`. Performs no network I/O.
    pub fn create(config: &ClientConfig) -> Result<SharedClient, TorrentClientError> {
        let client: SharedClient = match config.backend()? {
            BackendType::Transmission => Arc::new(TransmissionClient::new(config.clone())?),
            BackendType::QBittorrent => Arc::new(QBittorrentClient::new(config.clone())?),
            BackendType::Deluge => Arc::new(DelugeClient::new(config.clone())?),
        };
        Ok(client)
    }

    /// Capability descriptor for a discriminator.
    pub fn describe(client_type: &str) -> Result<&'static ClientMetadata, TorrentClientError> {
        Ok(client_type.parse::<BackendType>()?.metadata())
    }

    /// Every registered backend's descriptor.
    pub fn backends() -> Vec<&'static ClientMetadata> {
        BackendType::ALL.iter().map(|b| b.metadata()).collect()
    }

    /// Cached adapter for `config`, constructing it on first use or when the
    /// config changed since it was cached.
    pub async fn get_or_create(
        &self,
        config: &ClientConfig,
    ) -> Result<SharedClient, TorrentClientError> {
        if let Some(cached) = self.instances.read().await.get(&config.uuid) {
            if cached.config == *config {
                return Ok(Arc::clone(&cached.client));
            }
        }

        let client = Self::create(config)?;
        let mut instances = self.instances.write().await;
        // Another caller may have built one for the same config meanwhile.
        if let Some(cached) = instances.get(&config.uuid) {
            if cached.config == *config {
                return Ok(Arc::clone(&cached.client));
            }
        }

        info!(client = %config.name, backend = %config.client_type, uuid = %config.uuid, "Created torrent client");
        instances.insert(
            config.uuid,
            CachedClient {
                config: config.clone(),
                client: Arc::clone(&client),
            },
        );
        Ok(client)
    }

    /// Register a prebuilt adapter under `config`'s identity.
    pub async fn insert(&self, config: ClientConfig, client: SharedClient) {
        self.instances
            .write()
            .await
            .insert(config.uuid, CachedClient { config, client });
    }

    /// Cached adapter by uuid.
    pub async fn get(&self, uuid: &Uuid) -> Option<SharedClient> {
        self.instances
            .read()
            .await
            .get(uuid)
            .map(|c| Arc::clone(&c.client))
    }

    /// Config a cached adapter was built from.
    pub async fn config(&self, uuid: &Uuid) -> Option<ClientConfig> {
        self.instances
            .read()
            .await
            .get(uuid)
            .map(|c| c.config.clone())
    }

    /// Drop the adapter for `uuid`. Returns whether one was cached.
    pub async fn dispose(&self, uuid: &Uuid) -> bool {
        let removed = self.instances.write().await.remove(uuid).is_some();
        if removed {
            debug!(uuid = %uuid, "Disposed torrent client");
        }
        removed
    }

    pub async fn clear(&self) {
        self.instances.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.instances.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.instances.read().await.is_empty()
    }

    /// Ping every cached adapter concurrently.
    pub async fn ping_all(&self) -> Vec<(Uuid, bool)> {
        let clients: Vec<(Uuid, SharedClient)> = self
            .instances
            .read()
            .await
            .iter()
            .map(|(uuid, c)| (*uuid, Arc::clone(&c.client)))
            .collect();

        join_all(clients.into_iter().map(|(uuid, client)| async move {
            (uuid, client.ping().await)
        }))
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockTorrentClient;

    #[test]
    fn test_backend_type_parsing() {
        assert_eq!("Transmission".parse::<BackendType>().unwrap(), BackendType::Transmission);
        assert_eq!("qbittorrent".parse::<BackendType>().unwrap(), BackendType::QBittorrent);
        assert_eq!(" DELUGE ".parse::<BackendType>().unwrap(), BackendType::Deluge);
        assert!(matches!(
            "rTorrent".parse::<BackendType>(),
            Err(TorrentClientError::UnknownBackendType(_))
        ));
    }

    #[test]
    fn test_backend_type_serde_matches_discriminator() {
        for backend in BackendType::ALL {
            let json = serde_json::to_string(&backend).unwrap();
            assert_eq!(json, format!("\"{}\"", backend.as_str()));
        }
    }

    #[test]
    fn test_describe_without_io() {
        let meta = ClientRegistry::describe("Transmission").unwrap();
        assert_eq!(meta.backend, BackendType::Transmission);
        assert!(meta.features.custom_path);
        assert!(meta.requires("address"));

        assert!(matches!(
            ClientRegistry::describe("Synology"),
            Err(TorrentClientError::UnknownBackendType(_))
        ));
    }

    #[test]
    fn test_backends_lists_every_type() {
        let backends: Vec<_> = ClientRegistry::backends().iter().map(|m| m.backend).collect();
        assert_eq!(backends, BackendType::ALL.to_vec());
    }

    #[test]
    fn test_with_defaults() {
        let config = ClientConfig::with_defaults(BackendType::Transmission);
        assert_eq!(config.client_type, "Transmission");
        assert_eq!(config.address, "http://localhost:9091/");
        assert_eq!(config.timeout, 60_000);
        assert_ne!(
            config.uuid,
            ClientConfig::with_defaults(BackendType::Transmission).uuid
        );
    }

    #[test]
    fn test_create_unknown_type_fails() {
        let mut config = ClientConfig::with_defaults(BackendType::Deluge);
        config.client_type = "uTorrent".to_string();
        assert!(matches!(
            ClientRegistry::create(&config),
            Err(TorrentClientError::UnknownBackendType(_))
        ));
    }

    #[test]
    fn test_create_each_backend() {
        for backend in BackendType::ALL {
            let config = ClientConfig::with_defaults(backend);
            let client = ClientRegistry::create(&config).unwrap();
            assert_eq!(client.backend(), backend);
            assert_eq!(client.config(), &config);
        }
    }

    #[tokio::test]
    async fn test_get_or_create_reuses_instance() {
        let registry = ClientRegistry::new();
        let config = ClientConfig::with_defaults(BackendType::QBittorrent);

        let a = registry.get_or_create(&config).await.unwrap();
        let b = registry.get_or_create(&config).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test]
    async fn test_get_or_create_rebuilds_on_config_change() {
        let registry = ClientRegistry::new();
        let config = ClientConfig::with_defaults(BackendType::Transmission);
        let a = registry.get_or_create(&config).await.unwrap();

        let mut edited = config.clone();
        edited.address = "http://seedbox:9091/".to_string();
        let b = registry.get_or_create(&edited).await.unwrap();

        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len().await, 1);
        assert_eq!(registry.config(&config.uuid).await.unwrap().address, edited.address);
    }

    #[tokio::test]
    async fn test_dispose() {
        let registry = ClientRegistry::new();
        let config = ClientConfig::with_defaults(BackendType::Deluge);
        registry.get_or_create(&config).await.unwrap();

        assert!(registry.dispose(&config.uuid).await);
        assert!(!registry.dispose(&config.uuid).await);
        assert!(registry.get(&config.uuid).await.is_none());
        assert!(registry.is_empty().await);
    }

    #[test]
    fn test_ping_all_with_injected_client() {
        tokio_test::block_on(async {
            let registry = ClientRegistry::new();
            let config = ClientConfig::with_defaults(BackendType::Transmission);
            let mock = Arc::new(MockTorrentClient::new(config.clone()));
            registry.insert(config.clone(), mock).await;

            let results = registry.ping_all().await;
            assert_eq!(results, vec![(config.uuid, true)]);
        });
    }
}
