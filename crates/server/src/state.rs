use btbridge_core::{
    ClientConfig, ClientRegistry, Config, SanitizedConfig, SharedClient, TorrentClientError,
};
use uuid::Uuid;

/// Shared application state: the client records and the adapters built from them.
pub struct AppState {
    config: Config,
    registry: ClientRegistry,
}

impl AppState {
    pub fn new(config: Config, registry: ClientRegistry) -> Self {
        Self { config, registry }
    }

    pub fn sanitized_config(&self) -> SanitizedConfig {
        SanitizedConfig::from(&self.config)
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }

    pub fn client_count(&self) -> usize {
        self.config.clients.len()
    }

    pub fn client_config(&self, uuid: &Uuid) -> Option<&ClientConfig> {
        self.config.client(uuid)
    }

    /// Adapter for a configured client, `None` when the uuid is not configured.
    pub async fn client(&self, uuid: &Uuid) -> Option<Result<SharedClient, TorrentClientError>> {
        let config = self.client_config(uuid)?;
        Some(self.registry.get_or_create(config).await)
    }
}
