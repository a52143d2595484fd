use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::time::Duration;
use uuid::Uuid;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    /// Torrent daemons managed by this instance.
    #[serde(default)]
    pub clients: Vec<ClientConfig>,
}

impl Config {
    /// Look up a client definition by its stable identity.
    pub fn client(&self, uuid: &Uuid) -> Option<&ClientConfig> {
        self.clients.iter().find(|c| &c.uuid == uuid)
    }
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8080
}

/// Identity and connection data for one torrent daemon.
///
/// Adapters treat this as read-only; editing a client means building a new
/// adapter from the edited record.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClientConfig {
    /// Backend discriminator ("Transmission", "qBittorrent", "Deluge").
    #[serde(rename = "type")]
    pub client_type: String,
    /// Display name.
    pub name: String,
    /// Stable identity across edits.
    pub uuid: Uuid,
    /// Base URL of the daemon's web/RPC interface.
    pub address: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    /// Request timeout in milliseconds.
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,
}

impl ClientConfig {
    /// Request timeout as a `Duration`.
    pub fn timeout_duration(&self) -> Duration {
        Duration::from_millis(self.timeout)
    }

    /// Whether any credential was configured.
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() || !self.password.is_empty()
    }
}

pub(crate) fn default_timeout_ms() -> u64 {
    60_000
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub clients: Vec<SanitizedClientConfig>,
}

/// Client config with the password hidden.
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedClientConfig {
    #[serde(rename = "type")]
    pub client_type: String,
    pub name: String,
    pub uuid: Uuid,
    pub address: String,
    pub username: String,
    pub password_configured: bool,
    pub timeout: u64,
}

impl From<&ClientConfig> for SanitizedClientConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            client_type: config.client_type.clone(),
            name: config.name.clone(),
            uuid: config.uuid,
            address: config.address.clone(),
            username: config.username.clone(),
            password_configured: !config.password.is_empty(),
            timeout: config.timeout,
        }
    }
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            clients: config.clients.iter().map(SanitizedClientConfig::from).collect(),
        }
    }
}
