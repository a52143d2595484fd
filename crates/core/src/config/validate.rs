use std::collections::HashSet;

use reqwest::Url;

use super::{types::Config, ClientConfig, ConfigError};
use crate::registry::BackendType;

/// Validate configuration
/// Currently validates:
/// - Server port is not 0
/// - Every client has a known backend type, a usable http(s) address and a
///   non-zero timeout
/// - Client uuids are unique
pub fn validate_config(config: &Config) -> Result<(), ConfigError> {
    if config.server.port == 0 {
        return Err(ConfigError::ValidationError(
            "server.port cannot be 0".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    for client in &config.clients {
        validate_client(client)?;
        if !seen.insert(client.uuid) {
            return Err(ConfigError::ValidationError(format!(
                "duplicate client uuid {}",
                client.uuid
            )));
        }
    }

    Ok(())
}

fn validate_client(client: &ClientConfig) -> Result<(), ConfigError> {
    let label = if client.name.is_empty() {
        client.uuid.to_string()
    } else {
        client.name.clone()
    };

    client
        .client_type
        .parse::<BackendType>()
        .map_err(|_| {
            ConfigError::ValidationError(format!(
                "client '{}': unknown type '{}'",
                label, client.client_type
            ))
        })?;

    let url = Url::parse(&client.address).map_err(|e| {
        ConfigError::ValidationError(format!(
            "client '{}': invalid address '{}': {}",
            label, client.address, e
        ))
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::ValidationError(format!(
            "client '{}': address must use http or https",
            label
        )));
    }

    if client.timeout == 0 {
        return Err(ConfigError::ValidationError(format!(
            "client '{}': timeout cannot be 0",
            label
        )));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ServerConfig;
    use std::net::IpAddr;
    use uuid::Uuid;

    fn client(client_type: &str, address: &str) -> ClientConfig {
        ClientConfig {
            client_type: client_type.to_string(),
            name: "test".to_string(),
            uuid: Uuid::new_v4(),
            address: address.to_string(),
            username: String::new(),
            password: String::new(),
            timeout: 1000,
        }
    }

    fn config_with(clients: Vec<ClientConfig>) -> Config {
        Config {
            server: ServerConfig::default(),
            clients,
        }
    }

    #[test]
    fn test_validate_valid_config() {
        let config = config_with(vec![
            client("Transmission", "http://localhost:9091"),
            client("qbittorrent", "https://qb.example.com/"),
        ]);
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn test_validate_port_zero_fails() {
        let config = Config {
            server: ServerConfig {
                host: "0.0.0.0".parse::<IpAddr>().unwrap(),
                port: 0,
            },
            clients: Vec::new(),
        };
        let result = validate_config(&config);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_validate_unknown_type_fails() {
        let config = config_with(vec![client("uTorrent", "http://localhost:8080")]);
        let err = validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("unknown type"));
    }

    #[test]
    fn test_validate_bad_address_fails() {
        let config = config_with(vec![client("Deluge", "localhost:8112")]);
        assert!(validate_config(&config).is_err());

        let config = config_with(vec![client("Deluge", "ftp://localhost:8112")]);
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_validate_zero_timeout_fails() {
        let mut c = client("Transmission", "http://localhost:9091");
        c.timeout = 0;
        assert!(validate_config(&config_with(vec![c])).is_err());
    }

    #[test]
    fn test_validate_duplicate_uuid_fails() {
        let a = client("Transmission", "http://localhost:9091");
        let mut b = client("Deluge", "http://localhost:8112");
        b.uuid = a.uuid;
        let err = validate_config(&config_with(vec![a, b])).unwrap_err();
        assert!(err.to_string().contains("duplicate client uuid"));
    }
}
