use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

use super::{types::Config, ConfigError};

/// Environment prefix for `[server]` overrides, e.g. `BTBRIDGE_SERVER_PORT`.
const SERVER_ENV_PREFIX: &str = "BTBRIDGE_SERVER_";

/// Load the configuration file at `path`, then apply environment overrides.
///
/// Client records are only read from the file; the environment can override
/// `server.host` and `server.port`.
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::FileNotFound(path.display().to_string()));
    }

    extract(Figment::from(Toml::file(path)).merge(server_env()))
}

/// Parse a TOML document without consulting the environment.
pub fn load_config_from_str(toml_str: &str) -> Result<Config, ConfigError> {
    extract(Figment::from(Toml::string(toml_str)))
}

fn server_env() -> Env {
    Env::prefixed(SERVER_ENV_PREFIX).map(|key| format!("server.{}", key.as_str()).into())
}

fn extract(figment: Figment) -> Result<Config, ConfigError> {
    figment
        .extract()
        .map_err(|e| ConfigError::ParseError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_from_str_valid() {
        let toml = r#"
[server]
port = 9000

[[clients]]
type = "qBittorrent"
name = "qb"
uuid = "4c1e31de-8b3f-4d7e-9a36-2f8c5f1f8b10"
address = "http://localhost:8080"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.clients[0].name, "qb");
    }

    #[test]
    fn test_load_config_from_str_bad_uuid() {
        let toml = r#"
[[clients]]
type = "qBittorrent"
name = "qb"
uuid = "not-a-uuid"
address = "http://localhost:8080"
"#;
        let result = load_config_from_str(toml);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_load_config_from_str_defaults() {
        let config = load_config_from_str("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert!(config.clients.is_empty());
    }

    #[test]
    fn test_client_timeout_defaults() {
        let toml = r#"
[[clients]]
type = "Deluge"
name = "box"
uuid = "9b7a4c1e-0f1d-4a8e-b5c2-7d3e6f8a9b01"
address = "http://nas:8112/"
password = "deluge"
"#;
        let config = load_config_from_str(toml).unwrap();
        assert_eq!(config.clients[0].timeout, 60_000);
        assert_eq!(config.clients[0].username, "");
        assert_eq!(config.clients[0].password, "deluge");
    }

    #[test]
    fn test_load_config_file_not_found() {
        let result = load_config(Path::new("/nonexistent/config.toml"));
        assert!(matches!(result, Err(ConfigError::FileNotFound(_))));
    }

    #[test]
    fn test_load_config_from_file() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
[server]
host = "127.0.0.1"
port = 3000

[[clients]]
type = "Transmission"
name = "tr"
uuid = "1cc694ef-7f64-4882-b33a-b578a76fd35c"
address = "http://localhost:9091/"
timeout = 2000
"#
        )
        .unwrap();

        let config = load_config(temp_file.path()).unwrap();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host.to_string(), "127.0.0.1");
        assert_eq!(config.clients[0].timeout, 2000);
    }
}
