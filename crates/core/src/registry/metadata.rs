//! Static capability descriptors for configuration UIs.

use serde::Serialize;

use super::BackendType;

/// Description of one backend type, available without any network I/O.
#[derive(Debug, Serialize)]
pub struct ClientMetadata {
    pub backend: BackendType,
    pub description: &'static str,
    /// Caveats shown next to the configuration form.
    pub warnings: &'static [&'static str],
    pub default_address: &'static str,
    /// Milliseconds.
    pub default_timeout_ms: u64,
    pub features: ClientFeatures,
    pub config_fields: &'static [ConfigField],
}

/// Optional capabilities. Options for unsupported features are dropped by
/// the adapter rather than rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClientFeatures {
    /// Honours `save_path`.
    pub custom_path: bool,
    /// Honours `label`.
    pub label: bool,
    /// Honours `add_at_paused`.
    pub add_paused: bool,
    /// Accepts uploaded metainfo (needed for `local_download`).
    pub local_download: bool,
    /// Supports the "recently active" task selector.
    pub recently_active: bool,
}

/// A field of `ClientConfig` the configuration form should show.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ConfigField {
    pub name: &'static str,
    pub required: bool,
}

impl ConfigField {
    pub const fn required(name: &'static str) -> Self {
        Self {
            name,
            required: true,
        }
    }

    pub const fn optional(name: &'static str) -> Self {
        Self {
            name,
            required: false,
        }
    }
}

impl ClientMetadata {
    /// Whether the form must ask for `field`.
    pub fn requires(&self, field: &str) -> bool {
        self.config_fields
            .iter()
            .any(|f| f.name == field && f.required)
    }
}
