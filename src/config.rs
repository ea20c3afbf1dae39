//! Registry configuration.

use std::fs;
use std::path::Path;

use serde::Deserialize;

use crate::error::ConfigError;

/// Behavior when a key or name is registered more than once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebindPolicy {
    /// A later registration replaces the earlier one, until the key has a
    /// memoized resolution; after that it is ignored.
    #[default]
    Replace,
    /// Registering an already-registered key, or binding a name that is in
    /// use by a different key, fails.
    Reject,
}

/// Configuration for a [`ServiceRegistry`](crate::registry::ServiceRegistry).
#[derive(Debug, Clone, Deserialize)]
pub struct RegistryConfig {
    /// Re-registration policy.
    #[serde(default)]
    pub rebind: RebindPolicy,
    /// Pre-sizes the internal tables when the service count is known.
    #[serde(default)]
    pub initial_capacity: Option<usize>,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            rebind: RebindPolicy::Replace,
            initial_capacity: None,
        }
    }
}

impl RegistryConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Loads a configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }
}
