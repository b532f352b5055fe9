use std::collections::BTreeSet;
use std::path::Path;

use opbridge_core::{ResourceName, ResourceNameError};
use serde::Deserialize;

use super::principal::IdentityMode;

/// Operation routed through an impersonation scope by default.
pub const RETRIEVE_COMMAND_USER: &str = "retrieveCommandUser";

/// Bridge configuration: where the registry is and what to call on it.
///
/// Loadable from a JSON file; missing fields take their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// `discovery://host:port/binding` or `direct://host:port`.
    pub endpoint_url: String,
    /// Resource every invocation targets.
    pub resource_name: String,
    /// Operations that run inside an impersonation scope.
    pub privileged_operations: BTreeSet<String>,
    /// How the principal set of a privileged operation is sourced.
    pub identity_mode: IdentityMode,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            endpoint_url: "discovery://localhost:9999/registry".to_string(),
            resource_name: "opbridge.demo:type=Test".to_string(),
            privileged_operations: BTreeSet::from([RETRIEVE_COMMAND_USER.to_string()]),
            identity_mode: IdentityMode::Synthetic,
        }
    }
}

/// Configuration that cannot be used to build a bridge.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid resource name: {0}")]
    ResourceName(#[from] ResourceNameError),
    #[error("endpoint url is empty")]
    EmptyEndpoint,
    #[error("privileged operation names must not be blank")]
    BlankPrivilegedOperation,
}

impl BridgeConfig {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Read`] or [`ConfigError::Parse`].
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Checks the configuration and returns the parsed resource name.
    ///
    /// The endpoint URL is only checked for presence; its form is validated
    /// by the transport when connecting.
    ///
    /// # Errors
    ///
    /// Returns the first [`ConfigError`] found.
    pub fn validate(&self) -> Result<ResourceName, ConfigError> {
        if self.endpoint_url.trim().is_empty() {
            return Err(ConfigError::EmptyEndpoint);
        }
        if self.privileged_operations.iter().any(|op| op.trim().is_empty()) {
            return Err(ConfigError::BlankPrivilegedOperation);
        }
        Ok(ResourceName::parse(&self.resource_name)?)
    }

    #[must_use]
    pub fn is_privileged(&self, operation: &str) -> bool {
        self.privileged_operations.contains(operation)
    }
}
