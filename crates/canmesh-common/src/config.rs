//! Driver configuration.

use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use crate::error::{MeshError, MeshResult};
use crate::id::{EndpointId, IfName, MAX_IFNAME_LENGTH, NetworkId};

/// Default `ip` binary, overridable with `CANMESH_IP`.
pub static DEFAULT_IP_BINARY: Lazy<String> =
    Lazy::new(|| std::env::var("CANMESH_IP").unwrap_or_else(|_| "ip".to_string()));

/// Default `cangw` binary, overridable with `CANMESH_CANGW`.
pub static DEFAULT_CANGW_BINARY: Lazy<String> =
    Lazy::new(|| std::env::var("CANMESH_CANGW").unwrap_or_else(|_| "cangw".to_string()));

/// Configuration shared by every network the driver manages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct MeshConfig {
    /// Prefix of network interface names (default: `vcan`).
    pub interface_prefix: String,
    /// How many identifier characters follow a prefix (default: 8).
    pub id_prefix_len: usize,
    /// Prefix of the host side of endpoint vxcan pairs (default: `vxcan`).
    pub endpoint_prefix: String,
    /// Prefix of the container side of endpoint vxcan pairs (default: `vxcp`).
    pub peer_prefix: String,
    /// Path or name of the `ip` binary.
    pub ip_binary: String,
    /// Path or name of the `cangw` binary.
    pub cangw_binary: String,
    /// Echo routed frames back on the source interface (`cangw -e`).
    pub echo_frames: bool,
}

impl Default for MeshConfig {
    fn default() -> Self {
        Self {
            interface_prefix: "vcan".to_string(),
            id_prefix_len: 8,
            endpoint_prefix: "vxcan".to_string(),
            peer_prefix: "vxcp".to_string(),
            ip_binary: DEFAULT_IP_BINARY.clone(),
            cangw_binary: DEFAULT_CANGW_BINARY.clone(),
            echo_frames: true,
        }
    }
}

impl MeshConfig {
    /// Create a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a TOML document.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Config`] if the document is malformed or fails
    /// validation.
    pub fn from_toml_str(source: &str) -> MeshResult<Self> {
        let config: Self = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or is invalid.
    pub fn load(path: impl AsRef<Path>) -> MeshResult<Self> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "Loading configuration");
        let source = std::fs::read_to_string(path)?;
        Self::from_toml_str(&source)
    }

    /// Check that every derived name fits the kernel limits.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::Config`] describing the first problem found.
    pub fn validate(&self) -> MeshResult<()> {
        if self.id_prefix_len == 0 {
            return Err(config_error("id_prefix_len must be at least 1"));
        }

        for (field, prefix) in [
            ("interface_prefix", &self.interface_prefix),
            ("endpoint_prefix", &self.endpoint_prefix),
            ("peer_prefix", &self.peer_prefix),
        ] {
            if prefix.len() + self.id_prefix_len > MAX_IFNAME_LENGTH {
                return Err(config_error(format!(
                    "{field} '{prefix}' plus {} identifier characters exceeds {MAX_IFNAME_LENGTH} bytes",
                    self.id_prefix_len
                )));
            }
        }

        if self.endpoint_prefix == self.peer_prefix {
            return Err(config_error("endpoint_prefix and peer_prefix must differ"));
        }

        if self.ip_binary.trim().is_empty() {
            return Err(config_error("ip_binary must not be empty"));
        }
        if self.cangw_binary.trim().is_empty() {
            return Err(config_error("cangw_binary must not be empty"));
        }

        Ok(())
    }

    /// Interface name backing a network.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidInterfaceName`] if the prefix is unusable.
    pub fn network_interface(&self, id: &NetworkId) -> MeshResult<IfName> {
        IfName::derive(&self.interface_prefix, id.as_str(), self.id_prefix_len)
    }

    /// Host-side and container-side interface names of an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidInterfaceName`] if a prefix is unusable.
    pub fn endpoint_interfaces(&self, id: &EndpointId) -> MeshResult<(IfName, IfName)> {
        let host = IfName::derive(&self.endpoint_prefix, id.as_str(), self.id_prefix_len)?;
        let peer = IfName::derive(&self.peer_prefix, id.as_str(), self.id_prefix_len)?;
        Ok((host, peer))
    }
}

fn config_error(message: impl Into<String>) -> MeshError {
    MeshError::Config {
        message: message.into(),
    }
}
