//! Common error types for canmesh.

use miette::Diagnostic;
use thiserror::Error;

/// Result type alias using [`MeshError`].
pub type MeshResult<T> = Result<T, MeshError>;

/// Errors raised while managing vcan networks.
#[derive(Error, Diagnostic, Debug)]
pub enum MeshError {
    /// Endpoint not registered on the network.
    #[error("Endpoint not found: {id}")]
    #[diagnostic(code(canmesh::endpoint::not_found))]
    EndpointNotFound {
        /// The endpoint ID that was not found.
        id: String,
    },

    /// Interface does not exist.
    #[error("Interface not found: {name}")]
    #[diagnostic(code(canmesh::interface::not_found))]
    InterfaceNotFound {
        /// The interface name that was not found.
        name: String,
    },

    /// Interface already exists.
    #[error("Interface already exists: {name}")]
    #[diagnostic(
        code(canmesh::interface::exists),
        help("Remove the stale interface with `ip link delete` or pick another network ID")
    )]
    InterfaceExists {
        /// The conflicting interface name.
        name: String,
    },

    /// Failure reported by the kernel or one of the helper binaries.
    #[error("{operation} failed: {message}")]
    #[diagnostic(code(canmesh::external))]
    External {
        /// The operation that failed.
        operation: String,
        /// Details reported by the mechanism.
        message: String,
    },

    /// Invalid network or endpoint identifier.
    #[error("Invalid identifier: {id}")]
    #[diagnostic(
        code(canmesh::invalid_id),
        help("Identifiers must be alphanumeric with hyphens and underscores, 1-64 characters")
    )]
    InvalidIdentifier {
        /// The invalid identifier.
        id: String,
    },

    /// Invalid kernel interface name.
    #[error("Invalid interface name '{name}': {reason}")]
    #[diagnostic(
        code(canmesh::interface::invalid_name),
        help("Interface names are limited to 15 bytes without '/', ':' or whitespace")
    )]
    InvalidInterfaceName {
        /// The rejected name.
        name: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Invalid network namespace reference.
    #[error("Invalid namespace: {namespace:?}")]
    #[diagnostic(code(canmesh::namespace::invalid))]
    InvalidNamespace {
        /// The rejected namespace reference.
        namespace: String,
    },

    /// I/O error.
    #[error("I/O error: {0}")]
    #[diagnostic(code(canmesh::io))]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {message}")]
    #[diagnostic(code(canmesh::config))]
    Config {
        /// The error message.
        message: String,
    },
}

impl MeshError {
    /// Build an [`MeshError::External`] from an operation and a message.
    #[must_use]
    pub fn external(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::External {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Whether a required endpoint or interface was absent.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::EndpointNotFound { .. } | Self::InterfaceNotFound { .. }
        )
    }

    /// Whether a resource with the requested name already exists.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::InterfaceExists { .. })
    }

    /// Whether the failure came from the kernel or a helper binary.
    #[must_use]
    pub const fn is_external(&self) -> bool {
        matches!(self, Self::External { .. } | Self::Io(_))
    }
}

impl From<toml::de::Error> for MeshError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config {
            message: err.to_string(),
        }
    }
}
