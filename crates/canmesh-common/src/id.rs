//! Network, endpoint and namespace identifiers, and kernel interface names.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{MeshError, MeshResult};

/// Maximum length of a network or endpoint identifier.
pub const MAX_ID_LENGTH: usize = 64;

/// Longest interface name the kernel accepts (`IFNAMSIZ` minus the NUL).
pub const MAX_IFNAME_LENGTH: usize = 15;

fn validate_identifier(id: &str) -> MeshResult<()> {
    let invalid = || MeshError::InvalidIdentifier { id: id.to_string() };

    if id.is_empty() || id.len() > MAX_ID_LENGTH {
        return Err(invalid());
    }

    let mut chars = id.chars();
    if !chars.next().is_some_and(|c| c.is_ascii_alphanumeric()) {
        return Err(invalid());
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_') {
        return Err(invalid());
    }

    Ok(())
}

/// A validated network identifier, assigned by the plugin transport.
///
/// Identifiers are ASCII only, so any prefix of one is a valid string
/// slice. See [`IfName::derive`] for how interface names come out of it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NetworkId(String);

impl NetworkId {
    /// Create a new network ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidIdentifier`] if the ID format is invalid.
    pub fn new(id: impl Into<String>) -> MeshResult<Self> {
        let id = id.into();
        validate_identifier(&id)?;
        Ok(Self(id))
    }

    /// Get the network ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A validated endpoint identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EndpointId(String);

impl EndpointId {
    /// Create a new endpoint ID, validating the format.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidIdentifier`] if the ID format is invalid.
    pub fn new(id: impl Into<String>) -> MeshResult<Self> {
        let id = id.into();
        validate_identifier(&id)?;
        Ok(Self(id))
    }

    /// Get the endpoint ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! string_newtype_impls {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl FromStr for $ty {
            type Err = MeshError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = MeshError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.0
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

string_newtype_impls!(NetworkId);
string_newtype_impls!(EndpointId);
string_newtype_impls!(IfName);
string_newtype_impls!(NamespaceId);

/// A validated kernel network interface name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct IfName(String);

impl IfName {
    /// Create an interface name, validating it against kernel rules.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidInterfaceName`] if the kernel would
    /// reject the name.
    pub fn new(name: impl Into<String>) -> MeshResult<Self> {
        let name = name.into();
        Self::validate(&name)?;
        Ok(Self(name))
    }

    /// Derive an interface name from an identifier.
    ///
    /// The name is `prefix` followed by the first `prefix_len` characters
    /// of `id`, or the whole of `id` when it is shorter. The result is
    /// validated and never truncated.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidInterfaceName`] if the combined name
    /// does not fit the kernel limits.
    pub fn derive(prefix: &str, id: &str, prefix_len: usize) -> MeshResult<Self> {
        let head: String = id.chars().take(prefix_len).collect();
        Self::new(format!("{prefix}{head}"))
    }

    /// Get the interface name as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(name: &str) -> MeshResult<()> {
        let reason = if name.is_empty() {
            Some("empty")
        } else if name.len() > MAX_IFNAME_LENGTH {
            Some("longer than 15 bytes")
        } else if name == "." || name == ".." {
            Some("reserved name")
        } else if name
            .chars()
            .any(|c| c == '/' || c == ':' || c.is_whitespace() || c.is_control())
        {
            Some("contains a forbidden character")
        } else {
            None
        };

        match reason {
            Some(reason) => Err(MeshError::InvalidInterfaceName {
                name: name.to_string(),
                reason,
            }),
            None => Ok(()),
        }
    }
}

/// Network namespace an endpoint is moved into.
///
/// Anything `ip link set <dev> netns` understands: a named namespace,
/// a pid, or a bind-mounted namespace path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct NamespaceId(String);

impl NamespaceId {
    /// Create a namespace reference.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InvalidNamespace`] if the reference is blank.
    pub fn new(namespace: impl Into<String>) -> MeshResult<Self> {
        let namespace = namespace.into();
        if namespace.trim().is_empty() {
            return Err(MeshError::InvalidNamespace { namespace });
        }
        Ok(Self(namespace))
    }

    /// Reference a namespace by the pid of a process living in it.
    #[must_use]
    pub fn from_pid(pid: u32) -> Self {
        Self(pid.to_string())
    }

    /// Get the namespace reference as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}
