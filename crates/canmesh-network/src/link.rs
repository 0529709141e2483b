//! Kernel link management.
//!
//! [`LinkManager`] is the narrow interface the rest of the crate uses to
//! create, look up, toggle and remove interfaces. [`IpLinkManager`]
//! implements it on top of the `ip` binary.

use std::fmt;

use canmesh_common::{IfName, MeshConfig, MeshError, MeshResult, NamespaceId};

use crate::command;

/// Kind of interface to create.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkKind {
    /// Standalone virtual CAN interface.
    Vcan,
    /// Virtual CAN tunnel pair; `peer` is the second end.
    Vxcan {
        /// Name of the peer interface.
        peer: IfName,
    },
}

impl LinkKind {
    /// Kernel link type name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Vcan => "vcan",
            Self::Vxcan { .. } => "vxcan",
        }
    }
}

impl fmt::Display for LinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reference to an existing interface.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkHandle {
    name: IfName,
}

impl LinkHandle {
    /// Wrap an interface name known to exist.
    #[must_use]
    pub const fn new(name: IfName) -> Self {
        Self { name }
    }

    /// Interface name.
    #[must_use]
    pub const fn name(&self) -> &IfName {
        &self.name
    }
}

/// Interface-resource manager.
pub trait LinkManager: Send + Sync {
    /// Create a new interface.
    ///
    /// Fails with [`MeshError::InterfaceExists`] if `name` is taken.
    fn create(&self, kind: &LinkKind, name: &IfName) -> MeshResult<LinkHandle>;

    /// Look up an existing interface.
    ///
    /// Fails with [`MeshError::InterfaceNotFound`] if `name` is absent.
    fn lookup(&self, name: &IfName) -> MeshResult<LinkHandle>;

    /// Set the interface administratively up.
    fn bring_up(&self, link: &LinkHandle) -> MeshResult<()>;

    /// Set the interface administratively down.
    fn bring_down(&self, link: &LinkHandle) -> MeshResult<()>;

    /// Delete the interface.
    fn remove(&self, link: &LinkHandle) -> MeshResult<()>;

    /// Move the interface into another network namespace.
    fn move_to_netns(&self, link: &LinkHandle, namespace: &NamespaceId) -> MeshResult<()>;
}

/// Removes a freshly created link unless it is committed.
///
/// Holds the link for the duration of a multi-step setup so that a failure
/// in any later step does not leave a half-configured interface behind.
#[must_use = "dropping the guard removes the link"]
pub struct LinkGuard<'a> {
    links: &'a dyn LinkManager,
    link: LinkHandle,
    armed: bool,
}

impl<'a> LinkGuard<'a> {
    /// Create a link and guard it.
    ///
    /// # Errors
    ///
    /// Returns whatever [`LinkManager::create`] returns.
    pub fn create(links: &'a dyn LinkManager, kind: &LinkKind, name: &IfName) -> MeshResult<Self> {
        let link = links.create(kind, name)?;
        Ok(Self {
            links,
            link,
            armed: true,
        })
    }

    /// The guarded link.
    #[must_use]
    pub const fn handle(&self) -> &LinkHandle {
        &self.link
    }

    /// Keep the link and release the guard.
    pub fn commit(mut self) -> LinkHandle {
        self.armed = false;
        self.link.clone()
    }
}

impl Drop for LinkGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        tracing::debug!(name = %self.link.name(), "Removing partially configured link");
        if let Err(e) = self.links.remove(&self.link) {
            tracing::warn!(name = %self.link.name(), error = %e, "Failed to remove link");
        }
    }
}

/// [`LinkManager`] driving the `ip` binary.
#[derive(Debug, Clone)]
pub struct IpLinkManager {
    program: String,
}

impl IpLinkManager {
    /// Use the given `ip` binary.
    #[must_use]
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    /// Use the `ip` binary named in the configuration.
    #[must_use]
    pub fn from_config(config: &MeshConfig) -> Self {
        Self::new(config.ip_binary.clone())
    }

    /// Check if an interface exists.
    #[must_use]
    pub fn exists(&self, name: &IfName) -> bool {
        command::succeeds(&self.program, &["link", "show", name.as_str()])
    }

    fn set(&self, link: &LinkHandle, state: &str) -> MeshResult<()> {
        command::run(&self.program, &["link", "set", link.name().as_str(), state])
    }
}

impl Default for IpLinkManager {
    fn default() -> Self {
        Self::from_config(&MeshConfig::default())
    }
}

impl LinkManager for IpLinkManager {
    fn create(&self, kind: &LinkKind, name: &IfName) -> MeshResult<LinkHandle> {
        tracing::debug!(name = %name, kind = %kind, "Creating link");

        if self.exists(name) {
            return Err(MeshError::InterfaceExists {
                name: name.to_string(),
            });
        }

        let mut args = vec!["link", "add", "name", name.as_str(), "type", kind.as_str()];
        if let LinkKind::Vxcan { peer } = kind {
            args.extend(["peer", "name", peer.as_str()]);
        }
        command::run(&self.program, &args)?;

        Ok(LinkHandle::new(name.clone()))
    }

    fn lookup(&self, name: &IfName) -> MeshResult<LinkHandle> {
        if !self.exists(name) {
            return Err(MeshError::InterfaceNotFound {
                name: name.to_string(),
            });
        }
        Ok(LinkHandle::new(name.clone()))
    }

    fn bring_up(&self, link: &LinkHandle) -> MeshResult<()> {
        tracing::debug!(name = %link.name(), "Bringing link up");
        self.set(link, "up")
    }

    fn bring_down(&self, link: &LinkHandle) -> MeshResult<()> {
        tracing::debug!(name = %link.name(), "Bringing link down");
        self.set(link, "down")
    }

    fn remove(&self, link: &LinkHandle) -> MeshResult<()> {
        tracing::debug!(name = %link.name(), "Deleting link");
        command::run(&self.program, &["link", "delete", link.name().as_str()])
    }

    fn move_to_netns(&self, link: &LinkHandle, namespace: &NamespaceId) -> MeshResult<()> {
        tracing::debug!(name = %link.name(), namespace = %namespace, "Moving link to netns");
        command::run(
            &self.program,
            &["link", "set", link.name().as_str(), "netns", namespace.as_str()],
        )
    }
}
