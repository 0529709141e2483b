//! Container-side attachment points.

use std::fmt;
use std::sync::Arc;

use canmesh_common::{EndpointId, IfName, MeshConfig, MeshError, MeshResult, NamespaceId};

use crate::link::{LinkGuard, LinkKind, LinkManager};

/// A container attachment point bound to one host interface.
///
/// The host interface is what gateway rules refer to. Registration with a
/// [`Network`](crate::Network) only stores the endpoint; `attach` is what
/// binds it into a container namespace.
pub trait Endpoint {
    /// Stable identifier.
    fn endpoint_id(&self) -> &EndpointId;

    /// Host-side interface carrying the endpoint's traffic.
    fn interface_name(&self) -> &IfName;

    /// Bind the endpoint into a network namespace.
    fn attach(&mut self, namespace: &NamespaceId) -> MeshResult<()>;

    /// Undo [`attach`](Self::attach).
    fn detach(&mut self) -> MeshResult<()>;
}

/// Endpoint backed by a vxcan tunnel pair.
///
/// The pair exists from construction until [`delete`](Self::delete), so
/// gateway rules can reference the host side before the endpoint joins a
/// container. `attach` moves the peer into the container namespace and
/// `detach` leaves both ends in place.
///
/// Destroying the container namespace destroys the pair. `attach` creates
/// it again when that has happened.
pub struct VxcanEndpoint {
    id: EndpointId,
    host: IfName,
    peer: IfName,
    links: Arc<dyn LinkManager>,
    namespace: Option<NamespaceId>,
}

impl VxcanEndpoint {
    /// Create the endpoint and its vxcan pair, with interface names derived
    /// from its ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the derived names are not valid interface names
    /// or the pair cannot be created.
    pub fn create(
        id: EndpointId,
        config: &MeshConfig,
        links: Arc<dyn LinkManager>,
    ) -> MeshResult<Self> {
        let (host, peer) = config.endpoint_interfaces(&id)?;
        Self::create_with_names(id, host, peer, links)
    }

    /// Create the endpoint and its vxcan pair with explicit interface names.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InterfaceExists`] if the host name is taken, or
    /// the link manager's error.
    pub fn create_with_names(
        id: EndpointId,
        host: IfName,
        peer: IfName,
        links: Arc<dyn LinkManager>,
    ) -> MeshResult<Self> {
        create_pair(links.as_ref(), &host, &peer)?.commit();
        tracing::info!(endpoint = %id, host = %host, peer = %peer, "Endpoint created");

        Ok(Self {
            id,
            host,
            peer,
            links,
            namespace: None,
        })
    }

    /// Container-side interface name.
    #[must_use]
    pub const fn peer_name(&self) -> &IfName {
        &self.peer
    }

    /// Namespace the peer currently lives in.
    #[must_use]
    pub const fn namespace(&self) -> Option<&NamespaceId> {
        self.namespace.as_ref()
    }

    /// Delete the vxcan pair.
    ///
    /// A pair that is already gone is not an error.
    ///
    /// # Errors
    ///
    /// Returns the link manager's error if removal fails.
    pub fn delete(self) -> MeshResult<()> {
        match self.links.lookup(&self.host) {
            Ok(host) => self.links.remove(&host)?,
            Err(e) if e.is_not_found() => {
                tracing::debug!(endpoint = %self.id, host = %self.host, "vxcan pair already gone");
            }
            Err(e) => return Err(e),
        }
        tracing::info!(endpoint = %self.id, "Endpoint deleted");
        Ok(())
    }
}

/// Create a vxcan pair and bring its host side up, guarded until committed.
fn create_pair<'a>(
    links: &'a dyn LinkManager,
    host: &IfName,
    peer: &IfName,
) -> MeshResult<LinkGuard<'a>> {
    tracing::debug!(host = %host, peer = %peer, "Creating vxcan pair");
    let kind = LinkKind::Vxcan { peer: peer.clone() };
    let guard = LinkGuard::create(links, &kind, host)?;
    links.bring_up(guard.handle())?;
    Ok(guard)
}

impl Endpoint for VxcanEndpoint {
    fn endpoint_id(&self) -> &EndpointId {
        &self.id
    }

    fn interface_name(&self) -> &IfName {
        &self.host
    }

    fn attach(&mut self, namespace: &NamespaceId) -> MeshResult<()> {
        match &self.namespace {
            Some(current) if current == namespace => return Ok(()),
            Some(current) => {
                return Err(MeshError::external(
                    format!("attach endpoint {}", self.id),
                    format!("already attached to namespace {current}"),
                ));
            }
            None => {}
        }

        let recreated = match self.links.lookup(&self.host) {
            Ok(_) => None,
            Err(e) if e.is_not_found() => {
                tracing::warn!(endpoint = %self.id, host = %self.host, "vxcan pair vanished, recreating");
                Some(create_pair(self.links.as_ref(), &self.host, &self.peer)?)
            }
            Err(e) => return Err(e),
        };

        let peer = self.links.lookup(&self.peer)?;
        self.links.move_to_netns(&peer, namespace)?;
        if let Some(guard) = recreated {
            guard.commit();
        }

        self.namespace = Some(namespace.clone());
        tracing::info!(endpoint = %self.id, namespace = %namespace, "Endpoint attached");
        Ok(())
    }

    fn detach(&mut self) -> MeshResult<()> {
        let Some(namespace) = self.namespace.take() else {
            return Ok(());
        };

        match self.links.lookup(&self.host) {
            Ok(_) => {}
            // The namespace was destroyed and took the pair with it.
            Err(e) if e.is_not_found() => {
                tracing::warn!(endpoint = %self.id, host = %self.host, "vxcan pair already gone");
            }
            Err(e) => {
                self.namespace = Some(namespace);
                return Err(e);
            }
        }

        tracing::info!(endpoint = %self.id, namespace = %namespace, "Endpoint detached");
        Ok(())
    }
}

impl fmt::Debug for VxcanEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VxcanEndpoint")
            .field("id", &self.id)
            .field("host", &self.host)
            .field("peer", &self.peer)
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::link::LinkHandle;
    use parking_lot::Mutex;
    use std::collections::BTreeMap;

    /// Interface name -> namespace (`None` for the root namespace), plus
    /// host -> peer for vxcan pairs.
    #[derive(Default)]
    struct FakeLinks {
        links: Mutex<BTreeMap<String, Option<String>>>,
        pairs: Mutex<BTreeMap<String, String>>,
        fail_netns: bool,
    }

    impl FakeLinks {
        /// What destroying a container namespace does to a pair.
        fn vanish(&self, host: &str) {
            let peer = self.pairs.lock().remove(host);
            let mut links = self.links.lock();
            links.remove(host);
            if let Some(peer) = peer {
                links.remove(&peer);
            }
        }
    }

    impl LinkManager for FakeLinks {
        fn create(&self, kind: &LinkKind, name: &IfName) -> MeshResult<LinkHandle> {
            let mut links = self.links.lock();
            if links.contains_key(name.as_str()) {
                return Err(MeshError::InterfaceExists {
                    name: name.to_string(),
                });
            }
            links.insert(name.to_string(), None);
            if let LinkKind::Vxcan { peer } = kind {
                links.insert(peer.to_string(), None);
                self.pairs.lock().insert(name.to_string(), peer.to_string());
            }
            Ok(LinkHandle::new(name.clone()))
        }

        fn lookup(&self, name: &IfName) -> MeshResult<LinkHandle> {
            if self.links.lock().contains_key(name.as_str()) {
                Ok(LinkHandle::new(name.clone()))
            } else {
                Err(MeshError::InterfaceNotFound {
                    name: name.to_string(),
                })
            }
        }

        fn bring_up(&self, _link: &LinkHandle) -> MeshResult<()> {
            Ok(())
        }

        fn bring_down(&self, _link: &LinkHandle) -> MeshResult<()> {
            Ok(())
        }

        fn remove(&self, link: &LinkHandle) -> MeshResult<()> {
            self.vanish(link.name().as_str());
            Ok(())
        }

        fn move_to_netns(&self, link: &LinkHandle, namespace: &NamespaceId) -> MeshResult<()> {
            if self.fail_netns {
                return Err(MeshError::external("ip link set netns", "invalid namespace"));
            }
            self.links
                .lock()
                .insert(link.name().to_string(), Some(namespace.to_string()));
            Ok(())
        }
    }

    fn endpoint(links: Arc<FakeLinks>) -> VxcanEndpoint {
        let id = EndpointId::new("ep1234567890").unwrap();
        VxcanEndpoint::create(id, &MeshConfig::default(), links).unwrap()
    }

    #[test]
    fn create_builds_pair_in_root_namespace() {
        let links = Arc::new(FakeLinks::default());
        let ep = endpoint(links.clone());

        assert_eq!(ep.interface_name().as_str(), "vxcanep123456");
        assert_eq!(ep.peer_name().as_str(), "vxcpep123456");
        assert!(ep.namespace().is_none());
        let state = links.links.lock();
        assert_eq!(state.get("vxcanep123456"), Some(&None));
        assert_eq!(state.get("vxcpep123456"), Some(&None));
    }

    #[test]
    fn create_fails_on_taken_name() {
        let links = Arc::new(FakeLinks::default());
        let _first = endpoint(links.clone());

        let id = EndpointId::new("ep1234567890").unwrap();
        let err = VxcanEndpoint::create(id, &MeshConfig::default(), links).unwrap_err();
        assert!(err.is_conflict());
    }

    #[test]
    fn attach_moves_peer_into_namespace() {
        let links = Arc::new(FakeLinks::default());
        let mut ep = endpoint(links.clone());
        let ns = NamespaceId::new("/var/run/docker/netns/abc").unwrap();

        ep.attach(&ns).unwrap();

        let state = links.links.lock();
        assert_eq!(state.get("vxcanep123456"), Some(&None));
        assert_eq!(
            state.get("vxcpep123456"),
            Some(&Some("/var/run/docker/netns/abc".to_string()))
        );
        drop(state);
        assert_eq!(ep.namespace(), Some(&ns));
    }

    #[test]
    fn attach_same_namespace_twice_is_noop() {
        let links = Arc::new(FakeLinks::default());
        let mut ep = endpoint(links);
        let ns = NamespaceId::from_pid(4242);

        ep.attach(&ns).unwrap();
        ep.attach(&ns).unwrap();
        assert!(ep.attach(&NamespaceId::from_pid(1)).is_err());
    }

    #[test]
    fn failed_attach_keeps_pair() {
        let links = Arc::new(FakeLinks {
            fail_netns: true,
            ..FakeLinks::default()
        });
        let mut ep = endpoint(links.clone());

        let err = ep.attach(&NamespaceId::from_pid(4242)).unwrap_err();

        assert!(err.is_external());
        assert_eq!(links.links.lock().len(), 2);
        assert!(ep.namespace().is_none());
    }

    #[test]
    fn failed_attach_removes_recreated_pair() {
        let links = Arc::new(FakeLinks {
            fail_netns: true,
            ..FakeLinks::default()
        });
        let mut ep = endpoint(links.clone());
        links.vanish("vxcanep123456");

        assert!(ep.attach(&NamespaceId::from_pid(4242)).is_err());
        assert!(links.links.lock().is_empty());
    }

    #[test]
    fn detach_keeps_pair_for_reattach() {
        let links = Arc::new(FakeLinks::default());
        let mut ep = endpoint(links.clone());
        let ns = NamespaceId::from_pid(4242);

        ep.attach(&ns).unwrap();
        ep.detach().unwrap();
        assert!(ep.namespace().is_none());
        assert!(links.links.lock().contains_key("vxcanep123456"));

        ep.detach().unwrap();
        ep.attach(&ns).unwrap();
        assert_eq!(ep.namespace(), Some(&ns));
    }

    #[test]
    fn detach_after_pair_vanished_succeeds() {
        let links = Arc::new(FakeLinks::default());
        let mut ep = endpoint(links.clone());
        ep.attach(&NamespaceId::from_pid(4242)).unwrap();
        links.vanish("vxcanep123456");

        ep.detach().unwrap();
        assert!(ep.namespace().is_none());

        // A new container gets a fresh pair.
        ep.attach(&NamespaceId::from_pid(5151)).unwrap();
        let state = links.links.lock();
        assert_eq!(state.get("vxcanep123456"), Some(&None));
        assert_eq!(state.get("vxcpep123456"), Some(&Some("5151".to_string())));
    }

    #[test]
    fn delete_removes_pair_once() {
        let links = Arc::new(FakeLinks::default());
        let ep = endpoint(links.clone());
        ep.delete().unwrap();
        assert!(links.links.lock().is_empty());

        let ep = endpoint(links.clone());
        links.vanish("vxcanep123456");
        ep.delete().unwrap();
    }
}
