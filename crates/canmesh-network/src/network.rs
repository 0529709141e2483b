//! vcan networks and their endpoint mesh.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use canmesh_common::{EndpointId, IfName, MeshConfig, MeshError, MeshResult, NamespaceId, NetworkId};

use crate::cangw::CanGwBackend;
use crate::endpoint::Endpoint;
use crate::gateway::{Gateway, RuleBackend};
use crate::link::{IpLinkManager, LinkGuard, LinkKind, LinkManager};

/// A logical CAN network: one vcan interface plus its member endpoints.
///
/// Attached endpoints form a full mesh: each one has rules to and from the
/// network interface and to and from every other endpoint that was
/// registered when it attached.
///
/// A network has no internal locking. Callers must serialize operations on
/// the same network.
pub struct Network<E: Endpoint> {
    id: NetworkId,
    if_name: IfName,
    endpoints: HashMap<EndpointId, E>,
    gateway: Gateway,
    links: Arc<dyn LinkManager>,
}

impl<E: Endpoint> Network<E> {
    /// Create a network with explicit link and rule mechanisms.
    ///
    /// # Errors
    ///
    /// Returns an error if the interface name derived from `id` is invalid.
    pub fn new(
        id: NetworkId,
        config: &MeshConfig,
        links: Arc<dyn LinkManager>,
        backend: impl RuleBackend + 'static,
    ) -> MeshResult<Self> {
        let if_name = config.network_interface(&id)?;
        Ok(Self {
            id,
            if_name,
            endpoints: HashMap::new(),
            gateway: Gateway::new(backend),
            links,
        })
    }

    /// Create a network driving `ip` and `cangw` as configured.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration or the derived interface name
    /// is invalid.
    pub fn from_config(id: NetworkId, config: &MeshConfig) -> MeshResult<Self> {
        config.validate()?;
        Self::new(
            id,
            config,
            Arc::new(IpLinkManager::from_config(config)),
            CanGwBackend::from_config(config),
        )
    }

    /// Network identifier.
    #[must_use]
    pub const fn id(&self) -> &NetworkId {
        &self.id
    }

    /// Name of the backing vcan interface.
    #[must_use]
    pub const fn interface_name(&self) -> &IfName {
        &self.if_name
    }

    /// Forwarding rules of this network.
    #[must_use]
    pub const fn gateway(&self) -> &Gateway {
        &self.gateway
    }

    /// Look up a registered endpoint.
    #[must_use]
    pub fn endpoint(&self, endpoint_id: &EndpointId) -> Option<&E> {
        self.endpoints.get(endpoint_id)
    }

    /// Iterate over registered endpoints, in no particular order.
    pub fn endpoints(&self) -> impl Iterator<Item = &E> {
        self.endpoints.values()
    }

    /// Create the vcan interface and bring it up.
    ///
    /// If bringing the interface up fails, the interface is removed again.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InterfaceExists`] if the interface is already
    /// present, or the link manager's error.
    pub fn create_resource(&self) -> MeshResult<()> {
        tracing::debug!(network = %self.id, name = %self.if_name, "Creating network interface");

        let link = LinkGuard::create(self.links.as_ref(), &LinkKind::Vcan, &self.if_name)?;
        self.links.bring_up(link.handle())?;
        link.commit();

        tracing::info!(network = %self.id, name = %self.if_name, "Network interface created");
        Ok(())
    }

    /// Bring the vcan interface down and remove it.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::InterfaceNotFound`] if the interface is absent,
    /// or the link manager's error.
    pub fn delete_resource(&self) -> MeshResult<()> {
        tracing::debug!(network = %self.id, name = %self.if_name, "Deleting network interface");

        let link = self.links.lookup(&self.if_name)?;
        self.links.bring_down(&link)?;
        self.links.remove(&link)?;

        tracing::info!(network = %self.id, name = %self.if_name, "Network interface deleted");
        Ok(())
    }

    /// Register an endpoint.
    ///
    /// An endpoint already registered under the same ID is replaced and
    /// returned. No rules are created until the endpoint is attached.
    pub fn add_endpoint(&mut self, endpoint: E) -> Option<E> {
        let id = endpoint.endpoint_id().clone();
        tracing::debug!(network = %self.id, endpoint = %id, "Registering endpoint");

        let previous = self.endpoints.insert(id, endpoint);
        if let Some(previous) = &previous {
            tracing::warn!(
                network = %self.id,
                endpoint = %previous.endpoint_id(),
                "Replaced endpoint with the same ID"
            );
        }
        previous
    }

    /// Unregister an endpoint and return it.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::EndpointNotFound`] if no endpoint has this ID.
    pub fn remove_endpoint(&mut self, endpoint_id: &EndpointId) -> MeshResult<E> {
        tracing::debug!(network = %self.id, endpoint = %endpoint_id, "Unregistering endpoint");
        self.endpoints
            .remove(endpoint_id)
            .ok_or_else(|| endpoint_not_found(endpoint_id))
    }

    /// Attach an endpoint to a namespace and connect it to the mesh.
    ///
    /// Rule changes are applied one at a time and are not rolled back: if
    /// one fails, rules added before it stay in place. Rules recorded for an
    /// endpoint interface that has since vanished are dropped and installed
    /// again.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::EndpointNotFound`] for an unknown ID, or the
    /// endpoint's or gateway's error.
    pub fn attach_endpoint(
        &mut self,
        endpoint_id: &EndpointId,
        namespace: &NamespaceId,
    ) -> MeshResult<()> {
        let endpoint = self
            .endpoints
            .get_mut(endpoint_id)
            .ok_or_else(|| endpoint_not_found(endpoint_id))?;
        let ep_if = endpoint.interface_name().clone();
        // Rules come after the namespace attach so a failed attach adds none.
        endpoint.attach(namespace)?;
        self.forget_vanished(&ep_if)?;

        self.gateway.add_rule(&self.if_name, &ep_if)?;
        self.gateway.add_rule(&ep_if, &self.if_name)?;

        for (other_id, other) in &self.endpoints {
            if other_id == endpoint_id {
                continue;
            }
            let other_if = other.interface_name();
            self.gateway.add_rule(other_if, &ep_if)?;
            self.gateway.add_rule(&ep_if, other_if)?;
        }

        tracing::info!(
            network = %self.id,
            endpoint = %endpoint_id,
            rules = self.gateway.len(),
            "Endpoint joined mesh"
        );
        Ok(())
    }

    /// Disconnect an endpoint from its peers and detach it.
    ///
    /// Only rules between the endpoint and other endpoints are removed. The
    /// two rules linking it with the network interface are left in place.
    /// If the endpoint's interface has vanished, its rules are dropped from
    /// the gateway without calling the backend.
    ///
    /// # Errors
    ///
    /// Returns [`MeshError::EndpointNotFound`] for an unknown ID, or the
    /// gateway's or endpoint's error.
    pub fn detach_endpoint(&mut self, endpoint_id: &EndpointId) -> MeshResult<()> {
        let ep_if = self
            .endpoints
            .get(endpoint_id)
            .ok_or_else(|| endpoint_not_found(endpoint_id))?
            .interface_name()
            .clone();
        self.forget_vanished(&ep_if)?;

        for (other_id, other) in &self.endpoints {
            if other_id == endpoint_id {
                continue;
            }
            let other_if = other.interface_name();
            self.gateway.remove_rule(other_if, &ep_if)?;
            self.gateway.remove_rule(&ep_if, other_if)?;
        }

        if let Some(endpoint) = self.endpoints.get_mut(endpoint_id) {
            endpoint.detach()?;
        }

        tracing::info!(
            network = %self.id,
            endpoint = %endpoint_id,
            rules = self.gateway.len(),
            "Endpoint left mesh"
        );
        Ok(())
    }

    /// Remove every forwarding rule of this network.
    ///
    /// # Errors
    ///
    /// Returns the gateway's error; rules not yet removed stay recorded.
    pub fn flush_rules(&mut self) -> MeshResult<()> {
        tracing::debug!(network = %self.id, rules = self.gateway.len(), "Flushing rules");
        let interfaces: Vec<IfName> = std::iter::once(self.if_name.clone())
            .chain(self.endpoints.values().map(|e| e.interface_name().clone()))
            .collect();
        for name in &interfaces {
            self.forget_vanished(name)?;
        }
        self.gateway.clear()
    }

    /// Drop recorded rules for `name` if the interface no longer exists.
    ///
    /// The kernel removes CAN gateway jobs together with their device, so
    /// those rules are already gone and uninstalling them would fail.
    fn forget_vanished(&mut self, name: &IfName) -> MeshResult<()> {
        match self.links.lookup(name) {
            Ok(_) => Ok(()),
            Err(e) if e.is_not_found() => {
                let forgotten = self.gateway.forget_interface(name);
                if forgotten > 0 {
                    tracing::warn!(
                        network = %self.id,
                        interface = %name,
                        forgotten,
                        "Interface vanished, dropped its rules"
                    );
                }
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

impl<E: Endpoint> fmt::Debug for Network<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Network")
            .field("id", &self.id)
            .field("if_name", &self.if_name)
            .field("endpoints", &self.endpoints.keys().collect::<Vec<_>>())
            .field("gateway", &self.gateway)
            .finish_non_exhaustive()
    }
}

fn endpoint_not_found(id: &EndpointId) -> MeshError {
    MeshError::EndpointNotFound { id: id.to_string() }
}
