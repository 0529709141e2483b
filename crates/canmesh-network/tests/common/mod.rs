//! In-memory link, rule and endpoint fakes shared by the integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use canmesh_common::{EndpointId, IfName, MeshConfig, MeshError, MeshResult, NamespaceId, NetworkId};
use canmesh_network::{Endpoint, LinkHandle, LinkKind, LinkManager, Network, Rule, RuleBackend};
use parking_lot::Mutex;

/// Interface name -> administratively up, plus the CAN gateway jobs that
/// reference those interfaces.
#[derive(Default)]
pub struct FakeLinks {
    pub links: Mutex<BTreeMap<String, bool>>,
    pub peers: Mutex<BTreeMap<String, String>>,
    pub namespaces: Mutex<BTreeMap<String, String>>,
    pub jobs: Mutex<BTreeSet<(String, String)>>,
    pub fail_up: Mutex<bool>,
}

impl FakeLinks {
    pub fn is_up(&self, name: &str) -> Option<bool> {
        self.links.lock().get(name).copied()
    }

    /// Add an interface that is already up.
    pub fn add(&self, name: &str) {
        self.links.lock().insert(name.to_string(), true);
    }

    /// Remove an interface the way the kernel does when it unregisters a
    /// device: a vxcan peer goes with it and so do gateway jobs on either.
    pub fn vanish(&self, name: &str) {
        let mut gone = vec![name.to_string()];
        gone.extend(self.peers.lock().remove(name));

        let mut links = self.links.lock();
        let mut namespaces = self.namespaces.lock();
        for name in &gone {
            links.remove(name);
            namespaces.remove(name);
        }
        self.jobs
            .lock()
            .retain(|(src, dst)| !gone.contains(src) && !gone.contains(dst));
    }

    fn exists(&self, name: &IfName) -> bool {
        self.links.lock().contains_key(name.as_str())
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
        links.insert(name.to_string(), false);
        if let LinkKind::Vxcan { peer } = kind {
            links.insert(peer.to_string(), false);
            self.peers.lock().insert(name.to_string(), peer.to_string());
        }
        Ok(LinkHandle::new(name.clone()))
    }

    fn lookup(&self, name: &IfName) -> MeshResult<LinkHandle> {
        if self.exists(name) {
            Ok(LinkHandle::new(name.clone()))
        } else {
            Err(MeshError::InterfaceNotFound {
                name: name.to_string(),
            })
        }
    }

    fn bring_up(&self, link: &LinkHandle) -> MeshResult<()> {
        if *self.fail_up.lock() {
            return Err(MeshError::external("ip link set up", "Operation not permitted"));
        }
        self.links.lock().insert(link.name().to_string(), true);
        Ok(())
    }

    fn bring_down(&self, link: &LinkHandle) -> MeshResult<()> {
        self.links.lock().insert(link.name().to_string(), false);
        Ok(())
    }

    fn remove(&self, link: &LinkHandle) -> MeshResult<()> {
        self.vanish(link.name().as_str());
        Ok(())
    }

    fn move_to_netns(&self, link: &LinkHandle, namespace: &NamespaceId) -> MeshResult<()> {
        self.namespaces
            .lock()
            .insert(link.name().to_string(), namespace.to_string());
        Ok(())
    }
}

/// Rule backend behaving like `cangw` on top of [`FakeLinks`]: jobs need
/// both devices to exist and only existing jobs can be deleted.
#[derive(Clone)]
pub struct FakeRules {
    pub links: Arc<FakeLinks>,
    pub calls: Arc<Mutex<usize>>,
    /// Fail every call once this many calls have succeeded.
    pub fail_after: Arc<Mutex<Option<usize>>>,
}

impl FakeRules {
    pub fn new(links: Arc<FakeLinks>) -> Self {
        Self {
            links,
            calls: Arc::default(),
            fail_after: Arc::default(),
        }
    }

    pub fn installed(&self) -> BTreeSet<(String, String)> {
        self.links.jobs.lock().clone()
    }

    fn tick(&self) -> MeshResult<()> {
        let limit = *self.fail_after.lock();
        let mut calls = self.calls.lock();
        if limit.is_some_and(|limit| *calls >= limit) {
            return Err(MeshError::external("cangw", "No buffer space available"));
        }
        *calls += 1;
        Ok(())
    }
}

impl RuleBackend for FakeRules {
    fn install(&mut self, rule: &Rule) -> MeshResult<()> {
        self.tick()?;
        if !self.links.exists(&rule.src) || !self.links.exists(&rule.dst) {
            return Err(MeshError::external("cangw -A", "No such device"));
        }
        let inserted = self
            .links
            .jobs
            .lock()
            .insert((rule.src.to_string(), rule.dst.to_string()));
        assert!(inserted, "rule {rule} installed twice");
        Ok(())
    }

    fn uninstall(&mut self, rule: &Rule) -> MeshResult<()> {
        self.tick()?;
        let removed = self
            .links
            .jobs
            .lock()
            .remove(&(rule.src.to_string(), rule.dst.to_string()));
        if !removed {
            return Err(MeshError::external("cangw -D", "No such file or directory"));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct FakeEndpoint {
    pub id: EndpointId,
    pub if_name: IfName,
    pub namespace: Option<NamespaceId>,
    pub detach_calls: usize,
    pub fail_attach: bool,
}

impl FakeEndpoint {
    pub fn new(id: &str, if_name: &str) -> Self {
        Self {
            id: EndpointId::new(id).unwrap(),
            if_name: IfName::new(if_name).unwrap(),
            namespace: None,
            detach_calls: 0,
            fail_attach: false,
        }
    }
}

impl Endpoint for FakeEndpoint {
    fn endpoint_id(&self) -> &EndpointId {
        &self.id
    }

    fn interface_name(&self) -> &IfName {
        &self.if_name
    }

    fn attach(&mut self, namespace: &NamespaceId) -> MeshResult<()> {
        if self.fail_attach {
            return Err(MeshError::InvalidNamespace {
                namespace: namespace.to_string(),
            });
        }
        self.namespace = Some(namespace.clone());
        Ok(())
    }

    fn detach(&mut self) -> MeshResult<()> {
        self.namespace = None;
        self.detach_calls += 1;
        Ok(())
    }
}

pub struct Harness {
    pub network: Network<FakeEndpoint>,
    pub links: Arc<FakeLinks>,
    pub rules: FakeRules,
}

impl Harness {
    /// Create the endpoint's interface and register the endpoint.
    pub fn register(&mut self, id: &str, if_name: &str) -> Option<FakeEndpoint> {
        self.register_endpoint(FakeEndpoint::new(id, if_name))
    }

    pub fn register_endpoint(&mut self, endpoint: FakeEndpoint) -> Option<FakeEndpoint> {
        self.links.add(endpoint.if_name.as_str());
        self.network.add_endpoint(endpoint)
    }
}

/// A network whose vcan interface does not exist yet.
pub fn harness(network_id: &str) -> Harness {
    let links = Arc::new(FakeLinks::default());
    let rules = FakeRules::new(links.clone());
    let network = Network::new(
        NetworkId::new(network_id).unwrap(),
        &MeshConfig::default(),
        links.clone(),
        rules.clone(),
    )
    .unwrap();
    Harness {
        network,
        links,
        rules,
    }
}

/// A network with its vcan interface created.
pub fn mesh_harness(network_id: &str) -> Harness {
    let h = harness(network_id);
    h.network.create_resource().unwrap();
    h
}

pub fn id(s: &str) -> EndpointId {
    EndpointId::new(s).unwrap()
}

pub fn ns(s: &str) -> NamespaceId {
    NamespaceId::new(s).unwrap()
}

pub fn ifname(s: &str) -> IfName {
    IfName::new(s).unwrap()
}

pub fn pair(src: &str, dst: &str) -> (String, String) {
    (src.to_string(), dst.to_string())
}
