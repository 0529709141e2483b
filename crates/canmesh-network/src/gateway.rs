//! Forwarding rules between CAN interfaces.
//!
//! A [`Gateway`] tracks the directed rules it has installed and makes
//! `add_rule`/`remove_rule` idempotent on top of a [`RuleBackend`], which
//! only ever sees real state changes. Rule symmetry is the caller's
//! concern: the gateway stores exactly the pairs it is given.

use std::collections::BTreeSet;
use std::fmt;

use canmesh_common::{IfName, MeshResult};

/// Directed forwarding permission: frames from `src` reach `dst`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Rule {
    /// Source interface.
    pub src: IfName,
    /// Destination interface.
    pub dst: IfName,
}

impl Rule {
    /// Create a rule from `src` to `dst`.
    #[must_use]
    pub const fn new(src: IfName, dst: IfName) -> Self {
        Self { src, dst }
    }

    /// Whether either end of the rule is `name`.
    #[must_use]
    pub fn involves(&self, name: &IfName) -> bool {
        &self.src == name || &self.dst == name
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {}", self.src, self.dst)
    }
}

/// Mechanism that installs rules in the kernel.
pub trait RuleBackend: Send {
    /// Install a rule that is not currently installed.
    fn install(&mut self, rule: &Rule) -> MeshResult<()>;

    /// Remove a rule that is currently installed.
    fn uninstall(&mut self, rule: &Rule) -> MeshResult<()>;
}

/// Set of forwarding rules owned by one network.
pub struct Gateway {
    rules: BTreeSet<Rule>,
    backend: Box<dyn RuleBackend>,
}

impl Gateway {
    /// Create an empty gateway on top of a backend.
    #[must_use]
    pub fn new(backend: impl RuleBackend + 'static) -> Self {
        Self {
            rules: BTreeSet::new(),
            backend: Box::new(backend),
        }
    }

    /// Ensure the rule `src -> dst` exists.
    ///
    /// # Errors
    ///
    /// Returns the backend error if installing fails; the rule is then not
    /// recorded.
    pub fn add_rule(&mut self, src: &IfName, dst: &IfName) -> MeshResult<()> {
        let rule = Rule::new(src.clone(), dst.clone());
        if self.rules.contains(&rule) {
            return Ok(());
        }

        tracing::debug!(%rule, "Adding gateway rule");
        self.backend.install(&rule)?;
        self.rules.insert(rule);
        Ok(())
    }

    /// Ensure the rule `src -> dst` does not exist.
    ///
    /// # Errors
    ///
    /// Returns the backend error if removal fails; the rule then stays
    /// recorded.
    pub fn remove_rule(&mut self, src: &IfName, dst: &IfName) -> MeshResult<()> {
        let rule = Rule::new(src.clone(), dst.clone());
        if !self.rules.contains(&rule) {
            return Ok(());
        }

        tracing::debug!(%rule, "Removing gateway rule");
        self.backend.uninstall(&rule)?;
        self.rules.remove(&rule);
        Ok(())
    }

    /// Remove every rule.
    ///
    /// # Errors
    ///
    /// Stops at the first backend failure; rules not yet removed stay
    /// recorded.
    pub fn clear(&mut self) -> MeshResult<()> {
        while let Some(rule) = self.rules.first().cloned() {
            self.backend.uninstall(&rule)?;
            self.rules.remove(&rule);
        }
        tracing::debug!("Gateway rules cleared");
        Ok(())
    }

    /// Drop every recorded rule involving `name` without touching the
    /// backend, returning how many were dropped.
    ///
    /// The kernel deletes CAN gateway jobs together with their device, so
    /// once an interface is gone its rules only exist in this set.
    pub fn forget_interface(&mut self, name: &IfName) -> usize {
        let before = self.rules.len();
        self.rules.retain(|rule| !rule.involves(name));
        let forgotten = before - self.rules.len();
        if forgotten > 0 {
            tracing::debug!(interface = %name, forgotten, "Forgot gateway rules");
        }
        forgotten
    }

    /// Whether `src -> dst` exists.
    #[must_use]
    pub fn contains(&self, src: &IfName, dst: &IfName) -> bool {
        self.rules.contains(&Rule::new(src.clone(), dst.clone()))
    }

    /// Iterate over the rules in `(src, dst)` order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter()
    }

    /// Number of rules.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether there are no rules.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl fmt::Debug for Gateway {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Gateway").field("rules", &self.rules).finish_non_exhaustive()
    }
}
