//! [`RuleBackend`] driving the `cangw` utility from can-utils.

use canmesh_common::{MeshConfig, MeshResult};

use crate::command;
use crate::gateway::{Rule, RuleBackend};

/// Installs rules as CAN gateway jobs in the kernel.
#[derive(Debug, Clone)]
pub struct CanGwBackend {
    program: String,
    echo: bool,
}

impl CanGwBackend {
    /// Use the given `cangw` binary.
    #[must_use]
    pub fn new(program: impl Into<String>, echo: bool) -> Self {
        Self {
            program: program.into(),
            echo,
        }
    }

    /// Use the `cangw` binary and echo setting from the configuration.
    #[must_use]
    pub fn from_config(config: &MeshConfig) -> Self {
        Self::new(config.cangw_binary.clone(), config.echo_frames)
    }

    fn args<'a>(&self, action: &'a str, rule: &'a Rule) -> Vec<&'a str> {
        // Removal only matches a job created with identical options.
        let mut args = vec![action, "-s", rule.src.as_str(), "-d", rule.dst.as_str()];
        if self.echo {
            args.push("-e");
        }
        args
    }
}

impl Default for CanGwBackend {
    fn default() -> Self {
        Self::from_config(&MeshConfig::default())
    }
}

impl RuleBackend for CanGwBackend {
    fn install(&mut self, rule: &Rule) -> MeshResult<()> {
        command::run(&self.program, &self.args("-A", rule))?;
        tracing::debug!(%rule, "CAN gateway job added");
        Ok(())
    }

    fn uninstall(&mut self, rule: &Rule) -> MeshResult<()> {
        command::run(&self.program, &self.args("-D", rule))?;
        tracing::debug!(%rule, "CAN gateway job removed");
        Ok(())
    }
}
