//! Helpers for driving `ip` and `cangw`.

use std::process::Command;

use canmesh_common::{MeshError, MeshResult};

/// Run a helper binary, failing with [`MeshError::External`] unless it
/// exits successfully.
pub(crate) fn run(program: &str, args: &[&str]) -> MeshResult<()> {
    let operation = describe(program, args);
    tracing::trace!(%operation, "Running command");

    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| MeshError::external(&operation, format!("failed to execute: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        let message = match stderr.trim() {
            "" => output.status.to_string(),
            text => text.to_string(),
        };
        return Err(MeshError::external(operation, message));
    }

    Ok(())
}

/// Run a helper binary and report only whether it succeeded.
pub(crate) fn succeeds(program: &str, args: &[&str]) -> bool {
    Command::new(program)
        .args(args)
        .output()
        .is_ok_and(|o| o.status.success())
}

fn describe(program: &str, args: &[&str]) -> String {
    let mut operation = program.to_string();
    for arg in args {
        operation.push(' ');
        operation.push_str(arg);
    }
    operation
}
