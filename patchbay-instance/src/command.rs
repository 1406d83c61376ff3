//! Blocking external command execution with diagnosable failures.

use std::process::{Command, Output};

use crate::error::{io_err, InstanceError};

/// Render `cmd` as a shell-like string for logs and error messages.
pub fn describe(cmd: &Command) -> String {
    let mut parts = vec![cmd.get_program().to_string_lossy().into_owned()];
    parts.extend(cmd.get_args().map(|a| a.to_string_lossy().into_owned()));
    parts.join(" ")
}

/// Run `cmd` to completion; a non-zero exit is an error carrying the command
/// line, the exit status and trimmed stderr.
pub fn run_checked(mut cmd: Command) -> Result<Output, InstanceError> {
    let described = describe(&cmd);
    tracing::debug!(command = %described, "running");
    let output = cmd.output().map_err(|e| io_err(&described, e))?;
    if output.status.success() {
        return Ok(output);
    }
    Err(InstanceError::CommandFailed {
        command: described,
        status: output.status.to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
    })
}
