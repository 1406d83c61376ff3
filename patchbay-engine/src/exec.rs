//! Client command execution for backends.

use std::io::Write;
use std::process::{Command, Stdio};

use patchbay_instance::command::describe;

use crate::error::{io_err, EngineError};

/// Run `cmd` to completion, optionally feeding `stdin`, and return stdout.
///
/// A non-zero exit becomes [`EngineError::CommandFailed`] with the command
/// line, the exit status and trimmed stderr.
pub(crate) fn run(mut cmd: Command, stdin: Option<&[u8]>) -> Result<String, EngineError> {
    let described = describe(&cmd);
    tracing::debug!(command = %described, "running");

    cmd.stdin(if stdin.is_some() {
        Stdio::piped()
    } else {
        Stdio::null()
    })
    .stdout(Stdio::piped())
    .stderr(Stdio::piped());

    let mut child = cmd.spawn().map_err(|e| io_err(&described, e))?;
    let feeder = child.stdin.take();
    let output = std::thread::scope(|s| {
        if let (Some(mut pipe), Some(input)) = (feeder, stdin) {
            // Written from a separate thread so a chatty client can't
            // deadlock on a full stdout pipe.
            s.spawn(move || {
                let _ = pipe.write_all(input);
            });
        }
        child.wait_with_output()
    })
    .map_err(|e| io_err(&described, e))?;

    if !output.status.success() {
        return Err(EngineError::CommandFailed {
            command: described,
            status: output.status.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}
