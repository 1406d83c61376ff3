//! Signal-based process shutdown: SIGTERM, poll, escalate to SIGKILL.

use std::path::PathBuf;

use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;

use crate::backoff::{poll_until, Backoff, PollLimit, PollOutcome};
use crate::error::InstanceError;

/// How [`terminate`] waits for a process to go away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StopPolicy {
    pub backoff: Backoff,
    /// Polls after SIGTERM before escalating to SIGKILL.
    pub graceful_polls: u32,
    /// Polls after SIGKILL before giving up with `InstanceStopTimeout`.
    pub kill_polls: u32,
}

impl Default for StopPolicy {
    fn default() -> Self {
        Self {
            backoff: Backoff::default(),
            graceful_polls: 10,
            kill_polls: 5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Nothing to stop.
    AlreadyExited,
    /// Exited after SIGTERM.
    Terminated { polls: u32 },
    /// Needed SIGKILL.
    Killed,
}

/// `true` while `pid` exists (including processes we may not signal).
pub fn is_alive(pid: i32) -> bool {
    if pid <= 1 {
        return false;
    }
    match signal::kill(Pid::from_raw(pid), None) {
        Ok(()) | Err(Errno::EPERM) => !is_zombie(pid),
        Err(_) => false,
    }
}

/// A zombie has exited but was never waited for; it cannot be signalled
/// away. Only detectable through `/proc`.
fn is_zombie(pid: i32) -> bool {
    let Ok(stat) = std::fs::read_to_string(format!("/proc/{pid}/stat")) else {
        return false;
    };
    // The state follows the parenthesised command name, which may itself
    // contain spaces or parentheses.
    stat.rsplit_once(')')
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .is_some_and(|state| state == "Z")
}

/// Working directory of `pid`, when the platform exposes it (`/proc`).
pub fn process_cwd(pid: i32) -> Option<PathBuf> {
    std::fs::read_link(format!("/proc/{pid}/cwd")).ok()
}

/// Stop `pid` gracefully, escalating to SIGKILL.
///
/// `alive` decides whether the process is still around; callers holding a
/// `Child` pass a `try_wait`-based probe so the zombie gets reaped.
pub fn terminate(
    pid: i32,
    policy: &StopPolicy,
    mut alive: impl FnMut() -> bool,
) -> Result<StopOutcome, InstanceError> {
    if pid <= 1 {
        return Err(InstanceError::UnsafePid { pid });
    }
    if !alive() {
        return Ok(StopOutcome::AlreadyExited);
    }

    send(pid, Signal::SIGTERM)?;
    let graceful = poll_until(
        &policy.backoff,
        PollLimit::attempts(policy.graceful_polls.max(1)),
        || Ok::<_, InstanceError>((!alive()).then_some(())),
    )?;
    if let PollOutcome::Ready { attempts, .. } = graceful {
        tracing::debug!(pid, polls = attempts, "process exited after SIGTERM");
        return Ok(StopOutcome::Terminated { polls: attempts });
    }

    tracing::warn!(
        pid,
        polls = policy.graceful_polls,
        "process ignored SIGTERM; sending SIGKILL",
    );
    send(pid, Signal::SIGKILL)?;
    let killed = poll_until(
        &policy.backoff,
        PollLimit::attempts(policy.kill_polls.max(1)),
        || Ok::<_, InstanceError>((!alive()).then_some(())),
    )?;
    match killed {
        PollOutcome::Ready { .. } => Ok(StopOutcome::Killed),
        PollOutcome::TimedOut { attempts, .. } => Err(InstanceError::InstanceStopTimeout {
            pid,
            polls: attempts,
        }),
    }
}

fn send(pid: i32, sig: Signal) -> Result<(), InstanceError> {
    match signal::kill(Pid::from_raw(pid), sig) {
        Ok(()) => Ok(()),
        // Exited between the probe and the signal.
        Err(Errno::ESRCH) => Ok(()),
        Err(source) => Err(InstanceError::Signal { pid, source }),
    }
}
