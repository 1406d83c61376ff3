//! Disposable database server instances.
//!
//! An [`EphemeralInstance`] owns a private directory (see [`crate::paths`])
//! and the server process running out of it. Lifecycle:
//!
//! 1. [`EphemeralInstance::create`] — allocate the directory, run the
//!    engine's init command, spawn the server with output going to
//!    `server.log`, record its pid.
//! 2. [`EphemeralInstance::wait_ready`] — poll `server.log` for the engine's
//!    readiness marker with backoff; timing out is fatal and not retried.
//! 3. [`EphemeralInstance::stop`] / [`EphemeralInstance::destroy`], or both
//!    via [`EphemeralInstance::teardown`].
//!
//! The engine specifics (which binaries, which flags, which marker) come from
//! an [`InstanceEngine`] implementation.

use std::fs::{self, DirBuilder, File};
use std::io::ErrorKind;
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::backoff::{poll_until, Backoff, PollLimit, PollOutcome};
use crate::command::{describe, run_checked};
use crate::error::{io_err, InstanceError};
use crate::paths::InstanceLayout;
use crate::process::{is_alive, terminate, StopPolicy};

/// Engine-specific commands for bootstrapping an instance.
pub trait InstanceEngine {
    /// Initialise an empty cluster in `layout.data_dir()`.
    fn init_command(&self, layout: &InstanceLayout) -> Command;

    /// Run the server in the foreground, listening only on
    /// `layout.socket_dir()`.
    fn server_command(&self, layout: &InstanceLayout) -> Command;

    /// Line fragment the server logs once it accepts connections.
    fn ready_marker(&self) -> &str;
}

/// Where and how instances are created and stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceOptions {
    pub base_dir: PathBuf,
    pub prefix: String,
    pub stop: StopPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    Created,
    Ready,
    TornDown,
}

impl InstanceState {
    fn label(self) -> &'static str {
        match self {
            InstanceState::Created => "created",
            InstanceState::Ready => "ready",
            InstanceState::TornDown => "torn down",
        }
    }
}

#[derive(Debug)]
pub struct EphemeralInstance {
    layout: InstanceLayout,
    state: InstanceState,
    pid: Option<i32>,
    child: Option<Child>,
    stop_policy: StopPolicy,
}

impl EphemeralInstance {
    /// Allocate a private directory, initialise it, and start the server.
    ///
    /// On failure everything created so far is stopped and removed.
    pub fn create(
        engine: &dyn InstanceEngine,
        options: &InstanceOptions,
    ) -> Result<Self, InstanceError> {
        let root = allocate_dir(&options.base_dir, &options.prefix)?;
        let mut instance = Self {
            layout: InstanceLayout::new(root),
            state: InstanceState::Created,
            pid: None,
            child: None,
            stop_policy: options.stop,
        };

        if let Err(err) = instance.init_and_spawn(engine) {
            if instance.pid.is_some() {
                if let Err(stop_err) = instance.stop() {
                    tracing::warn!(error = %stop_err, "failed to stop half-created instance");
                }
            }
            let _ = fs::remove_dir_all(&instance.layout.root);
            return Err(err);
        }

        tracing::info!(
            instance = %instance.layout.root.display(),
            pid = instance.pid.unwrap_or_default(),
            "started ephemeral instance",
        );
        Ok(instance)
    }

    fn init_and_spawn(&mut self, engine: &dyn InstanceEngine) -> Result<(), InstanceError> {
        let socket_dir = self.layout.socket_dir();
        private_dir(&socket_dir)?;

        run_checked(engine.init_command(&self.layout))?;

        let log_path = self.layout.log_path();
        let log = File::create(&log_path).map_err(|e| io_err(&log_path, e))?;
        let log_err = log.try_clone().map_err(|e| io_err(&log_path, e))?;

        let mut cmd = engine.server_command(&self.layout);
        cmd.current_dir(&self.layout.root)
            .stdin(Stdio::null())
            .stdout(Stdio::from(log))
            .stderr(Stdio::from(log_err));
        let described = describe(&cmd);
        let child = cmd.spawn().map_err(|e| io_err(&described, e))?;
        let pid = child.id() as i32;
        self.child = Some(child);
        self.pid = Some(pid);

        let pid_path = self.layout.pid_path();
        fs::write(&pid_path, format!("{pid}\n")).map_err(|e| io_err(&pid_path, e))?;
        Ok(())
    }

    pub fn layout(&self) -> &InstanceLayout {
        &self.layout
    }

    pub fn root(&self) -> &Path {
        &self.layout.root
    }

    pub fn state(&self) -> InstanceState {
        self.state
    }

    pub fn pid(&self) -> Option<i32> {
        self.pid
    }

    /// Block until the server log contains `marker`, polling with backoff.
    pub fn wait_ready(&mut self, marker: &str, timeout: Duration) -> Result<(), InstanceError> {
        match self.state {
            InstanceState::Ready => return Ok(()),
            InstanceState::Created => {}
            InstanceState::TornDown => {
                return Err(InstanceError::InvalidState {
                    root: self.layout.root.clone(),
                    expected: InstanceState::Created.label(),
                    actual: self.state.label(),
                })
            }
        }

        let log_path = self.layout.log_path();
        let root = &self.layout.root;
        let child = &mut self.child;
        let outcome = poll_until(&Backoff::default(), PollLimit::timeout(timeout), || {
            if let Some(child) = child.as_mut() {
                if let Some(status) = child.try_wait().map_err(|e| io_err(root, e))? {
                    return Err(InstanceError::ServerExited {
                        root: root.clone(),
                        status: status.to_string(),
                        log_tail: log_tail(&log_path, 10),
                    });
                }
            }
            Ok(log_contains(&log_path, marker)?.then_some(()))
        })?;

        match outcome {
            PollOutcome::Ready { attempts, .. } => {
                tracing::debug!(instance = %root.display(), polls = attempts, "instance ready");
                self.state = InstanceState::Ready;
                Ok(())
            }
            PollOutcome::TimedOut { elapsed, .. } => Err(InstanceError::InstanceStartTimeout {
                root: root.clone(),
                waited: elapsed,
                log_tail: log_tail(&log_path, 10),
            }),
        }
    }

    /// Stop the server process. Without a recorded pid this only logs.
    pub fn stop(&mut self) -> Result<(), InstanceError> {
        let Some(pid) = self.pid else {
            tracing::warn!(
                instance = %self.layout.root.display(),
                "no recorded server pid; nothing to stop",
            );
            self.state = InstanceState::TornDown;
            return Ok(());
        };

        let policy = self.stop_policy;
        let child = &mut self.child;
        let outcome = terminate(pid, &policy, || match child.as_mut() {
            Some(c) => matches!(c.try_wait(), Ok(None)),
            None => is_alive(pid),
        })?;
        tracing::debug!(instance = %self.layout.root.display(), pid, ?outcome, "stopped instance");

        self.pid = None;
        self.child = None;
        self.state = InstanceState::TornDown;
        let pid_path = self.layout.pid_path();
        match fs::remove_file(&pid_path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(pid_path, err)),
        }
    }

    /// Remove the instance directory. Safe after a failed or skipped stop.
    pub fn destroy(self) -> Result<(), InstanceError> {
        let root = self.layout.root;
        match fs::remove_dir_all(&root) {
            Ok(()) => {
                tracing::debug!(instance = %root.display(), "removed instance directory");
                Ok(())
            }
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => Err(io_err(root, err)),
        }
    }

    /// Stop, then destroy even if stopping failed. Reports the first error.
    pub fn teardown(mut self) -> Result<(), InstanceError> {
        let stopped = self.stop();
        if let Err(err) = &stopped {
            tracing::warn!(instance = %self.layout.root.display(), error = %err, "stop failed; removing directory anyway");
        }
        let destroyed = self.destroy();
        stopped.and(destroyed)
    }

    /// Give up ownership without stopping: the server keeps running and the
    /// directory stays for inspection (and for a later orphan scan).
    pub fn detach(self) -> (InstanceLayout, Option<i32>) {
        tracing::info!(
            instance = %self.layout.root.display(),
            pid = self.pid.unwrap_or_default(),
            "leaving ephemeral instance running",
        );
        (self.layout, self.pid)
    }
}

/// Create `<base>/<prefix><pid>-<nanos>` with mode 0700.
fn allocate_dir(base: &Path, prefix: &str) -> Result<PathBuf, InstanceError> {
    fs::create_dir_all(base).map_err(|e| io_err(base, e))?;
    let own_pid = std::process::id();
    let mut last_err = None;
    for _ in 0..16 {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or_default();
        let candidate = base.join(format!("{prefix}{own_pid}-{nanos}"));
        match DirBuilder::new().mode(0o700).create(&candidate) {
            Ok(()) => return Ok(candidate),
            Err(err) if err.kind() == ErrorKind::AlreadyExists => last_err = Some(err),
            Err(err) => return Err(io_err(candidate, err)),
        }
    }
    Err(io_err(
        base,
        last_err.unwrap_or_else(|| std::io::Error::other("could not allocate instance directory")),
    ))
}

fn private_dir(path: &Path) -> Result<(), InstanceError> {
    DirBuilder::new()
        .recursive(true)
        .mode(0o700)
        .create(path)
        .map_err(|e| io_err(path, e))
}

fn log_contains(path: &Path, marker: &str) -> Result<bool, InstanceError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(content.contains(marker)),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(io_err(path, err)),
    }
}

fn log_tail(path: &Path, lines: usize) -> String {
    let content = fs::read_to_string(path).unwrap_or_default();
    let all: Vec<&str> = content.lines().collect();
    all[all.len().saturating_sub(lines)..].join("\n")
}
