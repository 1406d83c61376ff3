//! Best-effort reaping of instances left behind by crashed or killed runs.
//!
//! # Caveat
//!
//! The scan is host-wide over `base_dir`: every directory following the
//! naming convention is treated as an orphan, including instances that
//! belong to another patchbay run executing concurrently with the same
//! `base_dir` and prefix (e.g. a test run started with "keep running").
//! Concurrent runs that must not interfere should use distinct prefixes or
//! base directories, or skip cleanup.

use std::fs;
use std::path::{Path, PathBuf};

use crate::paths::InstanceLayout;
use crate::process::{is_alive, process_cwd, terminate, StopPolicy};

/// An instance directory the scan could not clean.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrphanFailure {
    pub path: PathBuf,
    pub reason: String,
}

/// What a cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrphanReport {
    /// Instance directories removed.
    pub reaped: Vec<PathBuf>,
    /// Servers that were still running and got stopped.
    pub stopped: Vec<i32>,
    /// Directories that could not be cleaned; the scan carried on.
    pub failed: Vec<OrphanFailure>,
}

/// Stop and remove every instance directory under `base_dir` whose name
/// starts with `prefix`. Never fails: problems are logged and reported.
pub fn cleanup_orphans(base_dir: &Path, prefix: &str, policy: &StopPolicy) -> OrphanReport {
    let mut report = OrphanReport::default();
    let entries = match fs::read_dir(base_dir) {
        Ok(entries) => entries,
        Err(err) => {
            tracing::debug!(base = %base_dir.display(), error = %err, "orphan scan skipped");
            return report;
        }
    };

    let mut candidates: Vec<PathBuf> = entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| InstanceLayout::matches_convention(p, prefix))
        .collect();
    candidates.sort();

    for dir in candidates {
        match reap(&dir, policy) {
            Ok(stopped) => {
                tracing::info!(instance = %dir.display(), "reaped orphaned instance");
                report.stopped.extend(stopped);
                report.reaped.push(dir);
            }
            Err(reason) => {
                tracing::warn!(instance = %dir.display(), %reason, "could not reap orphaned instance");
                report.failed.push(OrphanFailure { path: dir, reason });
            }
        }
    }
    report
}

fn reap(dir: &Path, policy: &StopPolicy) -> Result<Option<i32>, String> {
    let layout = InstanceLayout::new(dir);
    let mut stopped = None;

    if let Some(pid) = read_pid(&layout.pid_path()) {
        if is_alive(pid) && owned_by(pid, dir) {
            terminate(pid, policy, || is_alive(pid)).map_err(|e| e.to_string())?;
            stopped = Some(pid);
        } else if is_alive(pid) {
            tracing::debug!(pid, instance = %dir.display(), "pid was reused by an unrelated process; not signalling");
        }
    }

    fs::remove_dir_all(dir).map_err(|e| format!("remove {}: {e}", dir.display()))?;
    Ok(stopped)
}

fn read_pid(path: &Path) -> Option<i32> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

/// Whether `pid` is running out of `dir`. Servers are spawned with the
/// instance root as working directory (and may chdir into `data/`). Where
/// `/proc` is unavailable the pid file is trusted.
fn owned_by(pid: i32, dir: &Path) -> bool {
    let Some(cwd) = process_cwd(pid) else {
        return !Path::new("/proc/self").exists();
    };
    let root = fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf());
    cwd.starts_with(&root)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::{Command, Stdio};
    use std::time::Duration;

    use crate::backoff::Backoff;
    use crate::paths::{DATA_DIR, PID_FILE};
    use tempfile::TempDir;

    fn fast_policy() -> StopPolicy {
        StopPolicy {
            backoff: Backoff {
                initial: Duration::from_millis(10),
                factor: 2,
                max: Duration::from_millis(100),
            },
            graceful_polls: 20,
            kill_polls: 20,
        }
    }

    #[test]
    fn removes_dead_instance_dirs_and_ignores_others() {
        let base = TempDir::new().unwrap();
        let dead = base.path().join("pb-100-1");
        fs::create_dir_all(dead.join(DATA_DIR)).unwrap();
        fs::write(dead.join(PID_FILE), "999999999\n").unwrap();
        let unrelated = base.path().join("someone-else");
        fs::create_dir_all(unrelated.join(DATA_DIR)).unwrap();

        let report = cleanup_orphans(base.path(), "pb-", &fast_policy());
        assert_eq!(report.reaped, vec![dead.clone()]);
        assert!(report.stopped.is_empty());
        assert!(!dead.exists());
        assert!(unrelated.exists());
    }

    #[test]
    fn stops_running_orphan_server() {
        let base = TempDir::new().unwrap();
        let dir = base.path().join("pb-200-1");
        fs::create_dir_all(dir.join(DATA_DIR)).unwrap();
        let mut child = Command::new("sleep")
            .arg("30")
            .current_dir(&dir)
            .stdout(Stdio::null())
            .spawn()
            .unwrap();
        let pid = child.id() as i32;
        fs::write(dir.join(PID_FILE), format!("{pid}\n")).unwrap();

        // Reap from a helper thread so the zombie is collected by `wait`.
        let report = std::thread::scope(|s| {
            let reaper = s.spawn(|| {
                let _ = child.wait();
            });
            let report = cleanup_orphans(base.path(), "pb-", &fast_policy());
            let _ = reaper.join();
            report
        });
        assert_eq!(report.stopped, vec![pid]);
        assert!(!dir.exists());
    }

    #[test]
    fn missing_base_dir_is_an_empty_report() {
        let base = TempDir::new().unwrap();
        let report = cleanup_orphans(&base.path().join("nope"), "pb-", &fast_policy());
        assert_eq!(report, OrphanReport::default());
    }
}
