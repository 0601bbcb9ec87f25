//! Background worker processes tracked through a PID file.
//!
//! `worker start` spawns detached `queuectl worker run` processes and records
//! their PIDs, one per line. `worker stop` sends each live one SIGTERM; the
//! workers finish their current job before exiting.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use tracing::{debug, info, warn};

use crate::Result;

/// Environment variable naming the PID file directly.
pub const PID_FILE_ENV: &str = "QUEUECTL_PIDFILE";
/// Environment variable naming the directory holding `workers.pid`.
pub const PID_DIR_ENV: &str = "QUEUECTL_PIDDIR";

const DEFAULT_PID_DIR: &str = ".queuectl";
const PID_FILE_NAME: &str = "workers.pid";

/// PID file location from the environment.
pub fn pid_file_from_env() -> PathBuf {
    if let Some(file) = non_empty_env(PID_FILE_ENV) {
        return PathBuf::from(file);
    }
    let dir = non_empty_env(PID_DIR_ENV).unwrap_or_else(|| OsString::from(DEFAULT_PID_DIR));
    PathBuf::from(dir).join(PID_FILE_NAME)
}

fn non_empty_env(key: &str) -> Option<OsString> {
    std::env::var_os(key).filter(|v| !v.is_empty())
}

pub struct WorkerSupervisor {
    pid_file: PathBuf,
}

impl WorkerSupervisor {
    pub fn new(pid_file: impl Into<PathBuf>) -> Self {
        Self {
            pid_file: pid_file.into(),
        }
    }

    pub fn from_env() -> Self {
        Self::new(pid_file_from_env())
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// PIDs recorded in the file. A missing file means no workers.
    pub fn recorded(&self) -> Result<Vec<u32>> {
        let contents = match fs::read_to_string(&self.pid_file) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        Ok(contents
            .lines()
            .filter_map(|line| match line.trim().parse::<u32>() {
                Ok(pid) if pid > 0 => Some(pid),
                _ => {
                    if !line.trim().is_empty() {
                        warn!("Ignoring malformed PID file line: {:?}", line);
                    }
                    None
                }
            })
            .collect())
    }

    /// Recorded PIDs whose process is still running.
    pub fn active(&self) -> Result<Vec<u32>> {
        Ok(self
            .recorded()?
            .into_iter()
            .filter(|pid| process_utils::is_alive(*pid))
            .collect())
    }

    fn write(&self, pids: &[u32]) -> Result<()> {
        if let Some(parent) = self.pid_file.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let mut contents = String::new();
        for pid in pids {
            contents.push_str(&pid.to_string());
            contents.push('\n');
        }
        fs::write(&self.pid_file, contents)?;
        Ok(())
    }

    /// Spawn `count` (at least one) `queuectl worker run` processes against
    /// `db_path`.
    pub fn start(&self, count: usize, db_path: &Path) -> Result<Vec<u32>> {
        let exe = std::env::current_exe()?;
        self.spawn_with(count, || {
            let mut cmd = process_utils::std_command(&exe);
            cmd.arg("--db").arg(db_path).args(["worker", "run"]);
            cmd
        })
    }

    /// Spawn `count` detached processes built by `make_command` and record
    /// them alongside the workers that are still alive.
    pub fn spawn_with<F>(&self, count: usize, mut make_command: F) -> Result<Vec<u32>>
    where
        F: FnMut() -> Command,
    {
        let mut pids = self.active()?;
        let mut started = Vec::with_capacity(count.max(1));

        for _ in 0..count.max(1) {
            let mut cmd = make_command();
            cmd.stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            detach(&mut cmd);

            let child = cmd.spawn()?;
            let pid = child.id();
            debug!(pid, "Spawned worker process");
            started.push(pid);
        }

        pids.extend(&started);
        self.write(&pids)?;
        info!(
            count = started.len(),
            pid_file = %self.pid_file.display(),
            "Started worker processes"
        );
        Ok(started)
    }

    /// Signal every live worker to stop and clear the PID file.
    ///
    /// Returns how many processes were signalled.
    pub fn stop(&self) -> Result<usize> {
        let mut signalled = 0;
        for pid in self.active()? {
            match process_utils::terminate(pid) {
                Ok(()) => {
                    debug!(pid, "Sent SIGTERM to worker");
                    signalled += 1;
                }
                Err(e) => warn!(pid, "Failed to signal worker: {}", e),
            }
        }
        self.write(&[])?;
        info!(signalled, "Stopped worker processes");
        Ok(signalled)
    }
}

/// Put the child in its own process group so terminal signals aimed at the
/// launching shell do not reach it.
#[cfg(unix)]
fn detach(cmd: &mut Command) {
    use std::os::unix::process::CommandExt;
    cmd.process_group(0);
}

#[cfg(not(unix))]
fn detach(_cmd: &mut Command) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_pid_file_means_no_workers() {
        let dir = TempDir::new().unwrap();
        let supervisor = WorkerSupervisor::new(dir.path().join("nested/workers.pid"));
        assert!(supervisor.recorded().unwrap().is_empty());
        assert!(supervisor.active().unwrap().is_empty());
    }

    #[test]
    fn test_pid_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let supervisor = WorkerSupervisor::new(dir.path().join("run/workers.pid"));
        supervisor.write(&[12, 34]).unwrap();
        assert_eq!(supervisor.recorded().unwrap(), vec![12, 34]);

        fs::write(supervisor.pid_file(), "5\n\ngarbage\n0\n6\n").unwrap();
        assert_eq!(supervisor.recorded().unwrap(), vec![5, 6]);
    }

    #[test]
    fn test_active_filters_dead_pids() {
        let dir = TempDir::new().unwrap();
        let supervisor = WorkerSupervisor::new(dir.path().join("workers.pid"));
        let me = std::process::id();
        supervisor.write(&[me, u32::MAX]).unwrap();
        assert_eq!(supervisor.active().unwrap(), vec![me]);
    }

    #[cfg(unix)]
    #[test]
    fn test_spawn_and_stop() {
        let dir = TempDir::new().unwrap();
        let supervisor = WorkerSupervisor::new(dir.path().join("workers.pid"));

        let started = supervisor
            .spawn_with(2, || {
                let mut cmd = process_utils::std_command("sleep");
                cmd.arg("30");
                cmd
            })
            .unwrap();
        assert_eq!(started.len(), 2);
        assert_eq!(supervisor.recorded().unwrap(), started);

        assert_eq!(supervisor.stop().unwrap(), 2);
        assert!(supervisor.recorded().unwrap().is_empty());
    }

    #[cfg(unix)]
    #[test]
    fn test_spawn_at_least_one() {
        let dir = TempDir::new().unwrap();
        let supervisor = WorkerSupervisor::new(dir.path().join("workers.pid"));
        let started = supervisor
            .spawn_with(0, || {
                let mut cmd = process_utils::std_command("sleep");
                cmd.arg("30");
                cmd
            })
            .unwrap();
        assert_eq!(started.len(), 1);
        supervisor.stop().unwrap();
    }
}
