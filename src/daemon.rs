//! Worker PID file and process control.

use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// What the PID file says about the worker.
#[derive(Debug, Clone, PartialEq)]
pub enum WorkerState {
    Running {
        pid: u32,
        started_at: Option<DateTime<Utc>>,
    },
    /// The file names a process that is gone.
    Stale { pid: u32 },
    Stopped,
}

/// Location of the worker PID file.
///
/// Line one is the PID, line two the RFC 3339 start time.
#[derive(Debug, Clone)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read(&self) -> Result<Option<(u32, Option<DateTime<Utc>>)>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let mut lines = content.lines();
        let pid = lines
            .next()
            .and_then(|l| l.trim().parse::<u32>().ok())
            .ok_or_else(|| {
                Error::Worker(format!("Malformed PID file {}", self.path.display()))
            })?;
        let started_at = lines
            .next()
            .and_then(|l| DateTime::parse_from_rfc3339(l.trim()).ok())
            .map(|t| t.with_timezone(&Utc));
        Ok(Some((pid, started_at)))
    }

    pub fn state(&self) -> Result<WorkerState> {
        Ok(match self.read()? {
            Some((pid, started_at)) if is_pid_alive(pid) => {
                WorkerState::Running { pid, started_at }
            }
            Some((pid, _)) => WorkerState::Stale { pid },
            None => WorkerState::Stopped,
        })
    }

    /// Record the current process as the worker.
    ///
    /// Fails if another live worker holds the file. A stale file is replaced.
    /// The file is removed when the guard drops.
    pub fn acquire(&self) -> Result<PidGuard> {
        match self.state()? {
            WorkerState::Running { pid, .. } if pid != std::process::id() => {
                return Err(Error::Worker(format!("Worker already running (PID {})", pid)));
            }
            WorkerState::Stale { pid } => {
                tracing::warn!("Replacing stale PID file for {}", pid);
            }
            _ => {}
        }

        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let pid = std::process::id();
        std::fs::write(&self.path, format!("{}\n{}\n", pid, Utc::now().to_rfc3339()))?;
        tracing::debug!("Wrote PID {} to {}", pid, self.path.display());

        Ok(PidGuard {
            path: self.path.clone(),
        })
    }

    /// Signal the recorded worker to terminate and clear the file.
    ///
    /// Returns the PID that was signalled, or `None` if no worker was running.
    pub fn stop(&self) -> Result<Option<u32>> {
        match self.state()? {
            WorkerState::Running { pid, .. } => {
                let out = std::process::Command::new("kill")
                    .arg(pid.to_string())
                    .output()?;
                if !out.status.success() {
                    let err = String::from_utf8_lossy(&out.stderr).to_string();
                    return Err(Error::Worker(format!(
                        "Failed to stop PID {}: {}",
                        pid,
                        err.trim()
                    )));
                }
                self.clear()?;
                Ok(Some(pid))
            }
            WorkerState::Stale { .. } => {
                self.clear()?;
                Ok(None)
            }
            WorkerState::Stopped => Ok(None),
        }
    }

    fn clear(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

/// Removes the PID file on drop.
#[derive(Debug)]
pub struct PidGuard {
    path: PathBuf,
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!("Failed to remove PID file {}: {}", self.path.display(), e);
            }
        }
    }
}

pub fn is_pid_alive(pid: u32) -> bool {
    std::process::Command::new("kill")
        .arg("-0")
        .arg(pid.to_string())
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    // Larger than any default pid_max
    const DEAD_PID: u32 = 2_000_000_000;

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let pid_file = PidFile::new(dir.path().join("run").join("worker.pid"));
        assert_eq!(pid_file.state().unwrap(), WorkerState::Stopped);

        let guard = pid_file.acquire().unwrap();
        match pid_file.state().unwrap() {
            WorkerState::Running { pid, started_at } => {
                assert_eq!(pid, std::process::id());
                assert!(started_at.is_some());
            }
            other => panic!("expected running, got {:?}", other),
        }

        drop(guard);
        assert!(!pid_file.path().exists());
    }

    #[test]
    fn test_stale_pid_is_replaced() {
        let dir = TempDir::new().unwrap();
        let pid_file = PidFile::new(dir.path().join("worker.pid"));
        std::fs::write(pid_file.path(), format!("{}\n", DEAD_PID)).unwrap();

        assert_eq!(
            pid_file.state().unwrap(),
            WorkerState::Stale { pid: DEAD_PID }
        );
        let _guard = pid_file.acquire().unwrap();
        let content = std::fs::read_to_string(pid_file.path()).unwrap();
        assert!(content.starts_with(&std::process::id().to_string()));
    }

    #[test]
    fn test_malformed_pid_file() {
        let dir = TempDir::new().unwrap();
        let pid_file = PidFile::new(dir.path().join("worker.pid"));
        std::fs::write(pid_file.path(), "not a pid").unwrap();

        assert!(matches!(pid_file.state(), Err(Error::Worker(_))));
    }

    #[test]
    fn test_stop_running_worker() {
        let dir = TempDir::new().unwrap();
        let pid_file = PidFile::new(dir.path().join("worker.pid"));
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        std::fs::write(pid_file.path(), format!("{}\n", child.id())).unwrap();

        assert_eq!(pid_file.stop().unwrap(), Some(child.id()));
        assert!(!child.wait().unwrap().success());
        assert!(!pid_file.path().exists());
    }

    #[test]
    fn test_stop_without_worker() {
        let dir = TempDir::new().unwrap();
        let pid_file = PidFile::new(dir.path().join("worker.pid"));
        assert_eq!(pid_file.stop().unwrap(), None);

        std::fs::write(pid_file.path(), format!("{}\n", DEAD_PID)).unwrap();
        assert_eq!(pid_file.stop().unwrap(), None);
        assert!(!pid_file.path().exists());
    }
}
