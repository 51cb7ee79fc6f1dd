//! PID-file control interface.
//!
//! The PID file doubles as the control channel: its presence signals a
//! running instance, and any process can request graceful termination
//! by overwriting its content with the sentinel `quit`. The running
//! engine notices the sentinel during the step-loop stop-condition
//! check.

use std::path::{Path, PathBuf};
use std::time::Duration;

use mqrelay_types::EngineError;

/// Writing this into the PID file requests graceful termination.
pub const QUIT_SENTINEL: &str = "quit";

/// Reported state of an instance, as seen through its PID file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Running { pid: u32, uptime: Duration },
    Stopped,
}

/// Exclusive holder of the PID file for this process's lifetime.
/// The file is removed on drop.
#[derive(Debug)]
pub struct PidFile {
    path: PathBuf,
}

impl PidFile {
    /// Create the PID file, refusing if another live instance holds it.
    ///
    /// # Errors
    ///
    /// Returns a config error when a live instance is detected or the
    /// file cannot be written.
    pub fn create(path: impl Into<PathBuf>) -> Result<Self, EngineError> {
        let path = path.into();
        if let Status::Running { pid, .. } = status(&path) {
            return Err(EngineError::config(format!(
                "another instance (pid {pid}) already holds {}",
                path.display()
            )));
        }
        std::fs::write(&path, format!("{}\n", std::process::id())).map_err(|e| {
            EngineError::config(format!("cannot write pidfile {}: {e}", path.display()))
        })?;
        Ok(Self { path })
    }

    /// Whether some process has written the quit sentinel.
    #[must_use]
    pub fn quit_requested(&self) -> bool {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => content.trim() == QUIT_SENTINEL,
            // An unreadable or vanished pidfile also means: stop.
            Err(_) => true,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for PidFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(pidfile = %self.path.display(), error = %e, "failed to remove pidfile");
            }
        }
    }
}

/// Ask the instance holding `path` to terminate gracefully.
///
/// # Errors
///
/// Returns a config error when no instance is running there.
pub fn request_quit(path: &Path) -> Result<(), EngineError> {
    match status(path) {
        Status::Running { .. } => std::fs::write(path, QUIT_SENTINEL).map_err(|e| {
            EngineError::config(format!("cannot write pidfile {}: {e}", path.display()))
        }),
        Status::Stopped => Err(EngineError::config(format!(
            "no running instance at {}",
            path.display()
        ))),
    }
}

/// Query the instance state behind a PID file.
#[must_use]
pub fn status(path: &Path) -> Status {
    let Ok(content) = std::fs::read_to_string(path) else {
        return Status::Stopped;
    };
    let Ok(pid) = content.trim().parse::<u32>() else {
        // Sentinel or garbage: no queryable instance.
        return Status::Stopped;
    };
    if !Path::new(&format!("/proc/{pid}")).exists() {
        return Status::Stopped;
    }
    let uptime = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .ok()
        .and_then(|mtime| mtime.elapsed().ok())
        .unwrap_or(Duration::ZERO);
    Status::Running { pid, uptime }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_writes_own_pid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.pid");
        let pidfile = PidFile::create(&path).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.trim(), std::process::id().to_string());
        assert!(!pidfile.quit_requested());
    }

    #[test]
    fn create_refuses_live_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.pid");
        let _held = PidFile::create(&path).unwrap();
        // Our own pid is alive, so a second create must refuse.
        let err = PidFile::create(&path).unwrap_err();
        assert!(err.to_string().contains("already holds"));
    }

    #[test]
    fn stale_pidfile_is_replaced() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.pid");
        // A pid that cannot exist on Linux (beyond pid_max).
        std::fs::write(&path, "4999999").unwrap();
        assert_eq!(status(&path), Status::Stopped);
        let _pidfile = PidFile::create(&path).unwrap();
    }

    #[test]
    fn quit_sentinel_is_noticed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.pid");
        let pidfile = PidFile::create(&path).unwrap();
        request_quit(&path).unwrap();
        assert!(pidfile.quit_requested());
    }

    #[test]
    fn request_quit_without_instance_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.pid");
        assert!(request_quit(&path).is_err());
    }

    #[test]
    fn drop_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.pid");
        {
            let _pidfile = PidFile::create(&path).unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }

    #[test]
    fn status_reports_running_instance() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.pid");
        let _pidfile = PidFile::create(&path).unwrap();
        match status(&path) {
            Status::Running { pid, .. } => assert_eq!(pid, std::process::id()),
            Status::Stopped => panic!("expected running"),
        }
    }
}
