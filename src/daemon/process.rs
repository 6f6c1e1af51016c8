//! Daemon process management
//!
//! Handles detaching the watcher, PID file management, and stopping a
//! detached watcher.

use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::time::Duration;

use daemonize::Daemonize;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tracing::{debug, info, warn};

use tunsentry_core::error::TunsentryError;
use tunsentry_core::monitor::teardown::read_pid_file;

/// Grace period before a stopped watcher is killed
const STOP_GRACE_PERIOD: Duration = Duration::from_secs(5);

/// Represents a detached watcher process
pub struct DaemonProcess {
    pid_file: PathBuf,
}

impl DaemonProcess {
    /// Create a new daemon process manager
    pub fn new(pid_file: PathBuf) -> Self {
        Self { pid_file }
    }

    /// Check if a watcher is already running
    pub fn is_running(&self) -> Result<bool, TunsentryError> {
        if !self.pid_file.exists() {
            return Ok(false);
        }

        let pid = self.get_pid()?;

        match signal::kill(Pid::from_raw(pid), None) {
            Ok(()) => Ok(true),
            Err(nix::errno::Errno::ESRCH) => {
                // Stale PID file
                let _ = fs::remove_file(&self.pid_file);
                Ok(false)
            }
            Err(e) => Err(TunsentryError::Daemon {
                reason: format!("Failed to check process status: {}", e),
            }),
        }
    }

    /// Detach the current process
    ///
    /// Must be called before any tokio runtime is started.
    pub fn daemonize(&self) -> Result<(), TunsentryError> {
        if let Some(parent) = self.pid_file.parent() {
            fs::create_dir_all(parent).map_err(|e| TunsentryError::Daemon {
                reason: format!("Failed to create PID file directory: {}", e),
            })?;
        }

        let working_directory = std::env::current_dir().map_err(|e| TunsentryError::Daemon {
            reason: format!("Failed to get current directory: {}", e),
        })?;

        Daemonize::new()
            .pid_file(&self.pid_file)
            .chown_pid_file(true)
            .working_directory(working_directory)
            .umask(0o027)
            .start()
            .map_err(|e| TunsentryError::Daemon {
                reason: format!("Failed to daemonize process: {}", e),
            })?;

        info!("Successfully daemonized process, PID: {}", process::id());
        Ok(())
    }

    /// Get the PID of the running watcher
    pub fn get_pid(&self) -> Result<i32, TunsentryError> {
        Ok(read_pid_file(&self.pid_file)?)
    }

    /// Stop the watcher process
    ///
    /// Sends SIGTERM, waits for a graceful exit and falls back to SIGKILL.
    pub fn stop(&self) -> Result<i32, TunsentryError> {
        let pid = self.get_pid()?;
        let target = Pid::from_raw(pid);

        match signal::kill(target, Signal::SIGTERM) {
            Ok(()) => debug!("SIGTERM sent to watcher {}", pid),
            Err(nix::errno::Errno::ESRCH) => {
                debug!("Watcher {} already terminated", pid);
                let _ = fs::remove_file(&self.pid_file);
                return Ok(pid);
            }
            Err(e) => {
                return Err(TunsentryError::Daemon {
                    reason: format!("Failed to send SIGTERM to watcher: {}", e),
                })
            }
        }

        let deadline = std::time::Instant::now() + STOP_GRACE_PERIOD;
        while std::time::Instant::now() < deadline {
            if let Err(nix::errno::Errno::ESRCH) = signal::kill(target, None) {
                let _ = fs::remove_file(&self.pid_file);
                info!("Stopped watcher process {}", pid);
                return Ok(pid);
            }
            std::thread::sleep(Duration::from_millis(100));
        }

        warn!("Watcher {} did not respond to SIGTERM, sending SIGKILL", pid);
        match signal::kill(target, Signal::SIGKILL) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(e) => {
                return Err(TunsentryError::Daemon {
                    reason: format!("Failed to send SIGKILL to watcher: {}", e),
                })
            }
        }

        let _ = fs::remove_file(&self.pid_file);
        info!("Killed watcher process {}", pid);
        Ok(pid)
    }
}

/// Get the default PID file path
pub fn get_default_pid_file() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        Path::new(&runtime_dir).join("tunsentry.pid")
    } else {
        Path::new("/tmp").join(format!("tunsentry-{}.pid", nix::unistd::getuid()))
    }
}
