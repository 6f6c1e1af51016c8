//! Teardown actions run when the tunnel's network is lost
//!
//! Every action returns without waiting for the tunnel to actually go down:
//! signals are fire-and-forget, commands are spawned and reaped in the
//! background.

use crate::error::TeardownError;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// One way of asking the tunnel owner to shut the tunnel down
#[derive(Debug, Clone)]
pub enum TeardownAction {
    /// Send SIGTERM to the process whose PID is stored in this file
    SignalPidFile(PathBuf),

    /// Spawn this command (program followed by its arguments)
    Command(Vec<String>),

    /// Notify an in-process owner through a channel
    Notify(mpsc::UnboundedSender<()>),
}

impl TeardownAction {
    /// Run the action without blocking the caller
    pub fn run(&self) -> Result<(), TeardownError> {
        match self {
            TeardownAction::SignalPidFile(path) => signal_pid_file(path),
            TeardownAction::Command(argv) => spawn_command(argv),
            TeardownAction::Notify(tx) => tx.send(()).map_err(|_| TeardownError::ChannelClosed),
        }
    }
}

impl std::fmt::Display for TeardownAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TeardownAction::SignalPidFile(path) => write!(f, "SIGTERM pid from {}", path.display()),
            TeardownAction::Command(argv) => write!(f, "run `{}`", argv.join(" ")),
            TeardownAction::Notify(_) => write!(f, "notify owner"),
        }
    }
}

/// Read a PID from a PID file
pub fn read_pid_file(path: &Path) -> Result<i32, TeardownError> {
    let contents = fs::read_to_string(path).map_err(|e| TeardownError::PidFileUnreadable {
        path: path.display().to_string(),
        reason: e.to_string(),
    })?;

    match contents.trim().parse::<i32>() {
        Ok(pid) if pid > 0 => Ok(pid),
        _ => Err(TeardownError::InvalidPid {
            path: path.display().to_string(),
        }),
    }
}

fn signal_pid_file(path: &Path) -> Result<(), TeardownError> {
    let pid = read_pid_file(path)?;

    match signal::kill(Pid::from_raw(pid), Signal::SIGTERM) {
        Ok(()) => {
            info!("Sent SIGTERM to process {}", pid);
            Ok(())
        }
        Err(nix::errno::Errno::ESRCH) => {
            // Nothing left to tear down
            debug!("Process {} already terminated", pid);
            Ok(())
        }
        Err(e) => Err(TeardownError::SignalFailed {
            pid,
            reason: e.to_string(),
        }),
    }
}

fn spawn_command(argv: &[String]) -> Result<(), TeardownError> {
    let (program, args) = argv.split_first().ok_or(TeardownError::EmptyCommand)?;
    let command_line = argv.join(" ");

    let runtime =
        tokio::runtime::Handle::try_current().map_err(|e| TeardownError::CommandSpawnFailed {
            command: command_line.clone(),
            reason: e.to_string(),
        })?;

    let mut child = tokio::process::Command::new(program)
        .args(args)
        .stdin(std::process::Stdio::null())
        .spawn()
        .map_err(|e| TeardownError::CommandSpawnFailed {
            command: command_line.clone(),
            reason: e.to_string(),
        })?;

    info!("Spawned teardown command `{}`", command_line);
    runtime.spawn(async move {
        match child.wait().await {
            Ok(status) if status.success() => debug!("Teardown command `{}` finished", command_line),
            Ok(status) => warn!("Teardown command `{}` exited with {}", command_line, status),
            Err(e) => warn!("Failed to wait for teardown command `{}`: {}", command_line, e),
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_read_pid_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vpn.pid");
        fs::write(&path, "4242\n").unwrap();

        assert_eq!(read_pid_file(&path).unwrap(), 4242);
    }

    #[test]
    fn test_read_pid_file_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vpn.pid");

        fs::write(&path, "not-a-pid").unwrap();
        assert!(matches!(read_pid_file(&path), Err(TeardownError::InvalidPid { .. })));

        fs::write(&path, "0").unwrap();
        assert!(matches!(read_pid_file(&path), Err(TeardownError::InvalidPid { .. })));
    }

    #[test]
    fn test_missing_pid_file() {
        let dir = tempdir().unwrap();
        let action = TeardownAction::SignalPidFile(dir.path().join("missing.pid"));

        assert!(matches!(
            action.run(),
            Err(TeardownError::PidFileUnreadable { .. })
        ));
    }

    #[test]
    fn test_notify_action() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let action = TeardownAction::Notify(tx);

        action.run().unwrap();
        assert!(rx.try_recv().is_ok());

        drop(rx);
        assert!(matches!(action.run(), Err(TeardownError::ChannelClosed)));
    }

    #[test]
    fn test_empty_command() {
        let action = TeardownAction::Command(vec![]);
        assert!(matches!(action.run(), Err(TeardownError::EmptyCommand)));
    }

    #[tokio::test]
    async fn test_command_is_spawned_without_waiting() {
        let dir = tempdir().unwrap();
        let marker = dir.path().join("torn-down");
        let action = TeardownAction::Command(vec![
            "touch".to_string(),
            marker.display().to_string(),
        ]);

        action.run().unwrap();

        for _ in 0..50 {
            if marker.exists() {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        panic!("teardown command did not run");
    }
}
