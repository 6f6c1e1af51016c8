//! Stop command

use tunsentry_core::error::TunsentryError;

use crate::daemon::process::{get_default_pid_file, DaemonProcess};

/// Stop a detached watcher
pub fn run_stop() -> Result<(), TunsentryError> {
    let daemon = DaemonProcess::new(get_default_pid_file());

    if !daemon.is_running()? {
        println!("No detached watcher is running");
        return Ok(());
    }

    let pid = daemon.stop()?;
    println!("✓ Stopped watcher (PID {})", pid);
    Ok(())
}
