//! Daemon process management for background watchers
//!
//! This module handles detaching the watcher and stopping it later through
//! its PID file.

pub mod process;
