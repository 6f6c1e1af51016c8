//! Error types for tunsentry
//!
//! This module defines all error types used throughout the application,
//! providing consistent error handling and user-friendly error messages.

use thiserror::Error;

/// Main error type for tunsentry
#[derive(Error, Debug)]
pub enum TunsentryError {
    /// Errors related to configuration loading/parsing
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Errors related to observing the platform's networks
    #[error("Monitor error: {0}")]
    Monitor(#[from] MonitorError),

    /// Errors related to tearing the tunnel down
    #[error("Teardown error: {0}")]
    Teardown(#[from] TeardownError),

    /// Errors related to running as a background watcher
    #[error("Daemon error: {reason}")]
    Daemon { reason: String },

    /// Generic I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing errors
    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    /// TOML serialization errors
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to load configuration file: {path}")]
    LoadFailed { path: String },

    #[error("Failed to save configuration file: {path}")]
    SaveFailed { path: String },

    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Configuration validation error: {message}")]
    ValidationError { message: String },

    #[error("I/O error: {message}")]
    IoError { message: String },
}

/// Errors that can occur while observing networks
#[derive(Error, Debug)]
pub enum MonitorError {
    #[error("D-Bus connection failed: {0}")]
    DBusConnectionFailed(#[from] zbus::Error),

    #[error("NetworkManager not available")]
    NetworkManagerUnavailable,

    #[error("Failed to query network state: {0}")]
    QueryFailed(String),

    #[error("Network event dispatch stopped unexpectedly: {0}")]
    DispatchFailed(String),
}

/// Errors raised by a teardown action
#[derive(Error, Debug)]
pub enum TeardownError {
    #[error("Failed to read PID file {path}: {reason}")]
    PidFileUnreadable { path: String, reason: String },

    #[error("Invalid PID in PID file {path}")]
    InvalidPid { path: String },

    #[error("Failed to signal process {pid}: {reason}")]
    SignalFailed { pid: i32, reason: String },

    #[error("Failed to spawn teardown command `{command}`: {reason}")]
    CommandSpawnFailed { command: String, reason: String },

    #[error("Teardown command is empty")]
    EmptyCommand,

    #[error("Teardown receiver has gone away")]
    ChannelClosed,
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, TunsentryError>;
