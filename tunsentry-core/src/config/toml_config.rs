//! TOML configuration file I/O
//!
//! Handles loading and saving the watcher configuration to/from TOML files
//! in the user's configuration directory.

use crate::config::WatchConfig;
use crate::error::{ConfigError, TunsentryError};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default configuration file name
const CONFIG_FILE_NAME: &str = "config.toml";

/// Get the default configuration directory
///
/// Returns ~/.config/tunsentry, or TUNSENTRY_CONFIG_DIR if set
pub fn get_config_dir() -> Result<PathBuf, TunsentryError> {
    if let Ok(config_dir) = std::env::var("TUNSENTRY_CONFIG_DIR") {
        return Ok(PathBuf::from(config_dir));
    }

    let home = if let Ok(sudo_user) = std::env::var("SUDO_USER") {
        // Running with sudo, use the invoking user's home directory
        std::env::var("SUDO_HOME").unwrap_or_else(|_| format!("/home/{}", sudo_user))
    } else {
        std::env::var("HOME").map_err(|_| {
            TunsentryError::Config(ConfigError::IoError {
                message: "HOME environment variable not set".to_string(),
            })
        })?
    };

    Ok(PathBuf::from(home).join(".config").join("tunsentry"))
}

/// Get the default configuration file path
pub fn get_config_path() -> Result<PathBuf, TunsentryError> {
    let config_dir = get_config_dir()?;
    Ok(config_dir.join(CONFIG_FILE_NAME))
}

/// Load configuration from the default TOML file
pub fn load_config() -> Result<WatchConfig, TunsentryError> {
    let config_path = get_config_path()?;
    load_config_from_path(&config_path)
}

/// Load configuration from a specific TOML file
///
/// The result is parsed but not validated; command line overrides may
/// still complete it.
pub fn load_config_from_path<P: AsRef<Path>>(path: P) -> Result<WatchConfig, TunsentryError> {
    let contents = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => TunsentryError::Config(ConfigError::LoadFailed {
            path: path.as_ref().to_string_lossy().to_string(),
        }),
        _ => TunsentryError::Config(ConfigError::IoError {
            message: format!("Failed to read config file: {}", e),
        }),
    })?;

    let config: WatchConfig = toml::from_str(&contents).map_err(|e| {
        TunsentryError::Config(ConfigError::IoError {
            message: format!("Failed to parse TOML: {}", e),
        })
    })?;

    debug!("Loaded configuration from {:?}", path.as_ref());
    Ok(config)
}

/// Save configuration to a specific TOML file
pub fn save_config_to_path<P: AsRef<Path>>(
    config: &WatchConfig,
    path: P,
) -> Result<(), TunsentryError> {
    config
        .validate()
        .map_err(|e| TunsentryError::Config(ConfigError::ValidationError { message: e }))?;

    if let Some(parent) = path.as_ref().parent() {
        std::fs::create_dir_all(parent).map_err(|e| {
            TunsentryError::Config(ConfigError::IoError {
                message: format!("Failed to create config directory: {}", e),
            })
        })?;
    }

    let contents = toml::to_string_pretty(config)?;

    std::fs::write(&path, contents).map_err(|_e| {
        TunsentryError::Config(ConfigError::SaveFailed {
            path: path.as_ref().to_string_lossy().to_string(),
        })
    })?;

    info!("Saved configuration to {:?}", path.as_ref());
    Ok(())
}
