//! Harbor Settings
//!
//! Persistent configuration for the listener, port forwarding, the dynamic
//! DNS updater and display preferences.
//!
//! ## Features
//!
//! - Flat JSON file with stable key names (`ListenPort`, `UseUPnP`, ...)
//! - Defaults on first run
//! - Atomic save: the previous file survives a failed write
//!
//! ## Usage
//!
//! ```no_run
//! use harbor_settings::SettingsStore;
//!
//! let store = SettingsStore::open_default();
//! let mut settings = store.load()?;
//!
//! settings.listener.port = 4782;
//! settings.upnp.use_upnp = true;
//!
//! store.save(&settings)?;
//! # Ok::<(), harbor_settings::SettingsError>(())
//! ```

mod config;
mod store;

pub use config::{DdnsSettings, ListenerSettings, Settings, UiSettings, UpnpSettings};
pub use store::SettingsStore;

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SettingsError {
    #[error("Failed to read settings: {0}")]
    ReadError(std::io::Error),

    #[error("Failed to write settings: {0}")]
    WriteError(std::io::Error),

    #[error("Failed to parse settings: {0}")]
    ParseError(serde_json::Error),

    #[error("Failed to create config directory: {0}")]
    CreateDirError(std::io::Error),

    #[error("Invalid listen port {0}: must be between 1 and 65535")]
    InvalidPort(u16),
}

pub type Result<T> = std::result::Result<T, SettingsError>;

/// Directory holding Harbor configuration
///
/// `$HARBOR_CONFIG_DIR`, else `$XDG_CONFIG_HOME/harbor`, else
/// `~/.config/harbor`.
pub fn default_config_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os("HARBOR_CONFIG_DIR") {
        return PathBuf::from(dir);
    }
    if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("harbor");
    }
    let home = std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."));
    home.join(".config").join("harbor")
}

/// Get the default settings file path
pub fn default_settings_path() -> PathBuf {
    default_config_dir().join("settings.json")
}
