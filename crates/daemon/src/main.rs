//! Harbor daemon binary
//!
//! Owns the listener and serves the IPC socket until interrupted.

use std::path::PathBuf;

use anyhow::Context;

use harbor_daemon::IpcConfig;
use harbor_logging::LogLevel;
use harbor_settings::SettingsStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let level = std::env::var("HARBOR_LOG")
        .ok()
        .and_then(|level| level.parse().ok())
        .unwrap_or(LogLevel::Info);
    harbor_logging::init(level);

    let store = match std::env::var_os("HARBOR_SETTINGS") {
        Some(path) => SettingsStore::new(PathBuf::from(path)),
        None => SettingsStore::open_default(),
    };
    let ipc_config = match std::env::var_os("HARBOR_SOCKET") {
        Some(path) => IpcConfig {
            socket_path: PathBuf::from(path),
        },
        None => IpcConfig::default(),
    };

    harbor_daemon::run(store, ipc_config)
        .await
        .context("daemon failed")
}
