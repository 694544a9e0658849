//! Harbor IPC client
//!
//! Talks JSON-RPC 2.0 to the daemon over its Unix socket. Each request opens
//! a fresh connection.

mod client;
mod protocol;

pub use client::IpcClient;
pub use protocol::{
    RpcError, RpcRequest, RpcResponse, SaveParams, SettingsParams, StartParams, StatusResult,
};

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum IpcError {
    #[error("Daemon is not running")]
    DaemonNotRunning,

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    #[error("{message}")]
    DaemonError { code: i32, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, IpcError>;

/// Socket the daemon listens on by default
pub fn default_socket_path() -> PathBuf {
    if cfg!(target_os = "macos") {
        PathBuf::from("/tmp/harbor.sock")
    } else {
        let xdg_runtime = std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".to_string());
        PathBuf::from(format!("{}/harbor.sock", xdg_runtime))
    }
}
