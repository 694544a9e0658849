//! Harbor Daemon
//!
//! Background service owning the listener, exposed to the CLI over IPC.
//!
//! ## Components
//!
//! - **ListenerController**: listener lifecycle state machine, run as a
//!   single actor task behind a cloneable `ControllerHandle`
//! - **DaemonService**: settings store plus controller, implements `IpcHandler`
//! - **IpcServer**: JSON-RPC 2.0 over a Unix socket, one request per line
//!
//! ## IPC Methods
//!
//! - `start` - Start listening with the saved or the given settings
//! - `stop` - Stop listening and remove the port mapping
//! - `save` - Validate and commit settings
//! - `discard` - Return the committed settings
//! - `status` - Listener state, active config and mapping
//! - `settings` - Committed settings, password masked unless `reveal`

mod controller;
mod ipc;
mod run;
mod service;

pub use controller::{
    ControllerConfig, ControllerHandle, ControllerStatus, ListenerController, StartRequest,
    DEFAULT_UPNP_TIMEOUT,
};
pub use ipc::{
    dispatch, HandlerFuture, IpcConfig, IpcHandler, IpcServer, JsonRpcRequest, JsonRpcResponse,
    RpcError, APPLICATION_ERROR, INVALID_PARAMS, INVALID_REQUEST, METHOD_NOT_FOUND, PARSE_ERROR,
};
pub use run::{run, run_until};
pub use service::{DaemonService, SaveParams, SettingsParams, StartParams};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error("IPC error: {0}")]
    IpcError(String),

    #[error(transparent)]
    Controller(#[from] harbor_core::ControllerError),

    #[error("Settings error: {0}")]
    Settings(#[from] harbor_settings::SettingsError),

    #[error("Dynamic DNS error: {0}")]
    Ddns(#[from] harbor_ddns::DdnsError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, DaemonError>;

#[cfg(test)]
mod tests {
    use super::*;
    use harbor_core::ControllerError;

    #[test]
    fn test_controller_error_is_transparent() {
        let error = DaemonError::from(ControllerError::AddressInUse(4782));
        assert_eq!(error.to_string(), "Port 4782 is already in use");
    }
}
