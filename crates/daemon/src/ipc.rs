//! IPC server for JSON-RPC communication

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{DaemonError, Result};

pub const PARSE_ERROR: i32 = -32700;
pub const INVALID_REQUEST: i32 = -32600;
pub const METHOD_NOT_FOUND: i32 = -32601;
pub const INVALID_PARAMS: i32 = -32602;
/// Application error; the message carries the failure
pub const APPLICATION_ERROR: i32 = -32000;

/// IPC server configuration
#[derive(Debug, Clone)]
pub struct IpcConfig {
    pub socket_path: PathBuf,
}

impl Default for IpcConfig {
    fn default() -> Self {
        let path = if cfg!(target_os = "macos") {
            PathBuf::from("/tmp/harbor.sock")
        } else {
            let xdg_runtime =
                std::env::var("XDG_RUNTIME_DIR").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(format!("{}/harbor.sock", xdg_runtime))
        };

        Self { socket_path: path }
    }
}

/// JSON-RPC request
#[derive(Debug, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub method: String,
    pub params: Option<serde_json::Value>,
    pub id: serde_json::Value,
}

/// JSON-RPC response
#[derive(Debug, Serialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    pub id: serde_json::Value,
}

/// JSON-RPC error object
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

impl RpcError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(METHOD_NOT_FOUND, format!("Method not found: {}", method))
    }

    pub fn invalid_params(reason: impl std::fmt::Display) -> Self {
        Self::new(INVALID_PARAMS, format!("Invalid params: {}", reason))
    }

    pub fn application(reason: impl std::fmt::Display) -> Self {
        Self::new(APPLICATION_ERROR, reason.to_string())
    }
}

impl JsonRpcResponse {
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    pub fn error(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

pub type HandlerFuture<'a> =
    Pin<Box<dyn Future<Output = std::result::Result<serde_json::Value, RpcError>> + Send + 'a>>;

/// Handler for IPC requests
pub trait IpcHandler: Send + Sync {
    /// Handle a JSON-RPC request
    fn handle(&self, method: &str, params: Option<serde_json::Value>) -> HandlerFuture<'_>;
}

/// Answer one request line
pub async fn dispatch<H: IpcHandler + ?Sized>(handler: &H, line: &str) -> JsonRpcResponse {
    let request = match serde_json::from_str::<JsonRpcRequest>(line) {
        Ok(request) => request,
        Err(e) => {
            return JsonRpcResponse::error(
                serde_json::Value::Null,
                RpcError::new(PARSE_ERROR, format!("Parse error: {}", e)),
            )
        }
    };

    if request.jsonrpc != "2.0" {
        return JsonRpcResponse::error(
            request.id,
            RpcError::new(INVALID_REQUEST, "Invalid Request: jsonrpc must be '2.0'"),
        );
    }

    match handler.handle(&request.method, request.params).await {
        Ok(result) => JsonRpcResponse::success(request.id, result),
        Err(error) => JsonRpcResponse::error(request.id, error),
    }
}

/// IPC server
pub struct IpcServer {
    config: IpcConfig,
    shutdown_tx: Option<mpsc::Sender<()>>,
}

impl IpcServer {
    pub fn new(config: IpcConfig) -> Self {
        Self {
            config,
            shutdown_tx: None,
        }
    }

    /// Serve until [`IpcServer::stop`] is called
    pub async fn start<H: IpcHandler + 'static>(&mut self, handler: Arc<H>) -> Result<()> {
        // Stale socket from a previous run
        if self.config.socket_path.exists() {
            std::fs::remove_file(&self.config.socket_path)?;
        }

        let listener = UnixListener::bind(&self.config.socket_path)
            .map_err(|e| DaemonError::IpcError(format!("Failed to bind: {}", e)))?;

        info!("IPC server listening on {:?}", self.config.socket_path);

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        self.shutdown_tx = Some(shutdown_tx);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, _addr)) => {
                            let handler = handler.clone();
                            tokio::spawn(async move {
                                if let Err(e) = Self::handle_connection(stream, handler).await {
                                    warn!("Connection error: {}", e);
                                }
                            });
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("IPC server shutting down");
                    break;
                }
            }
        }

        let _ = std::fs::remove_file(&self.config.socket_path);

        Ok(())
    }

    /// Answer newline-delimited requests until the client hangs up
    async fn handle_connection<H: IpcHandler + 'static>(
        stream: UnixStream,
        handler: Arc<H>,
    ) -> Result<()> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);
        let mut line = String::new();

        loop {
            line.clear();
            if reader.read_line(&mut line).await? == 0 {
                break;
            }
            if line.trim().is_empty() {
                continue;
            }

            debug!("Received: {}", line.trim());
            let response = dispatch(handler.as_ref(), &line).await;

            let response_str = serde_json::to_string(&response)
                .map_err(|e| DaemonError::IpcError(format!("Serialize error: {}", e)))?;
            debug!("Sending: {}", response_str);

            writer.write_all(response_str.as_bytes()).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await?;
        }

        Ok(())
    }

    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(()).await;
        }
    }

    pub fn socket_path(&self) -> &PathBuf {
        &self.config.socket_path
    }
}
