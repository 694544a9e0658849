//! IPC Client implementation

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use serde::de::DeserializeOwned;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use harbor_core::{StartReport, StopReport};
use harbor_settings::Settings;

use crate::protocol::{RpcRequest, RpcResponse, SaveParams, SettingsParams, StartParams, StatusResult};
use crate::{IpcError, Result};

/// IPC Client for communicating with the Harbor daemon
pub struct IpcClient {
    socket_path: PathBuf,
    request_id: AtomicU64,
}

impl IpcClient {
    /// Create a new IPC client
    ///
    /// Note: This doesn't establish a connection. Each request creates a new connection.
    pub fn new(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            request_id: AtomicU64::new(1),
        }
    }

    /// Connect to the daemon and verify it's running
    pub async fn connect(socket_path: &Path) -> Result<Self> {
        let client = Self::new(socket_path.to_path_buf());
        client.status().await?;
        Ok(client)
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Send a raw JSON-RPC request
    pub async fn send_request(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .map_err(|e| {
                if e.kind() == std::io::ErrorKind::NotFound
                    || e.kind() == std::io::ErrorKind::ConnectionRefused
                {
                    IpcError::DaemonNotRunning
                } else {
                    IpcError::ConnectionFailed(e.to_string())
                }
            })?;
        let (reader, mut writer) = stream.into_split();

        let request = RpcRequest::new(method, params, self.next_id());
        let request_json = serde_json::to_string(&request)?;
        debug!("Sending request: {}", request_json);

        writer.write_all(request_json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut reader = BufReader::new(reader);
        let mut response_str = String::new();
        if reader.read_line(&mut response_str).await? == 0 {
            return Err(IpcError::InvalidResponse(
                "daemon closed the connection".to_string(),
            ));
        }
        debug!("Received response: {}", response_str.trim());

        let response: RpcResponse = serde_json::from_str(&response_str)
            .map_err(|e| IpcError::InvalidResponse(e.to_string()))?;

        if let Some(error) = response.error {
            return Err(IpcError::DaemonError {
                code: error.code,
                message: error.message,
            });
        }

        Ok(response.result.unwrap_or(serde_json::Value::Null))
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> Result<T> {
        let result = self.send_request(method, params).await?;
        serde_json::from_value(result).map_err(|e| IpcError::InvalidResponse(e.to_string()))
    }

    /// Start listening, with `pending` settings or the saved ones
    pub async fn start(&self, pending: Option<Settings>) -> Result<StartReport> {
        let params = StartParams { settings: pending };
        self.call("start", Some(serde_json::to_value(params)?)).await
    }

    /// Stop listening
    pub async fn stop(&self) -> Result<StopReport> {
        self.call("stop", None).await
    }

    /// Validate and commit settings; returns them with the password masked
    pub async fn save(&self, settings: Settings) -> Result<Settings> {
        let params = SaveParams { settings };
        self.call("save", Some(serde_json::to_value(params)?)).await
    }

    /// Committed settings, password masked
    pub async fn discard(&self) -> Result<Settings> {
        self.call("discard", None).await
    }

    pub async fn status(&self) -> Result<StatusResult> {
        self.call("status", None).await
    }

    /// Committed settings; the password is only in clear with `reveal`
    pub async fn settings(&self, reveal: bool) -> Result<Settings> {
        let params = SettingsParams { reveal };
        self.call("settings", Some(serde_json::to_value(params)?)).await
    }
}
