//! JSON-RPC 2.0 protocol types

use serde::{Deserialize, Serialize};

use harbor_core::{ListenerConfig, ListenerState, PortMapping};
use harbor_settings::Settings;

/// JSON-RPC 2.0 request
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    pub jsonrpc: &'static str,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub params: Option<serde_json::Value>,
    pub id: u64,
}

impl RpcRequest {
    pub fn new(method: impl Into<String>, params: Option<serde_json::Value>, id: u64) -> Self {
        Self {
            jsonrpc: "2.0",
            method: method.into(),
            params,
            id,
        }
    }
}

/// JSON-RPC 2.0 response
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    pub jsonrpc: String,
    pub result: Option<serde_json::Value>,
    pub error: Option<RpcError>,
    pub id: serde_json::Value,
}

/// JSON-RPC 2.0 error
#[derive(Debug, Clone, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
}

/// Parameters for the `start` method
#[derive(Debug, Clone, Default, Serialize)]
pub struct StartParams {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub settings: Option<Settings>,
}

/// Parameters for the `save` method
#[derive(Debug, Clone, Serialize)]
pub struct SaveParams {
    pub settings: Settings,
}

/// Parameters for the `settings` method
#[derive(Debug, Clone, Default, Serialize)]
pub struct SettingsParams {
    pub reveal: bool,
}

/// Result of the `status` method
#[derive(Debug, Clone, Deserialize)]
pub struct StatusResult {
    pub state: ListenerState,
    #[serde(default)]
    pub config: Option<ListenerConfig>,
    #[serde(default)]
    pub mapping: Option<PortMapping>,
    /// Dynamic DNS updater state (`idle`, `running`, `halted_on_auth`)
    pub ddns: String,
}
