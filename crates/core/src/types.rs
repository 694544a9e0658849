use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{ControllerError, DdnsWarning, Result, UpnpWarning};

/// Port the listener uses when nothing has been configured yet
pub const DEFAULT_LISTEN_PORT: u16 = 4782;

/// Character used when a secret is shown masked
pub const MASK_CHAR: char = '●';

/// Listener bind settings
///
/// Only editable while the listener is stopped. A port of 0 is never a
/// valid committed value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// TCP port to listen on (1-65535)
    pub port: u16,
    /// Bind dual-stack IPv6 instead of IPv4 only
    pub ipv6: bool,
}

impl ListenerConfig {
    pub fn new(port: u16, ipv6: bool) -> Self {
        Self { port, ipv6 }
    }

    /// Reject a zero port
    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(ControllerError::Validation(
                "port must be between 1 and 65535".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_LISTEN_PORT,
            ipv6: false,
        }
    }
}

/// Automatic port forwarding settings
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpnpConfig {
    /// Request a gateway mapping on start, remove it on stop
    pub enabled: bool,
}

impl UpnpConfig {
    pub fn enabled() -> Self {
        Self { enabled: true }
    }

    pub fn disabled() -> Self {
        Self { enabled: false }
    }
}

/// Dynamic DNS updater settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DdnsConfig {
    pub enabled: bool,
    pub hostname: String,
    pub username: String,
    pub password: Secret,
}

impl DdnsConfig {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn enabled(
        hostname: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<Secret>,
    ) -> Self {
        Self {
            enabled: true,
            hostname: hostname.into(),
            username: username.into(),
            password: password.into(),
        }
    }
}

/// A string that is never printed in clear by `Debug` or `Display`
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Secret(String);

impl Secret {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Access the clear-text value
    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// One mask character per character of the secret
    pub fn masked(&self) -> String {
        self.0.chars().map(|_| MASK_CHAR).collect()
    }
}

impl fmt::Debug for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Secret(<redacted>)")
    }
}

impl fmt::Display for Secret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("<redacted>")
    }
}

impl From<String> for Secret {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for Secret {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Listener lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListenerState {
    #[default]
    Stopped,
    Listening,
}

impl ListenerState {
    pub fn is_listening(&self) -> bool {
        matches!(self, Self::Listening)
    }
}

impl fmt::Display for ListenerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stopped => f.write_str("stopped"),
            Self::Listening => f.write_str("listening"),
        }
    }
}

/// Transport protocol of a gateway mapping
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MappingProtocol {
    #[default]
    Tcp,
}

/// An external -> internal forwarding rule held on the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    /// Port passed to the gateway (and bound locally)
    pub requested_port: u16,
    /// External port the gateway actually assigned
    pub actual_port: u16,
    pub protocol: MappingProtocol,
}

impl PortMapping {
    pub fn tcp(requested_port: u16, actual_port: u16) -> Self {
        Self {
            requested_port,
            actual_port,
            protocol: MappingProtocol::Tcp,
        }
    }

    /// The gateway assigned a different external port than requested
    pub fn is_mismatched(&self) -> bool {
        self.requested_port != self.actual_port
    }
}

/// Non-fatal problem attached to a successful start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum StartWarning {
    Upnp { warning: UpnpWarning },
    Ddns { warning: DdnsWarning },
}

impl fmt::Display for StartWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upnp { warning } => write!(f, "{}", warning),
            Self::Ddns { warning } => write!(f, "{}", warning),
        }
    }
}

impl From<UpnpWarning> for StartWarning {
    fn from(warning: UpnpWarning) -> Self {
        Self::Upnp { warning }
    }
}

impl From<DdnsWarning> for StartWarning {
    fn from(warning: DdnsWarning) -> Self {
        Self::Ddns { warning }
    }
}

/// Outcome of a successful start
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartReport {
    pub config: ListenerConfig,
    pub mapping: Option<PortMapping>,
    pub ddns_running: bool,
    #[serde(default)]
    pub warnings: Vec<StartWarning>,
}

impl StartReport {
    pub fn upnp_warnings(&self) -> impl Iterator<Item = &UpnpWarning> {
        self.warnings.iter().filter_map(|w| match w {
            StartWarning::Upnp { warning } => Some(warning),
            StartWarning::Ddns { .. } => None,
        })
    }

    pub fn ddns_warnings(&self) -> impl Iterator<Item = &DdnsWarning> {
        self.warnings.iter().filter_map(|w| match w {
            StartWarning::Ddns { warning } => Some(warning),
            StartWarning::Upnp { .. } => None,
        })
    }
}

/// Outcome of a stop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StopReport {
    /// `None` when no mapping was held, otherwise whether deletion succeeded
    pub mapping_removed: Option<bool>,
    /// The dynamic DNS updater was signalled to stop
    pub ddns_stopped: bool,
}
