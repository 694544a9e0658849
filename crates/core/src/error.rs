use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned by listener lifecycle transitions
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ControllerError {
    #[error("Invalid configuration: {0}")]
    Validation(String),

    #[error("Listener is already active")]
    AlreadyActive,

    #[error("Listener is not active")]
    NotActive,

    #[error("Port {0} is already in use")]
    AddressInUse(u16),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Listener controller is not running")]
    Closed,
}

pub type Result<T> = std::result::Result<T, ControllerError>;

/// Port mapping problem that does not prevent listening
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum UpnpWarning {
    #[error("No available UPnP device found")]
    NoDevice,

    #[error("UPnP gateway did not answer within {timeout_ms} ms")]
    Timeout { timeout_ms: u64 },

    #[error("Creating a port map with the UPnP device failed: {reason}")]
    MappingFailed { reason: String },

    #[error("UPnP device mapped external port {actual} instead of {requested}")]
    Mismatch { requested: u16, actual: u16 },
}

/// Dynamic DNS problem that does not prevent listening
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DdnsWarning {
    #[error("Dynamic DNS updater not started: {reason}")]
    NotStarted { reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_validation() {
        let err = ControllerError::Validation("port must be between 1 and 65535".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid configuration: port must be between 1 and 65535"
        );
    }

    #[test]
    fn test_error_display_address_in_use() {
        let err = ControllerError::AddressInUse(4782);
        assert_eq!(err.to_string(), "Port 4782 is already in use");
    }

    #[test]
    fn test_error_display_state_errors() {
        assert_eq!(
            ControllerError::AlreadyActive.to_string(),
            "Listener is already active"
        );
        assert_eq!(ControllerError::NotActive.to_string(), "Listener is not active");
    }

    #[test]
    fn test_upnp_warning_mismatch_display() {
        let warning = UpnpWarning::Mismatch {
            requested: 4782,
            actual: 9000,
        };
        assert_eq!(
            warning.to_string(),
            "UPnP device mapped external port 9000 instead of 4782"
        );
    }

    #[test]
    fn test_upnp_warning_roundtrips_through_json() {
        let warning = UpnpWarning::Timeout { timeout_ms: 5000 };
        let json = serde_json::to_string(&warning).unwrap();
        assert!(json.contains("\"kind\":\"timeout\""));
        let parsed: UpnpWarning = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, warning);
    }

    #[test]
    fn test_result_type_err() {
        let result: Result<()> = Err(ControllerError::Closed);
        assert!(result.is_err());
    }
}
