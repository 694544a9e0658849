//! Configuration types

use serde::{Deserialize, Serialize};

use harbor_core::{DdnsConfig, ListenerConfig, Secret, UpnpConfig, DEFAULT_LISTEN_PORT};

use crate::{Result, SettingsError};

/// Full settings snapshot
///
/// Serialized as a single flat JSON object; each section contributes its own
/// keys.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    /// Listener settings
    #[serde(flatten)]
    pub listener: ListenerSettings,

    /// Automatic port forwarding
    #[serde(flatten)]
    pub upnp: UpnpSettings,

    /// Dynamic DNS updater
    #[serde(flatten)]
    pub ddns: DdnsSettings,

    /// Display preferences (not interpreted by the daemon)
    #[serde(flatten)]
    pub ui: UiSettings,
}

impl Settings {
    /// Check the snapshot can be committed
    pub fn validate(&self) -> Result<()> {
        if self.listener.port == 0 {
            return Err(SettingsError::InvalidPort(self.listener.port));
        }
        Ok(())
    }

    pub fn listener_config(&self) -> ListenerConfig {
        ListenerConfig::new(self.listener.port, self.listener.ipv6_support)
    }

    pub fn upnp_config(&self) -> UpnpConfig {
        UpnpConfig {
            enabled: self.upnp.use_upnp,
        }
    }

    pub fn ddns_config(&self) -> DdnsConfig {
        DdnsConfig {
            enabled: self.ddns.enabled,
            hostname: self.ddns.host.clone(),
            username: self.ddns.username.clone(),
            password: self.ddns.password.clone(),
        }
    }

    /// Listener bind settings differ between two snapshots
    pub fn listener_changed(&self, other: &Settings) -> bool {
        self.listener_config() != other.listener_config()
    }
}

/// Listener settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ListenerSettings {
    #[serde(rename = "ListenPort")]
    pub port: u16,

    #[serde(rename = "IPv6Support")]
    pub ipv6_support: bool,

    /// Start listening as soon as the daemon starts
    #[serde(rename = "AutoListen")]
    pub auto_listen: bool,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            port: DEFAULT_LISTEN_PORT,
            ipv6_support: false,
            auto_listen: false,
        }
    }
}

/// UPnP settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpnpSettings {
    #[serde(rename = "UseUPnP")]
    pub use_upnp: bool,
}

/// No-IP dynamic DNS settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DdnsSettings {
    #[serde(rename = "EnableNoIPUpdater")]
    pub enabled: bool,

    #[serde(rename = "NoIPHost")]
    pub host: String,

    #[serde(rename = "NoIPUsername")]
    pub username: String,

    #[serde(rename = "NoIPPassword")]
    pub password: Secret,
}

/// UI settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct UiSettings {
    /// Show a notification popup for new connections
    #[serde(rename = "ShowPopup")]
    pub show_popup: bool,

    /// Show a tooltip with connection details
    #[serde(rename = "ShowToolTip")]
    pub show_tooltip: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.listener.port, DEFAULT_LISTEN_PORT);
        assert!(!settings.listener.ipv6_support);
        assert!(!settings.listener.auto_listen);
        assert!(!settings.upnp.use_upnp);
        assert!(!settings.ddns.enabled);
        assert!(settings.ddns.host.is_empty());
        assert!(!settings.ui.show_popup);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_zero_port_fails_validation() {
        let mut settings = Settings::default();
        settings.listener.port = 0;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidPort(0))
        ));
    }

    #[test]
    fn test_persisted_key_names() {
        let mut settings = Settings::default();
        settings.ddns.password = Secret::new("pw");
        let value = serde_json::to_value(&settings).unwrap();
        let object = value.as_object().unwrap();

        for key in [
            "ListenPort",
            "IPv6Support",
            "AutoListen",
            "ShowPopup",
            "UseUPnP",
            "ShowToolTip",
            "EnableNoIPUpdater",
            "NoIPHost",
            "NoIPUsername",
            "NoIPPassword",
        ] {
            assert!(object.contains_key(key), "missing key {}", key);
        }
        assert_eq!(object.len(), 10);
        assert_eq!(value["NoIPPassword"], "pw");
    }

    #[test]
    fn test_missing_keys_take_defaults() {
        let settings: Settings = serde_json::from_str(r#"{"UseUPnP":true}"#).unwrap();
        assert!(settings.upnp.use_upnp);
        assert_eq!(settings.listener.port, DEFAULT_LISTEN_PORT);
    }

    #[test]
    fn test_core_config_conversion() {
        let mut settings = Settings::default();
        settings.listener.port = 9000;
        settings.listener.ipv6_support = true;
        settings.upnp.use_upnp = true;
        settings.ddns = DdnsSettings {
            enabled: true,
            host: "home.ddns.net".to_string(),
            username: "alice".to_string(),
            password: Secret::new("pw"),
        };

        assert_eq!(settings.listener_config(), ListenerConfig::new(9000, true));
        assert!(settings.upnp_config().enabled);
        let ddns = settings.ddns_config();
        assert!(ddns.enabled);
        assert_eq!(ddns.hostname, "home.ddns.net");
        assert_eq!(ddns.password.expose(), "pw");
    }

    #[test]
    fn test_listener_changed() {
        let base = Settings::default();
        let mut other = base.clone();
        other.ui.show_tooltip = true;
        assert!(!base.listener_changed(&other));

        other.listener.ipv6_support = true;
        assert!(base.listener_changed(&other));
    }
}
