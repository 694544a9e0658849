//! Operator command surface

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{info, warn};

use harbor_core::{ControllerError, StartReport, StopReport};
use harbor_settings::{Settings, SettingsError, SettingsStore};

use crate::controller::{ControllerHandle, ControllerStatus, StartRequest};
use crate::ipc::{HandlerFuture, IpcHandler, RpcError};
use crate::{DaemonError, Result};

/// Parameters of `start`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StartParams {
    /// Uncommitted settings to start with; the saved snapshot otherwise
    #[serde(default)]
    pub settings: Option<Settings>,
}

/// Parameters of `save`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaveParams {
    pub settings: Settings,
}

/// Parameters of `settings`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsParams {
    /// Return the password in clear instead of masked
    #[serde(default)]
    pub reveal: bool,
}

/// Daemon service: settings store plus listener controller
pub struct DaemonService {
    store: SettingsStore,
    committed: Mutex<Settings>,
    controller: ControllerHandle,
}

impl DaemonService {
    /// Load the committed snapshot from `store`
    pub fn new(store: SettingsStore, controller: ControllerHandle) -> Result<Self> {
        let committed = store.load()?;
        Ok(Self {
            store,
            committed: Mutex::new(committed),
            controller,
        })
    }

    pub fn controller(&self) -> &ControllerHandle {
        &self.controller
    }

    /// Start with `pending`, or the committed snapshot when `None`
    pub async fn start(&self, pending: Option<Settings>) -> Result<StartReport> {
        let settings = match pending {
            Some(pending) => self.unmask(pending).await,
            None => self.committed.lock().await.clone(),
        };

        let request = StartRequest {
            listener: settings.listener_config(),
            upnp: settings.upnp_config(),
            ddns: settings.ddns_config(),
        };
        Ok(self.controller.start(request).await?)
    }

    pub async fn stop(&self) -> Result<StopReport> {
        Ok(self.controller.stop().await?)
    }

    /// Validate and durably commit `pending`
    ///
    /// Port and IPv6 cannot change while listening.
    pub async fn save(&self, pending: Settings) -> Result<Settings> {
        let pending = self.unmask(pending).await;
        pending.validate()?;

        let mut committed = self.committed.lock().await;
        if pending.listener_changed(&committed) && self.controller.state().await?.is_listening() {
            return Err(ControllerError::Validation(
                "port and IPv6 cannot change while listening".to_string(),
            )
            .into());
        }

        self.store.save(&pending)?;
        *committed = pending;
        info!(path = %self.store.path().display(), "Settings saved");

        Ok(masked(&committed))
    }

    /// Drop pending edits; returns the committed snapshot
    pub async fn discard(&self) -> Settings {
        masked(&*self.committed.lock().await)
    }

    pub async fn status(&self) -> Result<ControllerStatus> {
        Ok(self.controller.status().await?)
    }

    /// Committed snapshot, password masked unless `reveal`
    pub async fn settings(&self, reveal: bool) -> Settings {
        let committed = self.committed.lock().await;
        if reveal {
            committed.clone()
        } else {
            masked(&committed)
        }
    }

    /// Start listening at boot when the committed settings ask for it
    pub async fn auto_listen(&self) -> Option<Result<StartReport>> {
        if !self.committed.lock().await.listener.auto_listen {
            return None;
        }

        info!("Auto-listen enabled, starting listener");
        let result = self.start(None).await;
        match &result {
            Ok(report) => {
                for warning in &report.warnings {
                    warn!("Auto-listen: {}", warning);
                }
            }
            Err(e) => warn!("Auto-listen failed: {}", e),
        }
        Some(result)
    }

    /// A masked password sent back unchanged means "keep the current one"
    async fn unmask(&self, mut pending: Settings) -> Settings {
        let committed = self.committed.lock().await;
        let current = &committed.ddns.password;
        if !current.is_empty() && pending.ddns.password.expose() == current.masked() {
            pending.ddns.password = current.clone();
        }
        pending
    }

    async fn dispatch(
        &self,
        method: &str,
        params: Option<serde_json::Value>,
    ) -> std::result::Result<serde_json::Value, RpcError> {
        match method {
            "start" => {
                let params: StartParams = parse_params(params)?;
                to_value(self.start(params.settings).await)
            }
            "stop" => to_value(self.stop().await),
            "save" => {
                let params: SaveParams = parse_required(params)?;
                to_value(self.save(params.settings).await)
            }
            "discard" => to_value(Ok(self.discard().await)),
            "status" => to_value(self.status().await),
            "settings" => {
                let params: SettingsParams = parse_params(params)?;
                to_value(Ok(self.settings(params.reveal).await))
            }
            other => Err(RpcError::method_not_found(other)),
        }
    }
}

impl IpcHandler for DaemonService {
    fn handle(&self, method: &str, params: Option<serde_json::Value>) -> HandlerFuture<'_> {
        let method = method.to_string();
        Box::pin(async move { self.dispatch(&method, params).await })
    }
}

fn masked(settings: &Settings) -> Settings {
    let mut view = settings.clone();
    view.ddns.password = view.ddns.password.masked().into();
    view
}

/// Optional params: absent or null means defaults
fn parse_params<T>(params: Option<serde_json::Value>) -> std::result::Result<T, RpcError>
where
    T: serde::de::DeserializeOwned + Default,
{
    match params {
        None | Some(serde_json::Value::Null) => Ok(T::default()),
        Some(value) => serde_json::from_value(value).map_err(RpcError::invalid_params),
    }
}

fn parse_required<T>(params: Option<serde_json::Value>) -> std::result::Result<T, RpcError>
where
    T: serde::de::DeserializeOwned,
{
    let value = params.ok_or_else(|| RpcError::invalid_params("missing params"))?;
    serde_json::from_value(value).map_err(RpcError::invalid_params)
}

fn to_value<T: Serialize>(result: Result<T>) -> std::result::Result<serde_json::Value, RpcError> {
    let value = result.map_err(RpcError::from)?;
    serde_json::to_value(value).map_err(RpcError::application)
}

impl From<DaemonError> for RpcError {
    fn from(error: DaemonError) -> Self {
        match error {
            DaemonError::Controller(e) => RpcError::application(e),
            DaemonError::Settings(SettingsError::InvalidPort(port)) => RpcError::application(
                ControllerError::Validation(format!("port {} must be between 1 and 65535", port)),
            ),
            other => RpcError::application(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use harbor_core::{ListenerState, PortMapping, Secret, DEFAULT_LISTEN_PORT};
    use harbor_ddns::{DynamicDnsUpdater, NoIpProvider, UpdaterConfig};
    use harbor_listener::{ListenerOptions, TcpNetworkListener};
    use harbor_upnp::MemoryPortMapper;
    use tempfile::TempDir;

    use crate::controller::{ControllerConfig, ListenerController};
    use crate::ipc::{APPLICATION_ERROR, INVALID_PARAMS, METHOD_NOT_FOUND};

    struct Fixture {
        service: DaemonService,
        mapper: Arc<MemoryPortMapper>,
        _dir: TempDir,
    }

    fn free_port() -> u16 {
        let listener = std::net::TcpListener::bind("0.0.0.0:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    fn fixture_with(settings: Option<Settings>) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::new(dir.path().join("settings.json"));
        if let Some(settings) = settings {
            store.save(&settings).unwrap();
        }

        let mapper = Arc::new(MemoryPortMapper::new());
        // Discard port; no test here enables the updater
        let provider = Arc::new(NoIpProvider::with_endpoint("http://127.0.0.1:9/nic/update").unwrap());
        let ddns = Arc::new(DynamicDnsUpdater::with_config(
            provider,
            UpdaterConfig {
                stop_grace: Duration::from_millis(200),
                ..Default::default()
            },
        ));
        let listener = Arc::new(TcpNetworkListener::new(ListenerOptions {
            stop_grace: Duration::from_millis(200),
        }));
        let (handle, _task) = ListenerController::new(
            ControllerConfig {
                upnp_timeout: Duration::from_millis(200),
                ..Default::default()
            },
            listener,
            mapper.clone(),
            ddns,
        )
        .spawn();

        Fixture {
            service: DaemonService::new(store, handle).unwrap(),
            mapper,
            _dir: dir,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(None)
    }

    fn settings_on(port: u16) -> Settings {
        let mut settings = Settings::default();
        settings.listener.port = port;
        settings
    }

    async fn call(
        service: &DaemonService,
        method: &str,
        params: serde_json::Value,
    ) -> std::result::Result<serde_json::Value, RpcError> {
        service.handle(method, Some(params)).await
    }

    #[tokio::test]
    async fn test_defaults_on_first_run() {
        let f = fixture();
        let settings = f.service.settings(false).await;
        assert_eq!(settings.listener.port, DEFAULT_LISTEN_PORT);
        assert_eq!(f.service.status().await.unwrap().state, ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_start_with_pending_settings() {
        let f = fixture();
        let port = free_port();
        let mut pending = settings_on(port);
        pending.upnp.use_upnp = true;

        let report = f.service.start(Some(pending)).await.unwrap();

        assert_eq!(report.config.port, port);
        assert_eq!(report.mapping, Some(PortMapping::tcp(port, port)));
        // Pending settings are not committed by start
        assert_eq!(
            f.service.settings(false).await.listener.port,
            DEFAULT_LISTEN_PORT
        );

        f.service.stop().await.unwrap();
        assert!(f.mapper.active_mappings().is_empty());
    }

    #[tokio::test]
    async fn test_save_rejects_zero_port() {
        let f = fixture();
        let result = f.service.save(settings_on(0)).await;
        assert!(matches!(
            result,
            Err(DaemonError::Settings(SettingsError::InvalidPort(0)))
        ));
        assert_eq!(
            f.service.settings(false).await.listener.port,
            DEFAULT_LISTEN_PORT
        );
    }

    #[tokio::test]
    async fn test_save_persists() {
        let f = fixture();
        let mut pending = settings_on(9000);
        pending.ddns.password = Secret::new("hunter2");

        let saved = f.service.save(pending).await.unwrap();

        assert_eq!(saved.listener.port, 9000);
        assert_eq!(saved.ddns.password.expose(), "●●●●●●●");
        let reloaded = f.service.store.load().unwrap();
        assert_eq!(reloaded.listener.port, 9000);
        assert_eq!(reloaded.ddns.password.expose(), "hunter2");
    }

    #[tokio::test]
    async fn test_masked_password_round_trip_keeps_secret() {
        let mut initial = Settings::default();
        initial.ddns.password = Secret::new("hunter2");
        let f = fixture_with(Some(initial));

        let mut edited = f.service.settings(false).await;
        edited.ui.show_popup = true;
        f.service.save(edited).await.unwrap();

        assert_eq!(f.service.settings(true).await.ddns.password.expose(), "hunter2");
        assert!(f.service.settings(true).await.ui.show_popup);
    }

    #[tokio::test]
    async fn test_listener_settings_locked_while_listening() {
        let port = free_port();
        let f = fixture_with(Some(settings_on(port)));
        f.service.start(None).await.unwrap();

        let result = f.service.save(settings_on(port + 1)).await;
        assert!(matches!(
            result,
            Err(DaemonError::Controller(ControllerError::Validation(_)))
        ));

        // Other fields can still be saved
        let mut popup = settings_on(port);
        popup.ui.show_popup = true;
        assert!(f.service.save(popup).await.is_ok());

        f.service.stop().await.unwrap();
        assert!(f.service.save(settings_on(port + 1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_discard_returns_committed() {
        let f = fixture_with(Some(settings_on(9000)));
        assert_eq!(f.service.discard().await.listener.port, 9000);
    }

    #[tokio::test]
    async fn test_auto_listen() {
        let port = free_port();
        let mut settings = settings_on(port);
        settings.listener.auto_listen = true;
        let f = fixture_with(Some(settings));

        let report = f.service.auto_listen().await.unwrap().unwrap();
        assert_eq!(report.config.port, port);
        assert_eq!(f.service.status().await.unwrap().state, ListenerState::Listening);

        f.service.stop().await.unwrap();
    }

    #[tokio::test]
    async fn test_auto_listen_disabled() {
        let f = fixture();
        assert!(f.service.auto_listen().await.is_none());
        assert_eq!(f.service.status().await.unwrap().state, ListenerState::Stopped);
    }

    #[tokio::test]
    async fn test_rpc_start_stop() {
        let port = free_port();
        let f = fixture_with(Some(settings_on(port)));

        let started = f.service.handle("start", None).await.unwrap();
        assert_eq!(started["config"]["port"], port);

        let status = call(&f.service, "status", serde_json::Value::Null).await.unwrap();
        assert_eq!(status["state"], "listening");

        let error = f.service.handle("start", None).await.unwrap_err();
        assert_eq!(error.code, APPLICATION_ERROR);
        assert_eq!(error.message, "Listener is already active");

        call(&f.service, "stop", serde_json::Value::Null).await.unwrap();
        let error = f.service.handle("stop", None).await.unwrap_err();
        assert_eq!(error.message, "Listener is not active");
    }

    #[tokio::test]
    async fn test_rpc_settings_masking() {
        let mut initial = Settings::default();
        initial.ddns.password = Secret::new("pw");
        let f = fixture_with(Some(initial));

        let masked = f.service.handle("settings", None).await.unwrap();
        assert_eq!(masked["NoIPPassword"], "●●");

        let revealed = call(&f.service, "settings", serde_json::json!({"reveal": true}))
            .await
            .unwrap();
        assert_eq!(revealed["NoIPPassword"], "pw");
    }

    #[tokio::test]
    async fn test_rpc_save_zero_port_is_validation_error() {
        let f = fixture();
        let error = call(
            &f.service,
            "save",
            serde_json::json!({"settings": {"ListenPort": 0}}),
        )
        .await
        .unwrap_err();
        assert_eq!(error.code, APPLICATION_ERROR);
        assert!(error.message.starts_with("Invalid configuration"));
    }

    #[tokio::test]
    async fn test_rpc_bad_params() {
        let f = fixture();
        let error = f.service.handle("save", None).await.unwrap_err();
        assert_eq!(error.code, INVALID_PARAMS);

        let error = call(&f.service, "settings", serde_json::json!({"reveal": "yes"}))
            .await
            .unwrap_err();
        assert_eq!(error.code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_rpc_unknown_method() {
        let f = fixture();
        let error = f.service.handle("purchase_credits", None).await.unwrap_err();
        assert_eq!(error.code, METHOD_NOT_FOUND);
    }
}
