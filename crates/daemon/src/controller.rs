//! Listener lifecycle controller
//!
//! One actor task owns the listener state and runs every transition to
//! completion. Callers talk to it through a [`ControllerHandle`]; dropping a
//! caller's future never leaves a transition half-applied.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use harbor_core::{
    ControllerError, DdnsConfig, DdnsWarning, ListenerConfig, ListenerState, PortMapping,
    Result, StartReport, StartWarning, StopReport, UpnpConfig, UpnpWarning,
};
use harbor_ddns::{DdnsCredentials, DynamicDnsUpdater, StartOutcome, UpdaterStatus};
use harbor_listener::{ListenError, NetworkListener};
use harbor_upnp::PortMapper;

/// Default bound on each gateway operation
pub const DEFAULT_UPNP_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Bound on discovery, mapping creation and mapping deletion
    pub upnp_timeout: Duration,
    /// Pending commands before callers wait
    pub mailbox_capacity: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            upnp_timeout: DEFAULT_UPNP_TIMEOUT,
            mailbox_capacity: 16,
        }
    }
}

/// Everything `start` needs, taken from a settings snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StartRequest {
    pub listener: ListenerConfig,
    pub upnp: UpnpConfig,
    pub ddns: DdnsConfig,
}

/// Snapshot of the controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub state: ListenerState,
    /// Active listener configuration while listening
    pub config: Option<ListenerConfig>,
    pub mapping: Option<PortMapping>,
    pub ddns: UpdaterStatus,
}

enum ControllerCommand {
    Start {
        request: StartRequest,
        reply: oneshot::Sender<Result<StartReport>>,
    },
    Stop {
        reply: oneshot::Sender<Result<StopReport>>,
    },
    Status {
        reply: oneshot::Sender<ControllerStatus>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

/// What a successful start set up
struct Session {
    config: ListenerConfig,
    mapping: Option<PortMapping>,
    /// The updater was running when the listener came up
    ddns: bool,
}

/// The listener state machine: `Stopped -> Listening -> Stopped`
pub struct ListenerController {
    config: ControllerConfig,
    listener: Arc<dyn NetworkListener>,
    mapper: Arc<dyn PortMapper>,
    ddns: Arc<DynamicDnsUpdater>,
    state: ListenerState,
    session: Option<Session>,
}

impl ListenerController {
    pub fn new(
        config: ControllerConfig,
        listener: Arc<dyn NetworkListener>,
        mapper: Arc<dyn PortMapper>,
        ddns: Arc<DynamicDnsUpdater>,
    ) -> Self {
        Self {
            config,
            listener,
            mapper,
            ddns,
            state: ListenerState::Stopped,
            session: None,
        }
    }

    /// Run the controller on its own task
    pub fn spawn(self) -> (ControllerHandle, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(self.config.mailbox_capacity.max(1));
        let handle = tokio::spawn(self.run(rx));
        (ControllerHandle { commands: tx }, handle)
    }

    async fn run(mut self, mut commands: mpsc::Receiver<ControllerCommand>) {
        debug!("Listener controller started");

        while let Some(command) = commands.recv().await {
            match command {
                ControllerCommand::Start { request, reply } => {
                    let result = self.start(request).await;
                    let _ = reply.send(result);
                }
                ControllerCommand::Stop { reply } => {
                    let result = self.stop().await;
                    let _ = reply.send(result);
                }
                ControllerCommand::Status { reply } => {
                    let _ = reply.send(self.status().await);
                }
                ControllerCommand::Shutdown { reply } => {
                    self.stop_if_listening().await;
                    let _ = reply.send(());
                    break;
                }
            }
        }

        // Every handle dropped or shutdown requested
        self.stop_if_listening().await;
        debug!("Listener controller exited");
    }

    async fn stop_if_listening(&mut self) {
        if self.state.is_listening() {
            if let Err(e) = self.stop().await {
                warn!("Stop during shutdown failed: {}", e);
            }
        }
    }

    async fn start(&mut self, request: StartRequest) -> Result<StartReport> {
        let StartRequest {
            listener: config,
            upnp,
            ddns,
        } = request;

        config.validate()?;
        if self.state.is_listening() {
            return Err(ControllerError::AlreadyActive);
        }

        info!(port = config.port, ipv6 = config.ipv6, upnp = upnp.enabled, ddns = ddns.enabled, "Starting listener");
        let mut warnings: Vec<StartWarning> = Vec::new();

        let mapping = if upnp.enabled {
            match self.map_port(config.port).await {
                Ok(mapping) => {
                    if mapping.is_mismatched() {
                        warnings.push(
                            UpnpWarning::Mismatch {
                                requested: mapping.requested_port,
                                actual: mapping.actual_port,
                            }
                            .into(),
                        );
                    }
                    Some(mapping)
                }
                Err(warning) => {
                    warnings.push(warning.into());
                    None
                }
            }
        } else {
            None
        };

        let mut ddns_running = false;
        let mut ddns_started = false;
        if ddns.enabled {
            match self.ddns.start(DdnsCredentials::from(&ddns)).await {
                Ok(outcome) => {
                    ddns_running = true;
                    ddns_started = outcome == StartOutcome::Started;
                }
                Err(e) => warnings.push(
                    DdnsWarning::NotStarted {
                        reason: e.to_string(),
                    }
                    .into(),
                ),
            }
        }

        if let Err(e) = self.bind(config).await {
            warn!(port = config.port, "Listener failed to start: {}", e);
            self.rollback(mapping, ddns_started).await;
            return Err(e);
        }

        for warning in &warnings {
            warn!(port = config.port, "{}", warning);
        }

        self.state = ListenerState::Listening;
        self.session = Some(Session {
            config,
            mapping,
            ddns: ddns_running,
        });
        info!(port = config.port, "Listener started");

        Ok(StartReport {
            config,
            mapping,
            ddns_running,
            warnings,
        })
    }

    async fn stop(&mut self) -> Result<StopReport> {
        if !self.state.is_listening() {
            return Err(ControllerError::NotActive);
        }
        let session = self.session.take();
        info!(port = session.as_ref().map(|s| s.config.port), "Stopping listener");

        self.listener.disconnect().await;

        let (mapping, ddns) = match session {
            Some(session) => (session.mapping, session.ddns),
            None => (None, false),
        };

        let mapping_removed = match mapping {
            Some(mapping) => Some(self.unmap_port(mapping.requested_port).await),
            None => None,
        };

        let ddns_stopped = ddns && self.ddns.stop().await;
        self.state = ListenerState::Stopped;
        info!("Listener stopped");

        Ok(StopReport {
            mapping_removed,
            ddns_stopped,
        })
    }

    async fn status(&self) -> ControllerStatus {
        ControllerStatus {
            state: self.state,
            config: self.session.as_ref().map(|s| s.config),
            mapping: self.session.as_ref().and_then(|s| s.mapping),
            ddns: self.ddns.status().await,
        }
    }

    /// Bind the listener, turning panics and silent failures into errors
    async fn bind(&self, config: ListenerConfig) -> Result<()> {
        let outcome = AssertUnwindSafe(self.listener.listen(config.port, config.ipv6))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(())) => {
                if self.listener.is_listening().await {
                    Ok(())
                } else {
                    Err(ControllerError::Network(
                        "listener reported success but is not listening".to_string(),
                    ))
                }
            }
            Ok(Err(ListenError::AddressInUse(port))) => Err(ControllerError::AddressInUse(port)),
            Ok(Err(ListenError::Network(reason))) => Err(ControllerError::Network(reason)),
            Err(panic) => Err(ControllerError::Network(format!(
                "listener panicked: {}",
                panic_message(panic.as_ref())
            ))),
        }
    }

    /// Undo what a failed start set up
    async fn rollback(&self, mapping: Option<PortMapping>, ddns_started: bool) {
        self.listener.disconnect().await;
        if let Some(mapping) = mapping {
            self.unmap_port(mapping.requested_port).await;
        }
        if ddns_started {
            self.ddns.stop().await;
        }
    }

    async fn map_port(&self, port: u16) -> std::result::Result<PortMapping, UpnpWarning> {
        let limit = self.config.upnp_timeout;
        let timed_out = UpnpWarning::Timeout {
            timeout_ms: limit.as_millis() as u64,
        };

        let found = tokio::time::timeout(limit, self.mapper.is_device_found())
            .await
            .map_err(|_| timed_out.clone())?;
        if !found {
            return Err(UpnpWarning::NoDevice);
        }

        match tokio::time::timeout(limit, self.mapper.create_port_map(port)).await {
            Ok(Ok(actual)) => {
                debug!(port, actual, "Gateway mapping created");
                Ok(PortMapping::tcp(port, actual))
            }
            Ok(Err(e)) => Err(UpnpWarning::MappingFailed {
                reason: e.to_string(),
            }),
            Err(_) => {
                // The mapper removes whatever the gateway applied late
                self.unmap_port(port).await;
                Err(timed_out)
            }
        }
    }

    async fn unmap_port(&self, port: u16) -> bool {
        match tokio::time::timeout(self.config.upnp_timeout, self.mapper.delete_port_map(port)).await
        {
            Ok(true) => {
                debug!(port, "Gateway mapping removed");
                true
            }
            Ok(false) => {
                warn!(port, "Could not remove gateway mapping");
                false
            }
            Err(_) => {
                warn!(port, "Gateway mapping removal timed out");
                false
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Cloneable client of the controller task
#[derive(Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<ControllerCommand>,
}

impl ControllerHandle {
    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> ControllerCommand,
    ) -> Result<T> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(command(reply))
            .await
            .map_err(|_| ControllerError::Closed)?;
        response.await.map_err(|_| ControllerError::Closed)
    }

    pub async fn start(&self, request: StartRequest) -> Result<StartReport> {
        self.request(|reply| ControllerCommand::Start { request, reply })
            .await?
    }

    pub async fn stop(&self) -> Result<StopReport> {
        self.request(|reply| ControllerCommand::Stop { reply }).await?
    }

    pub async fn status(&self) -> Result<ControllerStatus> {
        self.request(|reply| ControllerCommand::Status { reply }).await
    }

    pub async fn state(&self) -> Result<ListenerState> {
        Ok(self.status().await?.state)
    }

    /// Stop if listening, then end the controller task
    pub async fn shutdown(&self) -> Result<()> {
        self.request(|reply| ControllerCommand::Shutdown { reply })
            .await
    }

    pub fn is_closed(&self) -> bool {
        self.commands.is_closed()
    }
}
