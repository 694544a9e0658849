//! `igd-next` backed port mapper

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use igd_next::{AddPortError, PortMappingProtocol, RemovePortError, SearchOptions};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{PortMapper, Result, UpnpError};

/// How long SSDP discovery may take
pub const DEFAULT_SEARCH_TIMEOUT: Duration = Duration::from_secs(5);

type TokioGateway = igd_next::aio::Gateway<igd_next::aio::tokio::Tokio>;

/// Gateway mapping options
#[derive(Debug, Clone)]
pub struct UpnpOptions {
    /// Discovery timeout
    pub search_timeout: Duration,
    /// Lease in seconds (0 = until the gateway reboots)
    pub lease_duration: u32,
    /// Description shown in the router's mapping table
    pub description: String,
}

impl Default for UpnpOptions {
    fn default() -> Self {
        Self {
            search_timeout: DEFAULT_SEARCH_TIMEOUT,
            lease_duration: 0,
            description: "Harbor".to_string(),
        }
    }
}

#[derive(Error, Debug)]
enum GatewayError {
    #[error("external port already in use")]
    PortInUse,
    #[error("no such port mapping")]
    NoSuchMapping,
    #[error("{0}")]
    Other(String),
}

/// The three IGD actions the mapper issues
#[async_trait]
trait IgdGateway: Send + Sync {
    fn addr(&self) -> SocketAddr;

    async fn add_port(
        &self,
        external_port: u16,
        local_addr: SocketAddr,
        lease: u32,
        description: &str,
    ) -> std::result::Result<(), GatewayError>;

    async fn add_any_port(
        &self,
        local_addr: SocketAddr,
        lease: u32,
        description: &str,
    ) -> std::result::Result<u16, GatewayError>;

    async fn remove_port(&self, external_port: u16) -> std::result::Result<(), GatewayError>;
}

#[async_trait]
impl IgdGateway for TokioGateway {
    fn addr(&self) -> SocketAddr {
        self.addr
    }

    async fn add_port(
        &self,
        external_port: u16,
        local_addr: SocketAddr,
        lease: u32,
        description: &str,
    ) -> std::result::Result<(), GatewayError> {
        TokioGateway::add_port(
            self,
            PortMappingProtocol::TCP,
            external_port,
            local_addr,
            lease,
            description,
        )
        .await
        .map_err(|e| match e {
            AddPortError::PortInUse => GatewayError::PortInUse,
            e => GatewayError::Other(e.to_string()),
        })
    }

    async fn add_any_port(
        &self,
        local_addr: SocketAddr,
        lease: u32,
        description: &str,
    ) -> std::result::Result<u16, GatewayError> {
        TokioGateway::add_any_port(self, PortMappingProtocol::TCP, local_addr, lease, description)
            .await
            .map_err(|e| GatewayError::Other(e.to_string()))
    }

    async fn remove_port(&self, external_port: u16) -> std::result::Result<(), GatewayError> {
        TokioGateway::remove_port(self, PortMappingProtocol::TCP, external_port)
            .await
            .map_err(|e| match e {
                RemovePortError::NoSuchPortMapping => GatewayError::NoSuchMapping,
                e => GatewayError::Other(e.to_string()),
            })
    }
}

/// Port mapper talking to the first IGD found on the LAN
///
/// The gateway handle is cached after the first successful discovery.
/// Gateway calls for a new mapping run on their own task holding the mapping
/// table, so a caller that gives up early does not lose the external port the
/// gateway applied; `delete_port_map` waits for that task and removes exactly
/// what it created.
pub struct IgdPortMapper {
    options: UpnpOptions,
    gateway: Mutex<Option<Arc<dyn IgdGateway>>>,
    /// requested port -> external port assigned by the gateway
    mappings: Arc<Mutex<HashMap<u16, u16>>>,
}

impl IgdPortMapper {
    pub fn new() -> Self {
        Self::with_options(UpnpOptions::default())
    }

    pub fn with_options(options: UpnpOptions) -> Self {
        Self {
            options,
            gateway: Mutex::new(None),
            mappings: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    #[cfg(test)]
    fn with_gateway(gateway: Arc<dyn IgdGateway>) -> Self {
        Self {
            options: UpnpOptions::default(),
            gateway: Mutex::new(Some(gateway)),
            mappings: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Ports currently mapped through this instance (requested, external)
    pub async fn mapped_ports(&self) -> Vec<(u16, u16)> {
        let mut ports: Vec<_> = self
            .mappings
            .lock()
            .await
            .iter()
            .map(|(requested, actual)| (*requested, *actual))
            .collect();
        ports.sort_unstable();
        ports
    }

    async fn discover(&self) -> Result<Arc<dyn IgdGateway>> {
        let mut cached = self.gateway.lock().await;
        if let Some(gateway) = cached.as_ref() {
            return Ok(gateway.clone());
        }

        debug!("Searching for UPnP gateway...");
        let search = igd_next::aio::tokio::search_gateway(SearchOptions {
            timeout: Some(self.options.search_timeout),
            ..Default::default()
        });

        let gateway: Arc<dyn IgdGateway> =
            match tokio::time::timeout(self.options.search_timeout, search).await {
                Ok(Ok(gateway)) => Arc::new(gateway),
                Ok(Err(e)) => return Err(UpnpError::NoGateway(e.to_string())),
                Err(_) => {
                    return Err(UpnpError::NoGateway(format!(
                        "discovery timed out after {:?}",
                        self.options.search_timeout
                    )))
                }
            };

        info!(gateway = %gateway.addr(), "UPnP gateway found");
        *cached = Some(gateway.clone());
        Ok(gateway)
    }
}

impl Default for IgdPortMapper {
    fn default() -> Self {
        Self::new()
    }
}

/// Ask for `port`, falling back to any free external port
async fn add_mapping(
    gateway: &dyn IgdGateway,
    port: u16,
    local_addr: SocketAddr,
    lease: u32,
    description: &str,
) -> Result<u16> {
    match gateway.add_port(port, local_addr, lease, description).await {
        Ok(()) => Ok(port),
        Err(GatewayError::PortInUse) => {
            debug!(port, "External port taken, asking the gateway for any port");
            gateway
                .add_any_port(local_addr, lease, description)
                .await
                .map_err(|e| UpnpError::MappingRejected(e.to_string()))
        }
        Err(e) => Err(UpnpError::MappingRejected(e.to_string())),
    }
}

#[async_trait]
impl PortMapper for IgdPortMapper {
    async fn is_device_found(&self) -> bool {
        match self.discover().await {
            Ok(_) => true,
            Err(e) => {
                debug!(error = %e, "UPnP discovery failed");
                false
            }
        }
    }

    async fn create_port_map(&self, port: u16) -> Result<u16> {
        if port == 0 {
            return Err(UpnpError::InvalidPort(port));
        }

        let mut mappings = self.mappings.clone().lock_owned().await;
        if let Some(actual) = mappings.get(&port) {
            debug!(port, actual = *actual, "Port already mapped");
            return Ok(*actual);
        }

        let gateway = self.discover().await?;
        let local_addr = SocketAddr::new(local_ip_for(gateway.addr())?, port);
        let description = self.options.description.clone();
        let lease = self.options.lease_duration;

        let task = tokio::spawn(async move {
            let actual = add_mapping(gateway.as_ref(), port, local_addr, lease, &description).await?;
            info!(local = %local_addr, external_port = actual, "UPnP port mapped");
            mappings.insert(port, actual);
            Ok::<_, UpnpError>(actual)
        });

        task.await
            .map_err(|e| UpnpError::MappingRejected(format!("mapping task failed: {}", e)))?
    }

    async fn delete_port_map(&self, port: u16) -> bool {
        let mut mappings = self.mappings.lock().await;
        let Some(external_port) = mappings.remove(&port) else {
            debug!(port, "No UPnP mapping recorded");
            return true;
        };

        let gateway = match self.discover().await {
            Ok(gateway) => gateway,
            Err(e) => {
                warn!(port, error = %e, "Cannot remove UPnP mapping");
                return false;
            }
        };

        match gateway.remove_port(external_port).await {
            Ok(()) => {
                info!(port, external_port, "UPnP mapping removed");
                true
            }
            Err(GatewayError::NoSuchMapping) => {
                debug!(port, external_port, "No UPnP mapping to remove");
                true
            }
            Err(e) => {
                warn!(port, external_port, error = %e, "UPnP mapping removal failed");
                false
            }
        }
    }
}

/// Local address used to reach the gateway
///
/// Connecting a UDP socket sends nothing; it only selects the outbound
/// interface.
fn local_ip_for(gateway_addr: SocketAddr) -> Result<IpAddr> {
    let bind_addr: SocketAddr = if gateway_addr.is_ipv6() {
        "[::]:0".parse().map_err(|_| UpnpError::LocalAddress("bad bind address".into()))?
    } else {
        "0.0.0.0:0".parse().map_err(|_| UpnpError::LocalAddress("bad bind address".into()))?
    };

    let socket = UdpSocket::bind(bind_addr).map_err(|e| UpnpError::LocalAddress(e.to_string()))?;
    socket
        .connect(gateway_addr)
        .map_err(|e| UpnpError::LocalAddress(e.to_string()))?;
    let local = socket
        .local_addr()
        .map_err(|e| UpnpError::LocalAddress(e.to_string()))?;
    Ok(local.ip())
}
