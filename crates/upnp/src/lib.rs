//! Harbor UPnP
//!
//! Port forwarding on a UPnP-capable gateway.
//!
//! ## Components
//!
//! - **PortMapper**: the contract the listener controller consumes
//! - **IgdPortMapper**: `igd-next` backed implementation (SSDP discovery, SOAP
//!   AddPortMapping / DeletePortMapping)
//! - **MemoryPortMapper**: in-process gateway for tests and dry runs
//!
//! The gateway is authoritative: the external port it assigns may differ
//! from the one requested.

mod igd;
mod memory;

pub use igd::{IgdPortMapper, UpnpOptions, DEFAULT_SEARCH_TIMEOUT};
pub use memory::MemoryPortMapper;

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpnpError {
    #[error("No UPnP gateway found: {0}")]
    NoGateway(String),

    #[error("Could not determine local address: {0}")]
    LocalAddress(String),

    #[error("Gateway rejected port mapping: {0}")]
    MappingRejected(String),

    #[error("Invalid port {0}")]
    InvalidPort(u16),
}

pub type Result<T> = std::result::Result<T, UpnpError>;

/// Gateway port forwarding
#[async_trait]
pub trait PortMapper: Send + Sync {
    /// Whether a gateway answered discovery
    async fn is_device_found(&self) -> bool;

    /// Map external TCP traffic to local `port`
    ///
    /// Returns the external port the gateway assigned. Calling again for a
    /// port that is already mapped returns the recorded port without creating
    /// a second mapping.
    async fn create_port_map(&self, port: u16) -> Result<u16>;

    /// Remove the mapping created for `port`
    ///
    /// Never fails: an absent mapping counts as removed, other failures are
    /// logged and reported as `false`.
    async fn delete_port_map(&self, port: u16) -> bool;
}
