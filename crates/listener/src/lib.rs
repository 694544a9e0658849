//! Harbor network listener
//!
//! The controller only binds and unbinds the listener. What happens to an
//! accepted connection is up to the [`Connection`] sink handed to
//! [`TcpNetworkListener::with_sink`].

mod tcp;

pub use tcp::{Connection, ListenerOptions, TcpNetworkListener};

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ListenError {
    #[error("Port {0} is already in use")]
    AddressInUse(u16),

    #[error("Network error: {0}")]
    Network(String),
}

pub type Result<T> = std::result::Result<T, ListenError>;

/// Something that can accept inbound connections on a port
#[async_trait]
pub trait NetworkListener: Send + Sync {
    /// Bind `port` (dual-stack when `ipv6`) and begin accepting
    async fn listen(&self, port: u16, ipv6: bool) -> Result<()>;

    /// Stop accepting and release the port. Safe to call when not listening.
    async fn disconnect(&self);

    async fn is_listening(&self) -> bool;
}
