//! Harbor Dynamic DNS
//!
//! Keeps a hostname pointed at this host's public address.
//!
//! ## Components
//!
//! - **UpdateProvider**: one update round-trip against a DDNS service
//! - **NoIpProvider**: No-IP HTTP update adapter
//! - **DynamicDnsUpdater**: periodic background loop with retry/backoff and
//!   an idempotent `start`
//!
//! ## Failure policy
//!
//! Transient failures (timeouts, connection errors, server errors) are
//! retried with exponential backoff. An authentication rejection halts the
//! loop until different credentials are supplied.

mod backoff;
mod noip;
mod updater;

pub use backoff::Backoff;
pub use noip::{classify_response, NoIpProvider, NOIP_UPDATE_URL};
pub use updater::{DynamicDnsUpdater, StartOutcome, UpdaterConfig, UpdaterStatus};

use async_trait::async_trait;
use thiserror::Error;

use harbor_core::{DdnsConfig, Secret};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DdnsError {
    #[error("Invalid credentials: {0}")]
    InvalidCredentials(String),

    #[error("HTTP client error: {0}")]
    Http(String),
}

pub type Result<T> = std::result::Result<T, DdnsError>;

/// Failure of a single update attempt
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UpdateError {
    /// The provider refused these credentials; retrying cannot help
    #[error("Update rejected: {0}")]
    Auth(String),

    /// Worth retrying later
    #[error("Transient update failure: {0}")]
    Transient(String),
}

/// Successful update attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// The record now points at `address`
    Updated { address: Option<String> },
    /// The record already pointed at the current address
    Unchanged,
}

/// Hostname and account used for updates
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DdnsCredentials {
    pub hostname: String,
    pub username: String,
    pub password: Secret,
}

impl DdnsCredentials {
    pub fn new(
        hostname: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<Secret>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            username: username.into(),
            password: password.into(),
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.hostname.trim().is_empty() {
            return Err(DdnsError::InvalidCredentials("hostname is empty".to_string()));
        }
        if self.username.trim().is_empty() {
            return Err(DdnsError::InvalidCredentials("username is empty".to_string()));
        }
        Ok(())
    }
}

impl From<&DdnsConfig> for DdnsCredentials {
    fn from(config: &DdnsConfig) -> Self {
        Self {
            hostname: config.hostname.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
        }
    }
}

/// One update round-trip against a DDNS service
#[async_trait]
pub trait UpdateProvider: Send + Sync {
    /// Publish the current public address for `credentials.hostname`
    async fn update(
        &self,
        credentials: &DdnsCredentials,
    ) -> std::result::Result<UpdateOutcome, UpdateError>;
}
