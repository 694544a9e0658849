//! Harbor Logging
//!
//! One place to install the `tracing` subscriber for every Harbor binary.
//! `RUST_LOG` wins over the level passed in.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::{fmt as fmt_layer, prelude::*, EnvFilter};

#[derive(Error, Debug)]
pub enum LoggingError {
    #[error("Logging already initialized: {0}")]
    AlreadyInitialized(String),

    #[error("Unknown log level: {0}")]
    UnknownLevel(String),
}

/// Verbosity for Harbor crates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Error => "error",
            Self::Warn => "warn",
            Self::Info => "info",
            Self::Debug => "debug",
            Self::Trace => "trace",
        }
    }

    /// Filter directive used when `RUST_LOG` is not set
    ///
    /// Dependencies stay at `info` (or quieter) so gateway discovery and HTTP
    /// clients do not flood debug output.
    pub fn directive(&self) -> String {
        let deps = match self {
            Self::Error | Self::Warn => self.as_str(),
            _ => "info",
        };
        format!("{},harbor={}", deps, self.as_str())
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = LoggingError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "error" => Ok(Self::Error),
            "warn" | "warning" => Ok(Self::Warn),
            "info" => Ok(Self::Info),
            "debug" => Ok(Self::Debug),
            "trace" => Ok(Self::Trace),
            other => Err(LoggingError::UnknownLevel(other.to_string())),
        }
    }
}

fn build_filter(level: LogLevel) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.directive()))
}

/// Install the global subscriber, failing if one is already set
pub fn try_init(level: LogLevel) -> Result<(), LoggingError> {
    tracing_subscriber::registry()
        .with(fmt_layer::layer().with_target(true))
        .with(build_filter(level))
        .try_init()
        .map_err(|e| LoggingError::AlreadyInitialized(e.to_string()))
}

/// Install the global subscriber, ignoring a previous installation
pub fn init(level: LogLevel) {
    let _ = try_init(level);
}

/// Map a `--verbose` flag to a level
pub fn level_for(verbose: bool) -> LogLevel {
    if verbose {
        LogLevel::Debug
    } else {
        LogLevel::Info
    }
}
