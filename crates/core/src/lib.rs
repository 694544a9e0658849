//! Harbor Core Types
//!
//! Data structures and error taxonomy shared by the listener controller,
//! the port mapper, the dynamic DNS updater and the daemon.

mod error;
mod types;

pub use error::*;
pub use types::*;
