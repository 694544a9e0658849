//! In-process gateway

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use harbor_core::PortMapping;

use crate::{PortMapper, Result, UpnpError};

#[derive(Default)]
struct MemoryState {
    device_found: bool,
    /// requested port -> external port
    mappings: HashMap<u16, u16>,
    /// External port the gateway will hand out for a requested port
    reassigned: HashMap<u16, u16>,
    create_failure: Option<String>,
    delete_fails: bool,
    create_delay: Option<Duration>,
    discovery_calls: usize,
    create_calls: usize,
    delete_calls: usize,
}

/// Gateway simulated in memory
///
/// Behaves like a cooperative router by default; knobs allow simulating a
/// missing device, reassigned ports, rejected or slow mappings and failed
/// removals. Call counters let callers assert which operations ran.
pub struct MemoryPortMapper {
    state: Mutex<MemoryState>,
}

impl MemoryPortMapper {
    /// A gateway that is present and accepts every mapping
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                device_found: true,
                ..Default::default()
            }),
        }
    }

    /// No gateway on the network
    pub fn without_device() -> Self {
        let mapper = Self::new();
        mapper.set_device_found(false);
        mapper
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_device_found(&self, found: bool) {
        self.state().device_found = found;
    }

    /// Hand out `external` whenever `requested` is mapped
    pub fn reassign_port(&self, requested: u16, external: u16) {
        self.state().reassigned.insert(requested, external);
    }

    /// Reject future mappings with `reason`
    pub fn fail_create(&self, reason: impl Into<String>) {
        self.state().create_failure = Some(reason.into());
    }

    pub fn fail_delete(&self, fail: bool) {
        self.state().delete_fails = fail;
    }

    /// Make mapping creation take `delay`
    pub fn delay_create(&self, delay: Duration) {
        self.state().create_delay = Some(delay);
    }

    pub fn active_mappings(&self) -> Vec<PortMapping> {
        let mut mappings: Vec<_> = self
            .state()
            .mappings
            .iter()
            .map(|(requested, actual)| PortMapping::tcp(*requested, *actual))
            .collect();
        mappings.sort_by_key(|m| m.requested_port);
        mappings
    }

    pub fn is_mapped(&self, port: u16) -> bool {
        self.state().mappings.contains_key(&port)
    }

    pub fn discovery_calls(&self) -> usize {
        self.state().discovery_calls
    }

    pub fn create_calls(&self) -> usize {
        self.state().create_calls
    }

    pub fn delete_calls(&self) -> usize {
        self.state().delete_calls
    }

    /// Total number of gateway operations performed
    pub fn total_calls(&self) -> usize {
        let state = self.state();
        state.discovery_calls + state.create_calls + state.delete_calls
    }
}

impl Default for MemoryPortMapper {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PortMapper for MemoryPortMapper {
    async fn is_device_found(&self) -> bool {
        let mut state = self.state();
        state.discovery_calls += 1;
        state.device_found
    }

    async fn create_port_map(&self, port: u16) -> Result<u16> {
        let delay = {
            let mut state = self.state();
            state.create_calls += 1;
            state.create_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state();
        if port == 0 {
            return Err(UpnpError::InvalidPort(port));
        }
        if !state.device_found {
            return Err(UpnpError::NoGateway("no device in memory gateway".to_string()));
        }
        if let Some(reason) = state.create_failure.clone() {
            return Err(UpnpError::MappingRejected(reason));
        }
        if let Some(actual) = state.mappings.get(&port) {
            return Ok(*actual);
        }

        let actual = state.reassigned.get(&port).copied().unwrap_or(port);
        state.mappings.insert(port, actual);
        debug!(port, actual, "Memory gateway mapped port");
        Ok(actual)
    }

    async fn delete_port_map(&self, port: u16) -> bool {
        let mut state = self.state();
        state.delete_calls += 1;
        if state.delete_fails {
            return false;
        }
        state.mappings.remove(&port);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let mapper = MemoryPortMapper::new();
        assert_eq!(mapper.create_port_map(4782).await, Ok(4782));
        assert_eq!(mapper.create_port_map(4782).await, Ok(4782));
        assert_eq!(mapper.active_mappings().len(), 1);
        assert_eq!(mapper.create_calls(), 2);
    }

    #[tokio::test]
    async fn test_reassigned_port() {
        let mapper = MemoryPortMapper::new();
        mapper.reassign_port(4782, 9000);
        assert_eq!(mapper.create_port_map(4782).await, Ok(9000));
        assert_eq!(mapper.active_mappings(), vec![PortMapping::tcp(4782, 9000)]);
    }

    #[tokio::test]
    async fn test_delete_absent_mapping_succeeds() {
        let mapper = MemoryPortMapper::new();
        assert!(mapper.delete_port_map(4782).await);
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_mapping() {
        let mapper = MemoryPortMapper::new();
        mapper.create_port_map(4782).await.unwrap();
        mapper.fail_delete(true);
        assert!(!mapper.delete_port_map(4782).await);
        assert!(mapper.is_mapped(4782));
    }

    #[tokio::test]
    async fn test_without_device() {
        let mapper = MemoryPortMapper::without_device();
        assert!(!mapper.is_device_found().await);
        assert!(matches!(
            mapper.create_port_map(4782).await,
            Err(UpnpError::NoGateway(_))
        ));
    }

    #[tokio::test]
    async fn test_fail_create() {
        let mapper = MemoryPortMapper::new();
        mapper.fail_create("ActionNotAuthorized");
        assert_eq!(
            mapper.create_port_map(4782).await,
            Err(UpnpError::MappingRejected("ActionNotAuthorized".to_string()))
        );
        assert!(mapper.active_mappings().is_empty());
    }
}
