//! Engine, bus, and transport configuration.
//!
//! Persistence is a strategy enum chosen at construction time, not a bool
//! threaded through every call.

use std::path::PathBuf;

use crate::error::{HsdbError, SchemaError, ValidationIssue};

/// How the storage engine persists committed entities.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum PersistenceStrategy {
    /// Every mutation is mirrored to `<root>/hsdb/index/...` as JSON.
    #[default]
    Persistent,

    /// No disk I/O at all; indices stay live in memory. Used for tests and
    /// ephemeral runs.
    InMemory,
}

impl PersistenceStrategy {
    pub fn is_in_memory(self) -> bool {
        matches!(self, Self::InMemory)
    }
}

/// Top-level engine configuration.
#[derive(Clone, Debug)]
pub struct HsdbConfig {
    /// Root directory under which the `hsdb/` tree is created.
    ///
    /// Ignored when `persistence` is `InMemory`.
    pub root_path: PathBuf,

    /// Persistence strategy.
    pub persistence: PersistenceStrategy,

    /// Optional cap on the number of entities the primary index keeps
    /// resident before evicting the least-recently-used entry to disk.
    /// `None` disables eviction.
    pub primary_index_max_size: Option<usize>,

    /// Bus tuning.
    pub bus: BusConfig,

    /// Transport tuning.
    pub transport: TransportConfig,
}

impl Default for HsdbConfig {
    fn default() -> Self {
        Self {
            root_path: PathBuf::from("."),
            persistence: PersistenceStrategy::default(),
            primary_index_max_size: None,
            bus: BusConfig::default(),
            transport: TransportConfig::default(),
        }
    }
}

impl HsdbConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a config for ephemeral/test use: no disk I/O at all.
    pub fn in_memory() -> Self {
        Self { persistence: PersistenceStrategy::InMemory, ..Default::default() }
    }

    /// Builds a config that persists under `root_path`.
    pub fn persistent(root_path: impl Into<PathBuf>) -> Self {
        Self { root_path: root_path.into(), persistence: PersistenceStrategy::Persistent, ..Default::default() }
    }

    pub fn with_primary_index_max_size(mut self, max_size: usize) -> Self {
        self.primary_index_max_size = Some(max_size);
        self
    }

    /// Validates the configuration, returning structured issues rather than
    /// panicking.
    pub fn validate(&self) -> Result<(), HsdbError> {
        let mut issues = Vec::new();

        if let Some(0) = self.primary_index_max_size {
            issues.push(ValidationIssue::new(
                "primary_index_max_size",
                "validation.range",
                "must be greater than 0 when set",
            ));
        }
        if self.bus.response_timeout.is_zero() {
            issues.push(ValidationIssue::new(
                "bus.response_timeout",
                "validation.range",
                "must be greater than zero",
            ));
        }
        if self.transport.outbound_queue_depth == 0 {
            issues.push(ValidationIssue::new(
                "transport.outbound_queue_depth",
                "validation.range",
                "must be greater than zero",
            ));
        }

        if issues.is_empty() { Ok(()) } else { Err(HsdbError::Schema(SchemaError::new(issues))) }
    }
}

/// Pub/sub bus tuning parameters.
#[derive(Clone, Copy, Debug)]
pub struct BusConfig {
    /// Default deadline for a `send(..., await_response=true)` waiter.
    pub response_timeout: std::time::Duration,

    /// Deadline for the `terminate()` graceful-shutdown join before a hard
    /// stop is issued.
    pub terminate_deadline: std::time::Duration,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            response_timeout: std::time::Duration::from_secs(5),
            terminate_deadline: std::time::Duration::from_secs(5),
        }
    }
}

/// TCP transport tuning parameters.
#[derive(Clone, Copy, Debug)]
pub struct TransportConfig {
    /// Bounded outbound queue size per client worker. Default 32.
    pub outbound_queue_depth: usize,

    /// How long to wait for the server's `ACK` before aborting the
    /// exchange. Default 2s.
    pub acknowledge_timeout: std::time::Duration,

    /// Whether the client worker reconnects automatically on socket error.
    pub auto_reconnect: bool,

    /// Base backoff delay for reconnection attempts. Default 0.5s.
    pub reconnect_base_delay: std::time::Duration,

    /// Backoff cap. Default 10s.
    pub reconnect_max_delay: std::time::Duration,

    /// TCP accept backlog for server workers.
    pub listen_backlog: u32,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            outbound_queue_depth: 32,
            acknowledge_timeout: std::time::Duration::from_secs(2),
            auto_reconnect: true,
            reconnect_base_delay: std::time::Duration::from_millis(500),
            reconnect_max_delay: std::time::Duration::from_secs(10),
            listen_backlog: 128,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_validates() {
        assert!(HsdbConfig::default().validate().is_ok());
    }

    #[test]
    fn in_memory_config_is_in_memory() {
        let config = HsdbConfig::in_memory();
        assert!(config.persistence.is_in_memory());
    }

    #[test]
    fn zero_max_size_fails_validation() {
        let config = HsdbConfig::default().with_primary_index_max_size(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn zero_queue_depth_fails_validation() {
        let mut config = HsdbConfig::default();
        config.transport.outbound_queue_depth = 0;
        assert!(config.validate().is_err());
    }
}
