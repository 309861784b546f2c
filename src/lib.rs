//! Hybrid storage database and in-process messaging framework.
//!
//! Two halves, independently usable:
//!
//! - `storage`/`schema`/`entity`/`index`: an in-memory, multi-index entity
//!   store mirrored to a raw-file JSON tree on disk.
//! - `bus`/`transport`: a pub/sub message bus and a length-framed TCP
//!   transport for process-to-process messaging.

pub mod bus;
pub mod config;
pub mod entity;
pub mod error;
pub mod id;
pub mod index;
pub mod schema;
pub mod storage;
pub mod transport;

pub use config::{BusConfig, HsdbConfig, PersistenceStrategy, TransportConfig};
pub use entity::Entity;
pub use error::{ConflictError, HsdbError, HsdbResult, SchemaError, ValidationIssue};
pub use storage::query::{FilterCondition, Query, SortOrder};
pub use storage::Engine;

/// Installs a `tracing` subscriber reading its filter from `RUST_LOG`
/// (defaulting to `info`), matching the logging setup every async binary in
/// this crate's reference pack performs once at startup.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
