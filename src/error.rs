//! Structured error taxonomy for the storage engine and messaging substrate.
//!
//! `HsdbError` is the single type returned by every public operation. It is
//! deliberately flat (no nested `source` chains beyond one level) so callers
//! can match on a variant without digging through wrapped causes.

use std::fmt;

use thiserror::Error;

/// Top-level error returned by the storage engine, bus, and transport.
#[derive(Debug, Error)]
pub enum HsdbError {
    /// Validation failed for one or more fields of an entity.
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// Primary id already present, or a unique-field collision.
    #[error("conflict: {0}")]
    Conflict(#[from] ConflictError),

    /// Re-registering a model under a shape that differs from what was
    /// already registered for it.
    #[error("schema conflict: model '{model_name}' is already registered with a different shape")]
    SchemaConflict { model_name: String },

    /// `get`/`update`/`delete` on an id that is not present.
    #[error("entity not found: {entity_id}")]
    NotFound { entity_id: String },

    /// Filesystem write/read failure after the index commit; indices were
    /// rolled back.
    #[error("persistence error for {path}: {message}")]
    Persistence { path: String, message: String },

    /// A rollback after a persistence failure itself failed; the engine is
    /// now read-only.
    #[error("engine quarantined: {reason}")]
    EngineQuarantined { reason: String },

    /// Pub/sub broker connect or liveness check failed.
    #[error("broker unavailable: {0}")]
    BrokerUnavailable(String),

    /// A request/response waiter elapsed before a matching response arrived.
    #[error("dispatch timed out after {0:?}")]
    DispatchTimeout(std::time::Duration),

    /// Transport frame malformed, or ACK mismatch.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// TCP client could not connect and `auto_reconnect` is disabled.
    #[error("peer unreachable: {0}")]
    PeerUnreachable(String),

    /// A registered handler raised; logged and swallowed, never meant to
    /// escape to a caller, but kept in the taxonomy so test code and the
    /// `operations` binary can report it uniformly.
    #[error("handler error: {0}")]
    Handler(String),
}

impl HsdbError {
    pub fn not_found(entity_id: impl Into<String>) -> Self {
        Self::NotFound { entity_id: entity_id.into() }
    }

    pub fn persistence(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Persistence { path: path.into(), message: message.into() }
    }
}

/// Collection of field-level validation issues encountered while preparing a
/// mutation.
#[derive(Debug, Error)]
#[error("validation failed: {issues:?}")]
pub struct SchemaError {
    pub issues: Vec<ValidationIssue>,
}

impl SchemaError {
    pub fn new<I>(issues: I) -> Self
    where
        I: IntoIterator<Item = ValidationIssue>,
    {
        Self { issues: issues.into_iter().collect() }
    }

    pub fn single(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new([ValidationIssue::new(field, code, message)])
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty()
    }
}

/// A single field (or constraint) validation failure.
#[derive(Debug, Clone)]
pub struct ValidationIssue {
    pub field: String,
    pub code: String,
    pub message: String,
}

impl ValidationIssue {
    pub fn new(field: impl Into<String>, code: impl Into<String>, message: impl Into<String>) -> Self {
        Self { field: field.into(), code: code.into(), message: message.into() }
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.field, self.message, self.code)
    }
}

/// Primary id collision or unique-field collision.
#[derive(Debug, Error)]
pub enum ConflictError {
    #[error("entity with id {entity_id} already exists")]
    DuplicateId { entity_id: String },

    #[error("unique constraint violated on {model_name}.{fields:?}: value already used by {existing_entity_id}")]
    UniqueViolation { model_name: String, fields: Vec<String>, existing_entity_id: String },
}

pub type HsdbResult<T> = Result<T, HsdbError>;
pub type ValidationResult<T> = Result<T, SchemaError>;
