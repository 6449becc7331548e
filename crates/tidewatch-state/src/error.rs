//! Error types for the Tidewatch state store.
//!
//! Every redb failure is flattened to its message; callers only need to know
//! which stage failed, not the redb-specific error type.

use thiserror::Error;

/// Result type alias for state store operations.
pub type StateResult<T> = Result<T, StateError>;

/// Errors that can occur during state store operations.
#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("deserialization error: {0}")]
    Deserialize(String),

    #[error("application not found: {0}")]
    ApplicationNotFound(String),

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("record target mismatch: expected {expected}, got {actual}")]
    TargetMismatch { expected: String, actual: String },
}
