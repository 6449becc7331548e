//! Runtime control error types.

use thiserror::Error;

/// Errors raised by runtime control adapters.
///
/// Any of these means the runtime could not tell us the workload's state;
/// none of them says the workload itself is down.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("runtime unreachable at {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },

    #[error("`{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    #[error("failed to launch runtime client: {0}")]
    Io(#[from] std::io::Error),

    #[error("unexpected runtime output: {0}")]
    Parse(String),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;
