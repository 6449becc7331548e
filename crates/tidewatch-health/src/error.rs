use thiserror::Error;

use tidewatch_state::StateError;

pub type HealthResult<T> = Result<T, HealthError>;

/// Errors surfaced by the public health operations.
///
/// A failed probe is never an error: it is recorded as data. Only lookups of
/// unknown ids and persistence failures propagate.
#[derive(Debug, Error)]
pub enum HealthError {
    #[error("application not found: {0}")]
    ApplicationNotFound(String),

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error(transparent)]
    State(#[from] StateError),
}
