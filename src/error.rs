use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Why a call against the vision backend did not produce an answer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendFault {
    /// The circuit breaker is open; no request was sent.
    CircuitOpen,
    /// The request exceeded the inference timeout budget.
    Timeout(Duration),
    /// Transport or protocol failure reported by the backend.
    Failed(String),
}

impl fmt::Display for BackendFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackendFault::CircuitOpen => write!(f, "circuit breaker open"),
            BackendFault::Timeout(budget) => write!(f, "timed out after {}ms", budget.as_millis()),
            BackendFault::Failed(reason) => write!(f, "{reason}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("frame source unavailable: {0}")]
    SourceUnavailable(String),

    #[error("inference backend unavailable: {0}")]
    BackendUnavailable(BackendFault),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("failed to persist prompt: {0}")]
    Persistence(String),

    #[error("rate limited; retry in {}ms", retry_after.as_millis())]
    RateLimited { retry_after: Duration },

    #[error("no analyzed frame available yet")]
    NoFrameAvailable,
}

pub type MonitorResult<T> = Result<T, MonitorError>;
