//! Error types crossing the dispatcher boundary
//!
//! Per-attempt failures stay inside the rotation loop. Only admission gate
//! failures, an empty candidate list, exhaustion, and the direct path's own
//! failures reach callers.

use transport::AttemptError;

/// One failed attempt, kept for the exhaustion history.
#[derive(Debug, Clone)]
pub struct AttemptRecord {
    /// Credential suffix, never the full secret
    pub preview: String,
    pub provenance: String,
    pub error: AttemptError,
}

/// Errors from dispatcher operations.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The admission gate call itself failed. Never retried here.
    #[error("admission gate error: {0}")]
    AdmissionGate(String),

    #[error("no credentials available")]
    NoCredentialsAvailable,

    /// Every candidate failed. Displays only the last error's message;
    /// `history` holds every attempt in order.
    #[error("{last}")]
    Exhausted {
        last: AttemptError,
        history: Vec<AttemptRecord>,
    },

    /// Direct invocation exceeded its deadline.
    #[error("request timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },

    /// Direct invocation failed before its deadline.
    #[error("{0}")]
    Attempt(AttemptError),
}

impl DispatchError {
    /// Stable label for metrics and error responses.
    pub fn kind(&self) -> &'static str {
        match self {
            DispatchError::AdmissionGate(_) => "admission_gate_error",
            DispatchError::NoCredentialsAvailable => "no_credentials_available",
            DispatchError::Exhausted { last, .. } | DispatchError::Attempt(last) => match last {
                AttemptError::Transport(_) => "attempt_transport_error",
                AttemptError::Api { .. } => "attempt_api_error",
            },
            DispatchError::Timeout { .. } => "timeout",
        }
    }
}

/// Result alias for dispatcher operations.
pub type Result<T> = std::result::Result<T, DispatchError>;
