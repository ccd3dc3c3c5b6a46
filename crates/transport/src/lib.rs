//! Attempt transport for media generation backends
//!
//! Defines the `Transport` trait that decouples the dispatcher's rotation logic
//! from the wire. One call to `send` is one attempt with one bearer credential;
//! the transport never retries and never picks credentials itself.
//! `HttpTransport` is the production implementation over reqwest.

pub mod classify;
pub mod http;

pub use classify::{classify_429, classify_status};
pub use http::{CALLER_ID_HEADER, HttpTransport};

use serde::Serialize;
use std::future::Future;
use std::pin::Pin;

/// Classification of a failed attempt, used for logging, metrics, and
/// telemetry. It never changes the rotation order: every failed attempt moves
/// on to the next candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClassification {
    /// Timeouts, 5xx, generic rate limits
    Transient,
    /// Credit or usage quota of this credential is used up
    QuotaExceeded,
    /// Credential rejected outright (401/403)
    Rejected,
}

impl ErrorClassification {
    /// Label for metrics and logs.
    pub fn label(&self) -> &'static str {
        match self {
            ErrorClassification::Transient => "transient",
            ErrorClassification::QuotaExceeded => "quota_exceeded",
            ErrorClassification::Rejected => "rejected",
        }
    }
}

/// Failure of a single attempt against a backend.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AttemptError {
    /// The request never produced a status line (connect, TLS, body read).
    #[error("{0}")]
    Transport(String),

    /// The backend answered, but not with a usable success.
    #[error("{message}")]
    Api {
        status: u16,
        message: String,
        classification: ErrorClassification,
    },
}

impl AttemptError {
    /// Stable label for metrics (`transport` or `api`).
    pub fn kind(&self) -> &'static str {
        match self {
            AttemptError::Transport(_) => "transport",
            AttemptError::Api { .. } => "api",
        }
    }

    /// Classification of this failure. Transport failures are always transient.
    pub fn classification(&self) -> ErrorClassification {
        match self {
            AttemptError::Transport(_) => ErrorClassification::Transient,
            AttemptError::Api { classification, .. } => *classification,
        }
    }

    /// HTTP status, when the backend answered.
    pub fn status(&self) -> Option<u16> {
        match self {
            AttemptError::Transport(_) => None,
            AttemptError::Api { status, .. } => Some(*status),
        }
    }
}

/// Result alias for a single attempt.
pub type Result<T> = std::result::Result<T, AttemptError>;

/// Delivers one payload to one destination with one bearer credential.
///
/// Uses `Pin<Box<dyn Future>>` return types for dyn-compatibility (`Arc<dyn Transport>`).
pub trait Transport: Send + Sync {
    /// Identifier for logging (e.g. "http").
    fn id(&self) -> &str;

    /// POST `payload` to `destination` authorised by `bearer`.
    ///
    /// Returns the parsed JSON body on structural success (2xx with a JSON
    /// body). Everything else is an `AttemptError`.
    fn send<'a>(
        &'a self,
        destination: &'a str,
        payload: &'a serde_json::Value,
        bearer: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send + 'a>>;
}
