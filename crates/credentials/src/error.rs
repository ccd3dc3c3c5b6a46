//! Error types for credential operations

/// Errors from credential sources and the store.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("HTTP request failed: {0}")]
    Http(String),

    #[error("credential source returned {status}: {body}")]
    SourceStatus { status: u16, body: String },

    #[error("credential pool parse error: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

/// Result alias for credential operations.
pub type Result<T> = std::result::Result<T, Error>;
