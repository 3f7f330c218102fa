//! Error types for session storage backends

/// Errors from key-value backend operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(String),

    #[error("storage parse error: {0}")]
    Parse(String),

    #[error("backend unavailable: {0}")]
    Unavailable(String),
}

/// Result alias for storage operations.
pub type Result<T> = std::result::Result<T, Error>;
