//! Error types for tessera-core

use tessera_backends::BackendError;

/// Result type for tessera-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in tessera-core
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Requested length or capacity exceeds what the memory space can hold
    #[error("length {requested} exceeds maximum of {max} elements")]
    Length { requested: usize, max: usize },

    /// Backend failure, passed through unchanged
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// Element index past the end of a buffer
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: usize, len: usize },

    /// Host allocation failed
    #[error("out of memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    /// Malformed configuration value
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid operation
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

impl Error {
    /// Whether this is a [`Error::Length`] error
    pub fn is_length_error(&self) -> bool {
        matches!(self, Error::Length { .. })
    }

    /// The backend error this wraps, if any
    pub fn as_backend_error(&self) -> Option<&BackendError> {
        match self {
            Error::Backend(err) => Some(err),
            _ => None,
        }
    }
}
