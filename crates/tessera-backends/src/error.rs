//! Error types for backend operations

/// Result type for backend operations
pub type Result<T> = std::result::Result<T, BackendError>;

/// Errors raised by an execution backend.
///
/// Callers above the backend propagate these unmodified.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// Invalid buffer handle
    #[error("invalid buffer handle: {0}")]
    InvalidBufferHandle(u64),

    /// Buffer access out of bounds
    #[error("buffer access out of bounds: offset {offset} + size {size} > buffer size {buffer_size}")]
    BufferOutOfBounds {
        offset: usize,
        size: usize,
        buffer_size: usize,
    },

    /// The device could not satisfy an allocation
    #[error("device out of memory: requested {requested} bytes")]
    OutOfMemory { requested: usize },

    /// Allocation larger than the device allows
    #[error("allocation of {requested} bytes exceeds device limit of {limit} bytes")]
    AllocationTooLarge { requested: usize, limit: usize },

    /// Device lost or never became available
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Backend construction failed
    #[error("backend initialization failed: {0}")]
    Initialization(String),

    /// Kernel or command failure
    #[error("execution error: {0}")]
    ExecutionError(String),

    /// Unsupported operation
    #[error("unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// Invalid launch configuration
    #[error("invalid launch configuration: {0}")]
    InvalidLaunchConfig(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Create an execution error
    pub fn execution_error(msg: impl Into<String>) -> Self {
        Self::ExecutionError(msg.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::UnsupportedOperation(msg.into())
    }

    /// Create a device-unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::DeviceUnavailable(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = BackendError::BufferOutOfBounds {
            offset: 8,
            size: 16,
            buffer_size: 12,
        };
        assert_eq!(
            err.to_string(),
            "buffer access out of bounds: offset 8 + size 16 > buffer size 12"
        );

        let err = BackendError::AllocationTooLarge {
            requested: 2048,
            limit: 1024,
        };
        assert!(err.to_string().contains("exceeds device limit"));
    }

    #[test]
    fn test_constructors() {
        assert!(matches!(
            BackendError::execution_error("kernel fault"),
            BackendError::ExecutionError(msg) if msg == "kernel fault"
        ));
        assert!(matches!(BackendError::unsupported("d2d"), BackendError::UnsupportedOperation(_)));
        assert!(matches!(BackendError::unavailable("gone"), BackendError::DeviceUnavailable(_)));
    }
}
