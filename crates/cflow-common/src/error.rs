//! Error types for ContentFlow

use thiserror::Error;

/// Result type alias for ContentFlow operations
pub type Result<T> = std::result::Result<T, FlowError>;

/// Main error type for ContentFlow
///
/// The variants map the failure classes the pipeline distinguishes:
/// configuration problems are fatal at init and never retried, not-found and
/// not-supported are reported to the caller, transient IO is retried by the
/// source that hit it, and persistence conflicts are folded into the
/// already-exists path by the store.
#[derive(Error, Debug)]
pub enum FlowError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not supported: {0}")]
    NotSupported(String),

    #[error("Transient IO error: {0}")]
    TransientIo(String),

    #[error("Persistence conflict: {0}")]
    Conflict(String),

    #[error("Invalid lifecycle transition: {0}")]
    Lifecycle(String),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Transform failed: {0}")]
    Transform(String),
}

impl FlowError {
    /// Whether the error indicates a missing item or binding
    pub fn is_not_found(&self) -> bool {
        matches!(self, FlowError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_carries_context() {
        let err = FlowError::Configuration("missing 'path'".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing 'path'");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: FlowError = io.into();
        assert!(matches!(err, FlowError::Io(_)));
    }

    #[test]
    fn test_is_not_found() {
        assert!(FlowError::NotFound("binding 7".into()).is_not_found());
        assert!(!FlowError::Conflict("dup".into()).is_not_found());
    }
}
