//! Error types for lasdb.

use thiserror::Error;

/// Result type alias using LasError.
pub type Result<T> = std::result::Result<T, LasError>;

/// Errors that can occur in lasdb operations.
#[derive(Debug, Error)]
pub enum LasError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Storage errors
    #[error("File not registered: {0}")]
    FileNotRegistered(String),

    #[error("File already registered: {0}")]
    FileAlreadyRegistered(String),

    #[error("Buffer pool exhausted, no unpinned frame to evict")]
    BufferPoolExhausted,

    #[error("Page not resident: {0}")]
    PageNotResident(String),

    // Tree errors
    #[error("Tuple does not match index schema: {0}")]
    SchemaMismatch(String),

    #[error("Key field is not usable as an index key: {0}")]
    KeyTypeMismatch(String),

    #[error("Tree corrupted: {0}")]
    TreeCorrupted(String),

    #[error("Tree not initialized")]
    NotInitialized,

    #[error("Tree already initialized")]
    AlreadyInitialized,

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: LasError = io_err.into();
        assert!(matches!(err, LasError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_file_not_registered_display() {
        let err = LasError::FileNotRegistered("orders.idx".to_string());
        assert_eq!(err.to_string(), "File not registered: orders.idx");
    }

    #[test]
    fn test_buffer_pool_exhausted_display() {
        let err = LasError::BufferPoolExhausted;
        assert_eq!(
            err.to_string(),
            "Buffer pool exhausted, no unpinned frame to evict"
        );
    }

    #[test]
    fn test_schema_mismatch_display() {
        let err = LasError::SchemaMismatch("expected 2 fields, got 3".to_string());
        assert_eq!(
            err.to_string(),
            "Tuple does not match index schema: expected 2 fields, got 3"
        );
    }

    #[test]
    fn test_init_errors_display() {
        assert_eq!(LasError::NotInitialized.to_string(), "Tree not initialized");
        assert_eq!(
            LasError::AlreadyInitialized.to_string(),
            "Tree already initialized"
        );
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_ok() -> Result<i32> {
            Ok(42)
        }

        fn returns_err() -> Result<i32> {
            Err(LasError::Internal("test".to_string()))
        }

        assert!(returns_ok().is_ok());
        assert!(returns_err().is_err());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LasError>();
    }
}
