//! Error types for recipebox
//!
//! Centralized error handling using thiserror. Every backend failure is
//! converted into a `StoreError` at the backend boundary; nothing unwinds
//! past the storage engine.

use thiserror::Error;

use crate::imaging::NormalizeError;

/// All error types that can occur in the storage engine
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend could not be opened or is unsupported in this environment
    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    /// Operation targeted an id that does not exist
    #[error("Recipe not found: {0}")]
    NotFound(String),

    /// Write would push the flat store past its size ceiling
    #[error("Quota exceeded: {needed_kb:.2}KB needed, {limit_kb:.2}KB allowed")]
    QuotaExceeded { needed_kb: f64, limit_kb: f64 },

    /// Capability missing on the active backend
    #[error("Unsupported on {backend} backend: {operation}")]
    Unsupported {
        backend: &'static str,
        operation: &'static str,
    },

    /// Malformed import document or bad argument
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Generic storage/persistence error (lock poisoning, missing collection)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Background task failed to complete
    #[error("Task error: {0}")]
    Task(String),

    /// Image decode or re-encode failure
    #[error("Image error: {0}")]
    Image(#[from] NormalizeError),

    /// SQLite error
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Returns true if the error only means "no such record"
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    /// Returns true if the error means the backend itself could not be reached
    pub fn is_unavailable(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

impl From<tokio::task::JoinError> for StoreError {
    fn from(err: tokio::task::JoinError) -> Self {
        StoreError::Task(err.to_string())
    }
}

/// Result type alias for storage operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Collapse a storage result into its neutral value (`None`, `false`, empty list, zeroed stats).
///
/// For callers that only want the "empty means failed" contract. The error is logged
/// before it is dropped.
pub trait OrNeutral<T> {
    fn or_neutral(self) -> T;
}

impl<T: Default> OrNeutral<T> for Result<T> {
    fn or_neutral(self) -> T {
        match self {
            Ok(value) => value,
            Err(e) => {
                log::error!("Storage call failed, returning neutral value: {}", e);
                T::default()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_error() {
        let err = StoreError::NotFound("abc".to_string());
        assert_eq!(err.to_string(), "Recipe not found: abc");
        assert!(err.is_not_found());
        assert!(!err.is_unavailable());
    }

    #[test]
    fn test_unavailable_error() {
        let err = StoreError::Unavailable("cannot open db".to_string());
        assert_eq!(err.to_string(), "Backend unavailable: cannot open db");
        assert!(err.is_unavailable());
    }

    #[test]
    fn test_quota_error_message() {
        let err = StoreError::QuotaExceeded {
            needed_kb: 6000.0,
            limit_kb: 5120.0,
        };
        assert_eq!(err.to_string(), "Quota exceeded: 6000.00KB needed, 5120.00KB allowed");
    }

    #[test]
    fn test_unsupported_error_message() {
        let err = StoreError::Unsupported {
            backend: "flat",
            operation: "save_image",
        };
        assert_eq!(err.to_string(), "Unsupported on flat backend: save_image");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: StoreError = io_err.into();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let err: StoreError = json_err.into();
        assert!(matches!(err, StoreError::Json(_)));
    }

    #[test]
    fn test_or_neutral_passes_value_through() {
        let ok: Result<Vec<u32>> = Ok(vec![1, 2]);
        assert_eq!(ok.or_neutral(), vec![1, 2]);
    }

    #[test]
    fn test_or_neutral_collapses_errors() {
        let list: Result<Vec<u32>> = Err(StoreError::Storage("boom".to_string()));
        assert!(list.or_neutral().is_empty());

        let flag: Result<bool> = Err(StoreError::NotFound("x".to_string()));
        assert!(!flag.or_neutral());

        let maybe: Result<Option<String>> = Err(StoreError::Task("join".to_string()));
        assert_eq!(maybe.or_neutral(), None);
    }
}
