//! Error types for pagestore
//!
//! This module defines the common error taxonomy used throughout the system.

use crate::types::{ObjectId, PageId, Version};
use thiserror::Error;

/// Common result type for pagestore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error type for pagestore
#[derive(Debug, Error)]
pub enum Error {
    // Caller errors
    #[error("invalid range: offset {offset}, size {size}")]
    InvalidRange { offset: u64, size: u64 },

    #[error("range out of bounds: offset {offset} + size {size} exceeds object size {limit}")]
    OutOfBounds { offset: u64, size: u64, limit: u64 },

    #[error("object not found: {0}")]
    ObjectNotFound(ObjectId),

    #[error("version {version} not found for object {object_id}")]
    VersionNotFound { object_id: ObjectId, version: Version },

    #[error("page not found: {0}")]
    PageNotFound(String),

    #[error("object already exists: {0}")]
    AlreadyExists(ObjectId),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    // Backend errors
    #[error("replication failure for {page}: stored {stored} of {required} replicas")]
    ReplicationFailure {
        page: PageId,
        stored: usize,
        required: usize,
    },

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),

    // Internal errors
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a new internal error
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Create an invalid argument error
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a backend unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::BackendUnavailable(msg.into())
    }

    /// Check if this is a retryable error
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::BackendUnavailable(_))
    }

    /// Check if this is a not found error
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ObjectNotFound(_) | Self::VersionNotFound { .. } | Self::PageNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(Error::unavailable("provider down").is_retryable());
        assert!(!Error::ObjectNotFound(ObjectId::new(1)).is_retryable());
        assert!(
            !Error::ReplicationFailure {
                page: PageId::new(ObjectId::new(1), 0, Version::new(1)),
                stored: 1,
                required: 2,
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_error_not_found() {
        assert!(Error::ObjectNotFound(ObjectId::new(1)).is_not_found());
        assert!(
            Error::VersionNotFound {
                object_id: ObjectId::new(1),
                version: Version::new(9),
            }
            .is_not_found()
        );
        assert!(!Error::AlreadyExists(ObjectId::new(1)).is_not_found());
    }

    #[test]
    fn test_error_display() {
        let err = Error::OutOfBounds {
            offset: 1024,
            size: 2048,
            limit: 2048,
        };
        assert_eq!(
            err.to_string(),
            "range out of bounds: offset 1024 + size 2048 exceeds object size 2048"
        );
    }
}
