use std::time::Duration;

use thiserror::Error;

use crate::LockStrategy;

/// Errors raised by a single lock backend.
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backing service could not be reached or did not answer in time.
    #[error("Lock service unavailable: {0}")]
    Unavailable(String),

    /// The service answered, but another holder kept the key for the whole
    /// acquisition window.
    #[error("Lock '{key}' still held by another owner after {waited:?}")]
    Contended { key: String, waited: Duration },

    /// A Redis command failed.
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl BackendError {
    /// Returns true when the failure says nothing about the key and everything
    /// about the health of the service behind it.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, BackendError::Unavailable(_) | BackendError::Redis(_))
    }
}

/// Errors surfaced by the lock coordinator to business code.
#[derive(Debug, Error)]
pub enum LockError {
    /// The lock could not be acquired on the path that was tried last.
    #[error("Failed to acquire lock '{key}' via {strategy}: {source}")]
    AcquisitionFailed {
        key: String,
        strategy: LockStrategy,
        #[source]
        source: BackendError,
    },

    /// The critical section outlived its lease and was abandoned.
    #[error("Lease on lock '{key}' expired after {ttl:?} before the critical section finished")]
    LeaseExpired { key: String, ttl: Duration },
}

/// Result type for lock backend operations.
pub type Result<T> = std::result::Result<T, BackendError>;
