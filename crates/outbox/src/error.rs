use std::time::Duration;

use thiserror::Error;

use crate::DeadLetterStatus;

/// Errors returned by a message broker client.
#[derive(Debug, Clone, Error)]
pub enum BrokerError {
    /// The broker could not be reached.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),

    /// The broker did not acknowledge within the allotted time.
    #[error("Broker did not acknowledge within {0:?}")]
    Timeout(Duration),

    /// The broker refused the record.
    #[error("Broker rejected record on {topic}: {reason}")]
    Rejected { topic: String, reason: String },
}

/// Errors from the dead-letter store.
#[derive(Debug, Error)]
pub enum DeadLetterError {
    #[error("Dead letter message not found: {0}")]
    NotFound(i64),

    /// The requested operator action does not apply to the message's status.
    #[error("Dead letter message {id} is {status}, expected PENDING")]
    InvalidTransition { id: i64, status: DeadLetterStatus },

    #[error("Unknown dead letter status: {0}")]
    UnknownStatus(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Result type for dead-letter store operations.
pub type Result<T> = std::result::Result<T, DeadLetterError>;
