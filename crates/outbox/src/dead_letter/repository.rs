use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{DeadLetterMessage, DeadLetterStatus, NewDeadLetter, Result};

/// Storage for dead-letter messages.
///
/// The status updates are conditional: they only apply to a `PENDING` row
/// and report whether they did, so two operators acting on the same message
/// cannot both win.
#[async_trait]
pub trait DeadLetterRepository: Send + Sync {
    /// Persists a new `PENDING` message and returns it with its assigned ID.
    async fn insert(&self, message: NewDeadLetter) -> Result<DeadLetterMessage>;

    async fn find(&self, id: i64) -> Result<Option<DeadLetterMessage>>;

    /// Lists messages, newest failure first, optionally filtered by status.
    async fn list(&self, status: Option<DeadLetterStatus>) -> Result<Vec<DeadLetterMessage>>;

    async fn count_by_status(&self, status: DeadLetterStatus) -> Result<u64>;

    /// Pending message count per topic.
    async fn pending_by_topic(&self) -> Result<Vec<(String, u64)>>;

    /// Moves a `PENDING` message to `REPROCESSED`. Returns false if it was not pending.
    async fn mark_reprocessed(&self, id: i64, at: DateTime<Utc>, note: &str) -> Result<bool>;

    /// Moves a `PENDING` message to `IGNORED`. Returns false if it was not pending.
    async fn mark_ignored(&self, id: i64, note: &str) -> Result<bool>;
}
