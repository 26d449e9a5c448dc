use std::sync::Arc;

use chrono::Utc;

use crate::{
    DeadLetterError, DeadLetterMessage, DeadLetterRepository, DeadLetterStatus, MessageBroker,
    NewDeadLetter, ReprocessResult, Result, Topic,
};

/// Operator-facing dead-letter store.
///
/// Keeps the `dead_letter_pending{topic}` gauge in step with the rows it
/// moves out of `PENDING`. Reprocessing republishes through the same broker
/// the automated path uses, at least once.
pub struct DeadLetterService<R, B> {
    repository: R,
    broker: Arc<B>,
}

impl<R, B> DeadLetterService<R, B>
where
    R: DeadLetterRepository,
    B: MessageBroker,
{
    pub fn new(repository: R, broker: Arc<B>) -> Self {
        Self { repository, broker }
    }

    pub fn repository(&self) -> &R {
        &self.repository
    }

    pub fn broker(&self) -> &Arc<B> {
        &self.broker
    }

    /// Persists a message whose automated delivery was exhausted.
    #[tracing::instrument(skip(self, message), fields(topic = %message.topic))]
    pub async fn record(&self, message: NewDeadLetter) -> Result<DeadLetterMessage> {
        let stored = self.repository.insert(message).await?;

        metrics::counter!("dead_letter_recorded_total", "topic" => stored.topic.clone())
            .increment(1);
        metrics::gauge!("dead_letter_pending", "topic" => stored.topic.clone()).increment(1.0);
        tracing::error!(
            dead_letter_id = stored.id,
            retry_count = stored.retry_count,
            error = %stored.error_message,
            "message moved to dead-letter store"
        );

        Ok(stored)
    }

    /// Republishes a pending message with its original payload.
    ///
    /// A message that is already `REPROCESSED` or `IGNORED` is left untouched
    /// and reported with `success = false`. A failed publish also reports
    /// `success = false` and leaves the message `PENDING` for another try.
    ///
    /// # Errors
    ///
    /// Returns `DeadLetterError::NotFound` if no message has this ID.
    #[tracing::instrument(skip(self))]
    pub async fn reprocess(&self, id: i64) -> Result<ReprocessResult> {
        let message = self.get_by_id(id).await?;

        match message.status {
            DeadLetterStatus::Reprocessed => {
                return Ok(ReprocessResult::failed(id, "message was already reprocessed"));
            }
            DeadLetterStatus::Ignored => {
                return Ok(ReprocessResult::failed(id, "message was ignored"));
            }
            DeadLetterStatus::Pending => {}
        }

        let topic: Topic = match message.topic.parse() {
            Ok(topic) => topic,
            Err(err) => return Ok(self.reprocess_failed(&message, err.to_string())),
        };
        if let Err(err) = topic.validate_payload(&message.payload) {
            return Ok(self.reprocess_failed(
                &message,
                format!("payload is not a valid {topic} message: {err}"),
            ));
        }

        let key = message.key.as_deref().unwrap_or_default();
        let delivery = match self.broker.send(topic.as_str(), key, &message.payload).await {
            Ok(delivery) => delivery,
            Err(err) => return Ok(self.reprocess_failed(&message, err.to_string())),
        };

        let note = format!(
            "republished to partition {} at offset {}",
            delivery.partition, delivery.offset
        );
        if !self.repository.mark_reprocessed(id, Utc::now(), &note).await? {
            // Someone else settled the message while we were publishing.
            tracing::warn!(dead_letter_id = id, "message settled concurrently; payload was published again");
            return Ok(ReprocessResult::failed(
                id,
                "message was settled by another operator during reprocessing",
            ));
        }

        metrics::gauge!("dead_letter_pending", "topic" => message.topic.clone()).decrement(1.0);
        metrics::counter!(
            "dead_letter_reprocessed_total",
            "topic" => message.topic.clone(),
            "outcome" => "success"
        )
        .increment(1);
        tracing::info!(dead_letter_id = id, topic = %message.topic, "dead letter reprocessed");

        Ok(ReprocessResult::succeeded(id, note))
    }

    fn reprocess_failed(&self, message: &DeadLetterMessage, reason: String) -> ReprocessResult {
        metrics::counter!(
            "dead_letter_reprocessed_total",
            "topic" => message.topic.clone(),
            "outcome" => "failure"
        )
        .increment(1);
        tracing::warn!(dead_letter_id = message.id, topic = %message.topic, %reason, "reprocess failed");
        ReprocessResult::failed(message.id, reason)
    }

    /// Marks a pending message as deliberately not delivered.
    ///
    /// # Errors
    ///
    /// Returns `DeadLetterError::NotFound` for an unknown ID and
    /// `DeadLetterError::InvalidTransition` if the message is not `PENDING`.
    #[tracing::instrument(skip(self))]
    pub async fn ignore(&self, id: i64, note: &str) -> Result<DeadLetterMessage> {
        let message = self.get_by_id(id).await?;
        if message.status != DeadLetterStatus::Pending
            || !self.repository.mark_ignored(id, note).await?
        {
            let current = self.get_by_id(id).await?;
            return Err(DeadLetterError::InvalidTransition {
                id,
                status: current.status,
            });
        }

        metrics::gauge!("dead_letter_pending", "topic" => message.topic.clone()).decrement(1.0);
        tracing::info!(dead_letter_id = id, topic = %message.topic, note, "dead letter ignored");

        self.get_by_id(id).await
    }

    pub async fn list_all(&self) -> Result<Vec<DeadLetterMessage>> {
        self.repository.list(None).await
    }

    pub async fn list_by_status(&self, status: DeadLetterStatus) -> Result<Vec<DeadLetterMessage>> {
        self.repository.list(Some(status)).await
    }

    pub async fn get_by_id(&self, id: i64) -> Result<DeadLetterMessage> {
        self.repository
            .find(id)
            .await?
            .ok_or(DeadLetterError::NotFound(id))
    }

    pub async fn count_pending(&self) -> Result<u64> {
        self.repository
            .count_by_status(DeadLetterStatus::Pending)
            .await
    }

    /// Sets the pending gauges from storage. Called once at startup.
    pub async fn sync_pending_gauges(&self) -> Result<()> {
        let pending = self.repository.pending_by_topic().await?;
        for topic in Topic::ALL {
            if !pending.iter().any(|(name, _)| name == topic.as_str()) {
                metrics::gauge!("dead_letter_pending", "topic" => topic.as_str()).set(0.0);
            }
        }
        for (topic, count) in pending {
            metrics::gauge!("dead_letter_pending", "topic" => topic).set(count as f64);
        }
        Ok(())
    }
}
