//! After-commit publisher.
//!
//! ```text
//!                       hash(key) % workers
//! publish_after_commit ───────────────────► worker N ──► broker.send (retry)
//!                                              │
//!                                              └── budget exhausted ──► DeadLetterService::record
//! ```
//!
//! Each worker handles its queue one event at a time, so events that share a
//! key are published in the order they were committed. Unrelated keys land on
//! other workers and proceed in parallel.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::{
    CommittedEvents, DeadLetterRepository, DeadLetterService, MessageBroker, NewDeadLetter,
    OutboxConfig, OutboxEvent, RetryPolicy,
};

enum Command {
    Publish(OutboxEvent),
    Flush(oneshot::Sender<()>),
}

/// Handle to the delivery workers. Cheap to clone.
///
/// Workers stop once every handle has been dropped and their queues drain.
#[derive(Clone)]
pub struct OutboxPublisher {
    shards: Arc<[mpsc::UnboundedSender<Command>]>,
}

impl OutboxPublisher {
    /// Spawns the delivery workers on the current Tokio runtime.
    ///
    /// Delivery goes through the broker owned by `dead_letters`, so manual
    /// reprocessing and the automated path share one client.
    pub fn spawn<R, B>(dead_letters: Arc<DeadLetterService<R, B>>, config: OutboxConfig) -> Self
    where
        R: DeadLetterRepository + 'static,
        B: MessageBroker + 'static,
    {
        let shards: Vec<_> = (0..config.workers.max(1))
            .map(|worker| {
                let (sender, receiver) = mpsc::unbounded_channel();
                let worker = Worker {
                    worker,
                    receiver,
                    dead_letters: Arc::clone(&dead_letters),
                    retry: config.retry,
                };
                tokio::spawn(worker.run());
                sender
            })
            .collect();

        Self {
            shards: shards.into(),
        }
    }

    /// Queues committed events for delivery and returns immediately.
    pub fn publish_after_commit(&self, events: CommittedEvents) {
        for event in events {
            let shard = &self.shards[self.shard_for(&event.key)];
            if let Err(mpsc::error::SendError(Command::Publish(event))) =
                shard.send(Command::Publish(event))
            {
                metrics::counter!("outbox_publish_failed_total", "topic" => event.topic.as_str())
                    .increment(1);
                tracing::error!(
                    topic = %event.topic,
                    key = %event.key,
                    "outbox worker stopped; event dropped"
                );
            }
        }
    }

    /// Waits until every event queued before this call has been handled,
    /// either published or recorded as a dead letter.
    pub async fn flush(&self) {
        let mut pending = Vec::with_capacity(self.shards.len());
        for shard in self.shards.iter() {
            let (done, wait) = oneshot::channel();
            if shard.send(Command::Flush(done)).is_ok() {
                pending.push(wait);
            }
        }
        for wait in pending {
            let _ = wait.await;
        }
    }

    pub fn worker_count(&self) -> usize {
        self.shards.len()
    }

    fn shard_for(&self, key: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }
}

struct Worker<R, B> {
    worker: usize,
    receiver: mpsc::UnboundedReceiver<Command>,
    dead_letters: Arc<DeadLetterService<R, B>>,
    retry: RetryPolicy,
}

impl<R, B> Worker<R, B>
where
    R: DeadLetterRepository,
    B: MessageBroker,
{
    async fn run(mut self) {
        tracing::debug!(worker = self.worker, "outbox worker started");
        while let Some(command) = self.receiver.recv().await {
            match command {
                Command::Publish(event) => self.deliver(event).await,
                Command::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        tracing::debug!(worker = self.worker, "outbox worker stopped");
    }

    async fn deliver(&self, event: OutboxEvent) {
        let topic = event.topic.as_str();
        let broker = self.dead_letters.broker();

        let mut attempt = 0;
        let last_error = loop {
            attempt += 1;
            match broker.send(topic, &event.key, &event.payload).await {
                Ok(delivery) => {
                    metrics::counter!("outbox_published_total", "topic" => topic).increment(1);
                    tracing::debug!(
                        topic,
                        key = %event.key,
                        partition = delivery.partition,
                        offset = delivery.offset,
                        "event published"
                    );
                    return;
                }
                Err(err) if attempt < self.retry.max_attempts => {
                    tracing::warn!(topic, attempt, error = %err, "publish failed, retrying");
                    tokio::time::sleep(self.retry.backoff(attempt)).await;
                }
                Err(err) => break err,
            }
        };

        metrics::counter!("outbox_publish_failed_total", "topic" => topic).increment(1);
        let letter = NewDeadLetter {
            topic: topic.to_string(),
            partition: None,
            offset: None,
            key: Some(event.key.clone()),
            payload: event.payload,
            error_message: last_error.to_string(),
            stack_trace: Some(format!("{last_error:?}")),
            retry_count: attempt as i32,
        };
        if let Err(err) = self.dead_letters.record(letter).await {
            tracing::error!(topic, key = %event.key, error = %err, "failed to record dead letter; event lost");
        }
    }
}
