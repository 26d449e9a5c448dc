//! Kafka-protocol broker client.

use std::time::Duration;

use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;

use crate::{BrokerError, Delivery, MessageBroker};

/// Lowest `message.timeout.ms` accepted. librdkafka reads 0 as no limit and
/// requires the value to exceed `linger.ms`.
const MIN_SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Sends records through an rdkafka [`FutureProducer`].
///
/// Each send waits for the leader's acknowledgement. The producer's own
/// retries are bounded by `send_timeout`; the outbox retry policy sits on top.
#[derive(Clone)]
pub struct KafkaBroker {
    producer: FutureProducer,
    send_timeout: Duration,
}

impl std::fmt::Debug for KafkaBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KafkaBroker")
            .field("send_timeout", &self.send_timeout)
            .finish_non_exhaustive()
    }
}

impl KafkaBroker {
    /// Creates a producer for the comma-separated `brokers` list.
    ///
    /// Connecting is lazy; an unreachable cluster shows up as failed sends.
    ///
    /// # Errors
    ///
    /// Returns `BrokerError::Unavailable` if the client configuration is rejected.
    pub fn new(brokers: &str, send_timeout: Duration) -> Result<Self, BrokerError> {
        let send_timeout = send_timeout.max(MIN_SEND_TIMEOUT);
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", send_timeout.as_millis().to_string())
            .set("acks", "1")
            .create()
            .map_err(|e| BrokerError::Unavailable(format!("failed to create producer: {e}")))?;

        tracing::info!(%brokers, ?send_timeout, "kafka producer created");
        Ok(Self {
            producer,
            send_timeout,
        })
    }

    pub fn send_timeout(&self) -> Duration {
        self.send_timeout
    }
}

#[async_trait]
impl MessageBroker for KafkaBroker {
    async fn send(&self, topic: &str, key: &str, payload: &str) -> Result<Delivery, BrokerError> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        match self
            .producer
            .send(record, Timeout::After(self.send_timeout))
            .await
        {
            Ok((partition, offset)) => {
                tracing::debug!(%topic, %key, partition, offset, "record acknowledged");
                Ok(Delivery { partition, offset })
            }
            Err((err, _)) => {
                tracing::debug!(%topic, %key, error = %err, "record not acknowledged");
                Err(classify(topic, self.send_timeout, &err))
            }
        }
    }
}

/// Maps a producer error onto the outbox's failure kinds.
fn classify(topic: &str, send_timeout: Duration, err: &KafkaError) -> BrokerError {
    match err.rdkafka_error_code() {
        Some(RDKafkaErrorCode::MessageTimedOut | RDKafkaErrorCode::RequestTimedOut) => {
            BrokerError::Timeout(send_timeout)
        }
        Some(
            RDKafkaErrorCode::MessageSizeTooLarge
            | RDKafkaErrorCode::InvalidMessageSize
            | RDKafkaErrorCode::InvalidMessage
            | RDKafkaErrorCode::UnknownTopic
            | RDKafkaErrorCode::UnknownTopicOrPartition
            | RDKafkaErrorCode::TopicAuthorizationFailed
            | RDKafkaErrorCode::InvalidTopic,
        ) => BrokerError::Rejected {
            topic: topic.to_string(),
            reason: err.to_string(),
        },
        _ => BrokerError::Unavailable(err.to_string()),
    }
}
