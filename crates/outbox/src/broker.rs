//! Broker client seam and an in-memory implementation.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;

use crate::BrokerError;

/// Where the broker stored an acknowledged record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub partition: i32,
    pub offset: i64,
}

/// A client able to append records to a topic.
///
/// Implementations perform a single send. Retrying is the caller's job.
#[async_trait]
pub trait MessageBroker: Send + Sync {
    async fn send(&self, topic: &str, key: &str, payload: &str) -> Result<Delivery, BrokerError>;
}

/// A record accepted by [`InMemoryBroker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerRecord {
    pub topic: String,
    pub key: String,
    pub payload: String,
    pub delivery: Delivery,
}

#[derive(Debug, Default)]
struct InMemoryBrokerState {
    records: Vec<BrokerRecord>,
    offsets: Vec<i64>,
    fail_next: u32,
    failing: bool,
    send_attempts: usize,
}

/// In-memory broker for testing and local runs.
#[derive(Debug, Clone)]
pub struct InMemoryBroker {
    state: Arc<RwLock<InMemoryBrokerState>>,
    partitions: i32,
}

impl InMemoryBroker {
    pub fn new(partitions: i32) -> Self {
        let partitions = partitions.max(1);
        let state = InMemoryBrokerState {
            offsets: vec![0; partitions as usize],
            ..Default::default()
        };
        Self {
            state: Arc::new(RwLock::new(state)),
            partitions,
        }
    }

    /// Rejects the next `count` sends, then recovers.
    pub fn fail_next(&self, count: u32) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).fail_next = count;
    }

    /// Rejects every send until turned off.
    pub fn set_failing(&self, failing: bool) {
        self.state.write().unwrap_or_else(PoisonError::into_inner).failing = failing;
    }

    /// All accepted records in acceptance order.
    pub fn records(&self) -> Vec<BrokerRecord> {
        self.state.read().unwrap_or_else(PoisonError::into_inner).records.clone()
    }

    pub fn records_for(&self, topic: &str) -> Vec<BrokerRecord> {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .records
            .iter()
            .filter(|record| record.topic == topic)
            .cloned()
            .collect()
    }

    /// Number of sends attempted, accepted or not.
    pub fn send_attempts(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).send_attempts
    }

    fn partition_for(&self, key: &str) -> i32 {
        let mut hasher = DefaultHasher::new();
        key.hash(&mut hasher);
        (hasher.finish() % self.partitions as u64) as i32
    }
}

impl Default for InMemoryBroker {
    fn default() -> Self {
        Self::new(3)
    }
}

#[async_trait]
impl MessageBroker for InMemoryBroker {
    async fn send(&self, topic: &str, key: &str, payload: &str) -> Result<Delivery, BrokerError> {
        let partition = self.partition_for(key);
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.send_attempts += 1;

        if state.fail_next > 0 {
            state.fail_next -= 1;
            return Err(BrokerError::Unavailable(
                "simulated broker outage".to_string(),
            ));
        }
        if state.failing {
            return Err(BrokerError::Unavailable(
                "simulated broker outage".to_string(),
            ));
        }

        let offset = state.offsets[partition as usize];
        state.offsets[partition as usize] += 1;

        let delivery = Delivery { partition, offset };
        state.records.push(BrokerRecord {
            topic: topic.to_string(),
            key: key.to_string(),
            payload: payload.to_string(),
            delivery,
        });
        Ok(delivery)
    }
}
