use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{DeadLetterMessage, DeadLetterRepository, DeadLetterStatus, NewDeadLetter, Result};

#[derive(Debug, Default)]
struct InMemoryDeadLetterState {
    messages: BTreeMap<i64, DeadLetterMessage>,
    next_id: i64,
}

/// In-memory dead-letter repository for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryDeadLetterRepository {
    state: Arc<RwLock<InMemoryDeadLetterState>>,
}

impl InMemoryDeadLetterRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.state.read().unwrap_or_else(PoisonError::into_inner).messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn transition(
        &self,
        id: i64,
        to: DeadLetterStatus,
        at: Option<DateTime<Utc>>,
        note: &str,
    ) -> bool {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        match state.messages.get_mut(&id) {
            Some(message) if message.status == DeadLetterStatus::Pending => {
                message.status = to;
                message.reprocessed_at = at;
                message.note = Some(note.to_string());
                true
            }
            _ => false,
        }
    }
}

#[async_trait]
impl DeadLetterRepository for InMemoryDeadLetterRepository {
    async fn insert(&self, message: NewDeadLetter) -> Result<DeadLetterMessage> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.next_id += 1;

        let stored = DeadLetterMessage {
            id: state.next_id,
            topic: message.topic,
            partition: message.partition,
            offset: message.offset,
            key: message.key,
            payload: message.payload,
            error_message: message.error_message,
            stack_trace: message.stack_trace,
            failed_at: Utc::now(),
            retry_count: message.retry_count,
            status: DeadLetterStatus::Pending,
            reprocessed_at: None,
            note: None,
        };
        state.messages.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn find(&self, id: i64) -> Result<Option<DeadLetterMessage>> {
        Ok(self.state.read().unwrap_or_else(PoisonError::into_inner).messages.get(&id).cloned())
    }

    async fn list(&self, status: Option<DeadLetterStatus>) -> Result<Vec<DeadLetterMessage>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        // Ids grow with insertion time, so reverse id order is newest first.
        Ok(state
            .messages
            .values()
            .rev()
            .filter(|message| status.is_none_or(|s| message.status == s))
            .cloned()
            .collect())
    }

    async fn count_by_status(&self, status: DeadLetterStatus) -> Result<u64> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        Ok(state
            .messages
            .values()
            .filter(|message| message.status == status)
            .count() as u64)
    }

    async fn pending_by_topic(&self) -> Result<Vec<(String, u64)>> {
        let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
        let mut counts: BTreeMap<String, u64> = BTreeMap::new();
        for message in state.messages.values() {
            if message.status == DeadLetterStatus::Pending {
                *counts.entry(message.topic.clone()).or_default() += 1;
            }
        }
        Ok(counts.into_iter().collect())
    }

    async fn mark_reprocessed(&self, id: i64, at: DateTime<Utc>, note: &str) -> Result<bool> {
        Ok(self.transition(id, DeadLetterStatus::Reprocessed, Some(at), note))
    }

    async fn mark_ignored(&self, id: i64, note: &str) -> Result<bool> {
        Ok(self.transition(id, DeadLetterStatus::Ignored, None, note))
    }
}
