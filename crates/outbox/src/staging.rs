//! After-commit handoff.
//!
//! A unit of work stages events as it runs and hands them over as
//! [`CommittedEvents`], the only thing [`OutboxPublisher`](crate::OutboxPublisher)
//! accepts. Dropping the staged events on rollback publishes nothing.
//!
//! SQL stores use [`StagedEvents::commit`], which produces the committed set
//! only when the transaction commit succeeds. Stores without a transaction
//! call [`StagedEvents::into_committed`] once their write is visible; the type
//! marks the handoff point, it does not prove the write happened.

use sqlx::{Postgres, Transaction};

use crate::{DomainEvent, OutboxEvent};

/// Events produced inside an open transaction.
#[derive(Debug, Default)]
#[must_use = "staged events are lost unless committed"]
pub struct StagedEvents {
    events: Vec<OutboxEvent>,
}

impl StagedEvents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Serializes and stages `event` in registration order.
    pub fn stage<E: DomainEvent>(&mut self, event: &E) -> Result<(), serde_json::Error> {
        self.events.push(OutboxEvent::from_event(event)?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Commits `tx` and releases the events only if the commit succeeded.
    ///
    /// # Errors
    ///
    /// Returns the commit error; the events are dropped with it.
    pub async fn commit(self, tx: Transaction<'_, Postgres>) -> Result<CommittedEvents, sqlx::Error> {
        tx.commit().await?;
        Ok(self.into_committed())
    }

    /// Releases the events for publication without a transaction.
    ///
    /// For stores with no transaction to commit. Call only once the write
    /// that produced the events is visible to readers.
    pub fn into_committed(self) -> CommittedEvents {
        CommittedEvents {
            events: self.events,
        }
    }
}

/// Events whose producing transaction has committed.
#[derive(Debug, Default)]
pub struct CommittedEvents {
    events: Vec<OutboxEvent>,
}

impl CommittedEvents {
    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, OutboxEvent> {
        self.events.iter()
    }
}

impl IntoIterator for CommittedEvents {
    type Item = OutboxEvent;
    type IntoIter = std::vec::IntoIter<OutboxEvent>;

    fn into_iter(self) -> Self::IntoIter {
        self.events.into_iter()
    }
}
