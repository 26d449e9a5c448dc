//! Reliable event publication.
//!
//! Events staged during a unit of work are handed to the
//! [`OutboxPublisher`] only once that work has committed. Delivery retries
//! per [`RetryPolicy`]; when the budget runs out the message is recorded in
//! the dead-letter store, where an operator can reprocess or ignore it.

pub mod broker;
pub mod config;
pub mod dead_letter;
pub mod error;
pub mod event;
pub mod kafka;
pub mod publisher;
pub mod staging;

pub use broker::{BrokerRecord, Delivery, InMemoryBroker, MessageBroker};
pub use config::{OutboxConfig, RetryPolicy};
pub use dead_letter::{
    DeadLetterMessage, DeadLetterRepository, DeadLetterService, DeadLetterStatus,
    InMemoryDeadLetterRepository, NewDeadLetter, PostgresDeadLetterRepository, ReprocessResult,
};
pub use error::{BrokerError, DeadLetterError, Result};
pub use event::{
    CouponIssued, DomainEvent, OrderCreated, OrderLine, OutboxEvent, PaymentCompleted, Topic,
    UnknownTopic,
};
pub use kafka::KafkaBroker;
pub use publisher::OutboxPublisher;
pub use staging::{CommittedEvents, StagedEvents};
