//! Persistent record of deliveries that exhausted their retries.

pub mod memory;
pub mod model;
pub mod postgres;
pub mod repository;
pub mod service;

pub use memory::InMemoryDeadLetterRepository;
pub use model::{DeadLetterMessage, DeadLetterStatus, NewDeadLetter, ReprocessResult};
pub use postgres::PostgresDeadLetterRepository;
pub use repository::DeadLetterRepository;
pub use service::DeadLetterService;
