//! Mutual exclusion for critical sections that must hold across processes.
//!
//! This crate provides:
//! - [`LockBackend`] with a remote variant ([`RedisLockBackend`]) and a
//!   relational row-lock variant ([`PostgresRowLockBackend`])
//! - [`CircuitBreaker`] tracking the health of the remote path
//! - [`LockCoordinator`], the single entry point business code uses to run a
//!   closure while holding a named lock
//!
//! When the remote service is unhealthy the coordinator degrades to the row
//! lock instead of failing the caller.

pub mod backend;
pub mod breaker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod redis_lock;
pub mod token;

pub use backend::{Lease, LockBackend, LockStrategy};
pub use breaker::{Admission, CircuitBreaker, CircuitBreakerSnapshot, CircuitState, RemotePermit};
pub use config::{CircuitBreakerConfig, CoordinationConfig};
pub use coordinator::LockCoordinator;
pub use error::{BackendError, LockError, Result};
pub use memory::{InMemoryLockBackend, InMemoryRowLockBackend};
pub use postgres::PostgresRowLockBackend;
pub use redis_lock::RedisLockBackend;
pub use token::LockToken;
