//! Shared application state and the backend wiring behind it.

use std::sync::Arc;

use coordination::{
    CircuitBreaker, InMemoryLockBackend, InMemoryRowLockBackend, LockBackend, LockCoordinator,
    PostgresRowLockBackend, RedisLockBackend,
};
use domain::{CouponRepository, CouponService, InMemoryCouponRepository, PostgresCouponRepository};
use outbox::{
    DeadLetterRepository, DeadLetterService, InMemoryBroker, InMemoryDeadLetterRepository,
    KafkaBroker, MessageBroker, OutboxPublisher, PostgresDeadLetterRepository,
};

use crate::config::Config;

/// Picks the concrete storage, lock and broker implementations.
pub trait Backends: Send + Sync + 'static {
    type Coupons: CouponRepository + 'static;
    type Remote: LockBackend + 'static;
    type Fallback: LockBackend + 'static;
    type DeadLetters: DeadLetterRepository + 'static;
    type Broker: MessageBroker + 'static;
}

/// Everything in process memory. Used by tests and when no database is configured.
pub struct InMemoryBackends;

impl Backends for InMemoryBackends {
    type Coupons = InMemoryCouponRepository;
    type Remote = InMemoryLockBackend;
    type Fallback = InMemoryRowLockBackend;
    type DeadLetters = InMemoryDeadLetterRepository;
    type Broker = InMemoryBroker;
}

/// Redis for the remote lock, PostgreSQL for rows and the fallback lock,
/// Kafka for event delivery.
pub struct PostgresBackends;

impl Backends for PostgresBackends {
    type Coupons = PostgresCouponRepository;
    type Remote = RedisLockBackend;
    type Fallback = PostgresRowLockBackend;
    type DeadLetters = PostgresDeadLetterRepository;
    type Broker = KafkaBroker;
}

/// Shared application state accessible from all handlers.
pub struct AppState<B: Backends> {
    pub coupons: CouponService<B::Coupons, B::Remote, B::Fallback>,
    pub dead_letters: Arc<DeadLetterService<B::DeadLetters, B::Broker>>,
    pub publisher: OutboxPublisher,
}

impl<B: Backends> AppState<B> {
    /// Wires the services together and spawns the outbox workers.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(
        coupons: B::Coupons,
        remote: B::Remote,
        fallback: B::Fallback,
        dead_letters: B::DeadLetters,
        broker: B::Broker,
        config: &Config,
    ) -> Self {
        let dead_letters = Arc::new(DeadLetterService::new(dead_letters, Arc::new(broker)));
        let publisher = OutboxPublisher::spawn(Arc::clone(&dead_letters), config.outbox);
        let locks = Arc::new(LockCoordinator::new(remote, fallback, &config.coordination));
        let coupons = CouponService::new(coupons, locks, publisher.clone(), config.coupons);

        Self {
            coupons,
            dead_letters,
            publisher,
        }
    }

    /// Returns the breaker guarding the remote lock path.
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        self.coupons.locks().breaker()
    }
}

/// Creates application state backed entirely by in-memory doubles.
pub fn create_in_memory_state(config: &Config) -> Arc<AppState<InMemoryBackends>> {
    Arc::new(AppState::new(
        InMemoryCouponRepository::new(),
        InMemoryLockBackend::new(config.coordination.remote_acquire_timeout),
        InMemoryRowLockBackend::new(config.coordination.fallback_lock_timeout),
        InMemoryDeadLetterRepository::new(),
        InMemoryBroker::default(),
        config,
    ))
}
