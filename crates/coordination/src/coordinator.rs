//! Lock coordinator: the one entry point business code uses for mutual exclusion.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::{
    Admission, CircuitBreaker, CoordinationConfig, Lease, LockBackend, LockError, LockStrategy,
};

/// Runs closures while holding a named lock.
///
/// The remote backend is tried while the circuit breaker allows it. When the
/// remote service is unavailable (or the breaker is open) the call degrades to
/// the fallback backend instead of failing, so an infrastructure blip costs
/// latency rather than an error.
pub struct LockCoordinator<R, F>
where
    R: LockBackend,
    F: LockBackend,
{
    remote: R,
    fallback: F,
    breaker: Arc<CircuitBreaker>,
    default_ttl: Duration,
}

impl<R, F> LockCoordinator<R, F>
where
    R: LockBackend,
    F: LockBackend,
{
    /// Creates a coordinator with its own breaker.
    pub fn new(remote: R, fallback: F, config: &CoordinationConfig) -> Self {
        Self {
            remote,
            fallback,
            breaker: Arc::new(CircuitBreaker::new("remote-lock", config.breaker)),
            default_ttl: config.default_ttl,
        }
    }

    /// Returns the breaker guarding the remote path.
    pub fn breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    pub fn remote(&self) -> &R {
        &self.remote
    }

    pub fn fallback(&self) -> &F {
        &self.fallback
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Acquires `key`, runs `f` exactly once while holding it, and releases
    /// the lock on every exit path.
    ///
    /// Returns `f`'s result or propagates its error. `f` is bounded by `ttl`;
    /// if it runs longer the lock is released and `LockError::LeaseExpired`
    /// is returned.
    ///
    /// # Errors
    ///
    /// Returns `LockError::AcquisitionFailed` if the remote service answered
    /// but the key stayed held, or if the fallback could not take the lock.
    /// Remote infrastructure errors are never surfaced.
    #[tracing::instrument(skip(self, f))]
    pub async fn with_lock<T, E, Func, Fut>(&self, key: &str, ttl: Duration, f: Func) -> Result<T, E>
    where
        Func: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: From<LockError> + Send,
    {
        if let Admission::Attempt(permit) = self.breaker.admit() {
            let trial = permit.is_trial();
            match self.remote.try_acquire(key, ttl).await {
                Ok(lease) => {
                    permit.succeed();
                    return self
                        .run_locked(&self.remote, LockStrategy::Remote, lease, ttl, f)
                        .await;
                }
                Err(err) if err.is_unavailable() => {
                    permit.fail();
                    metrics::counter!("lock_failed_total", "strategy" => LockStrategy::Remote.as_str())
                        .increment(1);
                    metrics::counter!("lock_fallback_total").increment(1);
                    tracing::warn!(error = %err, trial, "remote lock unavailable, degrading to row lock");
                }
                Err(err) => {
                    // The service answered; only the key is busy.
                    permit.succeed();
                    metrics::counter!("lock_failed_total", "strategy" => LockStrategy::Remote.as_str())
                        .increment(1);
                    return Err(LockError::AcquisitionFailed {
                        key: key.to_string(),
                        strategy: LockStrategy::Remote,
                        source: err,
                    }
                    .into());
                }
            }
        }

        let lease = match self.fallback.try_acquire(key, ttl).await {
            Ok(lease) => lease,
            Err(err) => {
                metrics::counter!("lock_failed_total", "strategy" => LockStrategy::Fallback.as_str())
                    .increment(1);
                tracing::error!(error = %err, "fallback lock acquisition failed");
                return Err(LockError::AcquisitionFailed {
                    key: key.to_string(),
                    strategy: LockStrategy::Fallback,
                    source: err,
                }
                .into());
            }
        };
        self.run_locked(&self.fallback, LockStrategy::Fallback, lease, ttl, f)
            .await
    }

    /// [`with_lock`](Self::with_lock) using the configured default TTL.
    pub async fn with_default_lock<T, E, Func, Fut>(&self, key: &str, f: Func) -> Result<T, E>
    where
        Func: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: From<LockError> + Send,
    {
        self.with_lock(key, self.default_ttl, f).await
    }

    async fn run_locked<B, T, E, Func, Fut>(
        &self,
        backend: &B,
        strategy: LockStrategy,
        lease: B::Lease,
        ttl: Duration,
        f: Func,
    ) -> Result<T, E>
    where
        B: LockBackend,
        Func: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: From<LockError> + Send,
    {
        metrics::counter!("lock_acquired_total", "strategy" => strategy.as_str()).increment(1);
        let key = lease.token().key.clone();
        tracing::debug!(%key, %strategy, "lock acquired");

        let started = Instant::now();
        let outcome = tokio::time::timeout(ttl, f()).await;
        metrics::histogram!("lock_hold_seconds", "strategy" => strategy.as_str())
            .record(started.elapsed().as_secs_f64());

        if let Err(err) = backend.release(lease).await {
            // The lease still ends on its own: TTL expiry or transaction rollback.
            tracing::warn!(%key, %strategy, error = %err, "lock release failed");
        }

        match outcome {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(%key, %strategy, ?ttl, "critical section outlived its lease");
                Err(LockError::LeaseExpired { key, ttl }.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use futures_util::future::join_all;

    use super::*;
    use crate::{
        BackendError, CircuitBreakerConfig, CircuitState, InMemoryLockBackend,
        InMemoryRowLockBackend,
    };

    #[derive(Debug)]
    enum TestError {
        Lock(LockError),
        Boom,
    }

    impl From<LockError> for TestError {
        fn from(err: LockError) -> Self {
            TestError::Lock(err)
        }
    }

    type TestCoordinator = LockCoordinator<InMemoryLockBackend, InMemoryRowLockBackend>;

    const TTL: Duration = Duration::from_secs(5);

    fn coordinator(threshold: u32, cooldown: Duration) -> TestCoordinator {
        let config = CoordinationConfig {
            breaker: CircuitBreakerConfig::new(threshold, cooldown),
            ..CoordinationConfig::default()
        };
        LockCoordinator::new(
            InMemoryLockBackend::new(Duration::from_millis(200)),
            InMemoryRowLockBackend::new(Duration::from_millis(200)),
            &config,
        )
    }

    async fn ok_call(coordinator: &TestCoordinator, key: &str) -> Result<u32, TestError> {
        coordinator.with_lock(key, TTL, || async { Ok(7) }).await
    }

    #[tokio::test]
    async fn healthy_remote_path_skips_fallback() {
        let coordinator = coordinator(3, Duration::from_secs(30));

        let value = ok_call(&coordinator, "coupon:1").await.unwrap();

        assert_eq!(value, 7);
        assert_eq!(coordinator.remote().attempt_count(), 1);
        assert_eq!(coordinator.fallback().acquisition_count(), 0);
        assert!(!coordinator.remote().is_held("coupon:1"));
    }

    #[tokio::test]
    async fn runs_closure_exactly_once() {
        let coordinator = coordinator(3, Duration::from_secs(30));
        let calls = AtomicUsize::new(0);
        let counter = &calls;

        coordinator
            .with_lock("coupon:1", TTL, move || async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok::<_, TestError>(())
            })
            .await
            .unwrap();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remote_failure_degrades_to_fallback() {
        let coordinator = coordinator(3, Duration::from_secs(30));
        coordinator.remote().fail_next(1);

        let value = ok_call(&coordinator, "coupon:1").await.unwrap();

        assert_eq!(value, 7);
        assert_eq!(coordinator.fallback().acquisition_count(), 1);
        assert_eq!(coordinator.breaker().snapshot().consecutive_failures, 1);
        assert_eq!(coordinator.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn breaker_opens_after_threshold_and_stops_calling_remote() {
        let coordinator = coordinator(3, Duration::from_secs(30));
        coordinator.remote().set_unavailable(true);

        for call in 1..=5 {
            let value = ok_call(&coordinator, "coupon:1").await.unwrap();
            assert_eq!(value, 7);
            let expected_state = if call < 3 {
                CircuitState::Closed
            } else {
                CircuitState::Open
            };
            assert_eq!(coordinator.breaker().state(), expected_state);
        }

        assert_eq!(coordinator.remote().attempt_count(), 3);
        assert_eq!(coordinator.fallback().acquisition_count(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn half_open_admits_single_trial_under_concurrency() {
        let cooldown = Duration::from_secs(10);
        let coordinator = coordinator(3, cooldown);
        coordinator.remote().set_unavailable(true);
        for _ in 0..3 {
            ok_call(&coordinator, "coupon:1").await.unwrap();
        }
        assert_eq!(coordinator.breaker().state(), CircuitState::Open);

        tokio::time::advance(cooldown).await;
        coordinator.remote().set_unavailable(false);
        coordinator.remote().set_latency(Duration::from_millis(100));

        let keys: Vec<String> = (0..10).map(|i| format!("coupon:{i}")).collect();
        let results = join_all(keys.iter().map(|key| ok_call(&coordinator, key))).await;

        assert!(results.iter().all(Result::is_ok));
        assert_eq!(coordinator.remote().attempt_count(), 4);
        assert_eq!(coordinator.breaker().state(), CircuitState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_trial_reopens_and_restarts_cooldown() {
        let cooldown = Duration::from_secs(10);
        let coordinator = coordinator(1, cooldown);
        coordinator.remote().set_unavailable(true);
        ok_call(&coordinator, "coupon:1").await.unwrap();
        assert_eq!(coordinator.breaker().state(), CircuitState::Open);

        tokio::time::advance(cooldown).await;
        ok_call(&coordinator, "coupon:1").await.unwrap();
        assert_eq!(coordinator.remote().attempt_count(), 2);
        assert_eq!(coordinator.breaker().state(), CircuitState::Open);

        tokio::time::advance(cooldown / 2).await;
        ok_call(&coordinator, "coupon:1").await.unwrap();
        assert_eq!(coordinator.remote().attempt_count(), 2);
    }

    #[tokio::test]
    async fn fallback_releases_when_closure_fails() {
        let coordinator = coordinator(1, Duration::from_secs(30));
        coordinator.remote().set_unavailable(true);

        let result: Result<(), TestError> = coordinator
            .with_lock("coupon:1", TTL, || async { Err(TestError::Boom) })
            .await;
        assert!(matches!(result, Err(TestError::Boom)));

        let value = ok_call(&coordinator, "coupon:1").await.unwrap();
        assert_eq!(value, 7);
        assert_eq!(coordinator.fallback().acquisition_count(), 2);
    }

    #[tokio::test]
    async fn remote_releases_when_closure_fails() {
        let coordinator = coordinator(3, Duration::from_secs(30));

        let result: Result<(), TestError> = coordinator
            .with_lock("coupon:1", TTL, || async { Err(TestError::Boom) })
            .await;

        assert!(matches!(result, Err(TestError::Boom)));
        assert!(!coordinator.remote().is_held("coupon:1"));
    }

    #[tokio::test]
    async fn contended_remote_key_fails_without_fallback() {
        let coordinator = coordinator(1, Duration::from_secs(30));
        let held = coordinator
            .remote()
            .try_acquire("coupon:1", TTL)
            .await
            .unwrap();

        let result = ok_call(&coordinator, "coupon:1").await;

        assert!(matches!(
            result,
            Err(TestError::Lock(LockError::AcquisitionFailed {
                strategy: LockStrategy::Remote,
                source: BackendError::Contended { .. },
                ..
            }))
        ));
        assert_eq!(coordinator.fallback().acquisition_count(), 0);
        assert_eq!(coordinator.breaker().state(), CircuitState::Closed);
        coordinator.remote().release(held).await.unwrap();
    }

    #[tokio::test]
    async fn fallback_failure_surfaces_as_acquisition_failed() {
        let coordinator = coordinator(1, Duration::from_secs(30));
        coordinator.remote().set_unavailable(true);
        coordinator.fallback().set_failing(true);

        let result = ok_call(&coordinator, "coupon:1").await;

        assert!(matches!(
            result,
            Err(TestError::Lock(LockError::AcquisitionFailed {
                strategy: LockStrategy::Fallback,
                ..
            }))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn lease_expiry_abandons_closure_and_releases() {
        let coordinator = coordinator(3, Duration::from_secs(30));

        let result: Result<(), TestError> = coordinator
            .with_lock("coupon:1", Duration::from_secs(1), || async {
                tokio::time::sleep(Duration::from_secs(5)).await;
                Ok(())
            })
            .await;

        assert!(matches!(
            result,
            Err(TestError::Lock(LockError::LeaseExpired { .. }))
        ));
        assert!(!coordinator.remote().is_held("coupon:1"));
    }

    #[tokio::test]
    async fn serializes_concurrent_holders_of_one_key() {
        let coordinator = Arc::new(coordinator(3, Duration::from_secs(30)));
        let inside = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let coordinator = Arc::clone(&coordinator);
                let inside = Arc::clone(&inside);
                let max_seen = Arc::clone(&max_seen);
                tokio::spawn(async move {
                    coordinator
                        .with_lock("coupon:1", TTL, move || async move {
                            let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                            max_seen.fetch_max(now, Ordering::SeqCst);
                            tokio::time::sleep(Duration::from_millis(5)).await;
                            inside.fetch_sub(1, Ordering::SeqCst);
                            Ok::<_, TestError>(())
                        })
                        .await
                })
            })
            .collect();

        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 1);
    }
}
