use std::time::Duration;

use coordination::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CoordinationConfig, InMemoryLockBackend,
    InMemoryRowLockBackend, LockCoordinator, LockError,
};
use criterion::{Criterion, criterion_group, criterion_main};

fn bench_breaker_admit(c: &mut Criterion) {
    let breaker = CircuitBreaker::new("bench", CircuitBreakerConfig::default());

    c.bench_function("breaker/admit_closed", |b| {
        b.iter(|| {
            if let Admission::Attempt(permit) = breaker.admit() {
                permit.succeed();
            }
        });
    });

    let open = CircuitBreaker::new(
        "bench-open",
        CircuitBreakerConfig::new(1, Duration::from_secs(3600)),
    );
    if let Admission::Attempt(permit) = open.admit() {
        permit.fail();
    }
    c.bench_function("breaker/admit_open", |b| {
        b.iter(|| matches!(open.admit(), Admission::Bypass));
    });
}

fn bench_with_lock_remote(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let coordinator = LockCoordinator::new(
        InMemoryLockBackend::default(),
        InMemoryRowLockBackend::default(),
        &CoordinationConfig::default(),
    );

    c.bench_function("coordinator/with_lock_remote", |b| {
        b.iter(|| {
            rt.block_on(async {
                coordinator
                    .with_lock("bench:key", Duration::from_secs(5), || async {
                        Ok::<_, LockError>(())
                    })
                    .await
                    .unwrap();
            });
        });
    });
}

fn bench_with_lock_fallback(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let remote = InMemoryLockBackend::default();
    remote.set_unavailable(true);
    let coordinator = LockCoordinator::new(
        remote,
        InMemoryRowLockBackend::default(),
        &CoordinationConfig::default(),
    );

    c.bench_function("coordinator/with_lock_breaker_open", |b| {
        b.iter(|| {
            rt.block_on(async {
                coordinator
                    .with_lock("bench:key", Duration::from_secs(5), || async {
                        Ok::<_, LockError>(())
                    })
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_breaker_admit,
    bench_with_lock_remote,
    bench_with_lock_fallback
);
criterion_main!(benches);
