use std::sync::Arc;

use chrono::{Duration, Utc};
use common::UserId;
use coordination::{CoordinationConfig, InMemoryLockBackend, InMemoryRowLockBackend, LockCoordinator};
use criterion::{Criterion, criterion_group, criterion_main};
use domain::{Coupon, CouponConfig, CouponRepository, CouponService, InMemoryCouponRepository};
use outbox::{DeadLetterService, InMemoryBroker, InMemoryDeadLetterRepository, OutboxConfig, OutboxPublisher};

fn large_coupon() -> Coupon {
    let now = Utc::now();
    Coupon::new(
        "BENCH",
        10,
        i32::MAX,
        now - Duration::days(1),
        now + Duration::days(365),
        30,
    )
    .unwrap()
}

fn bench_coupon_issue(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let repo = InMemoryCouponRepository::new();
    let coupon = large_coupon();
    rt.block_on(repo.create(&coupon)).unwrap();

    let service = rt.block_on(async {
        let dead_letters = Arc::new(DeadLetterService::new(
            InMemoryDeadLetterRepository::new(),
            Arc::new(InMemoryBroker::default()),
        ));
        let publisher = OutboxPublisher::spawn(dead_letters, OutboxConfig::default());
        let locks = Arc::new(LockCoordinator::new(
            InMemoryLockBackend::default(),
            InMemoryRowLockBackend::default(),
            &CoordinationConfig::default(),
        ));
        CouponService::new(repo, locks, publisher, CouponConfig::default())
    });

    c.bench_function("domain/coupon_issue", |b| {
        b.iter(|| {
            rt.block_on(async {
                service.issue(coupon.id(), UserId::new()).await.unwrap();
            });
        });
    });
}

fn bench_aggregate_issue(c: &mut Criterion) {
    let now = Utc::now();

    c.bench_function("domain/aggregate_issue", |b| {
        b.iter(|| {
            let mut coupon = large_coupon();
            coupon.issue(UserId::new(), now).unwrap();
        });
    });
}

criterion_group!(benches, bench_coupon_issue, bench_aggregate_issue);
criterion_main!(benches);
