//! Coupon issuance against PostgreSQL
//!
//! Run with:
//!
//! ```bash
//! cargo test -p domain --test coupon_integration -- --test-threads=1
//! ```

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use common::{UserId, Version};
use coordination::{
    CircuitState, CoordinationConfig, InMemoryLockBackend, LockCoordinator, PostgresRowLockBackend,
};
use domain::{
    Coupon, CouponConfig, CouponRepository, CouponService, IssuanceError, PostgresCouponRepository,
    RepositoryError, UserCouponStatus,
};
use futures_util::future::join_all;
use outbox::{
    DeadLetterService, InMemoryBroker, InMemoryDeadLetterRepository, OutboxConfig,
    OutboxPublisher, StagedEvents,
};
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/001_create_coupons.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            sqlx::raw_sql(include_str!(
                "../../../migrations/002_create_distributed_locks.sql"
            ))
            .execute(&temp_pool)
            .await
            .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

async fn connect(max_connections: u32) -> PgPool {
    let info = get_container_info().await;
    sqlx::postgres::PgPoolOptions::new()
        .max_connections(max_connections)
        .connect(&info.connection_string)
        .await
        .unwrap()
}

async fn get_test_pool() -> PgPool {
    let pool = connect(10).await;

    sqlx::query("TRUNCATE TABLE user_coupons, coupons, distributed_locks")
        .execute(&pool)
        .await
        .unwrap();

    pool
}

fn open_coupon(total: i32) -> Coupon {
    let now = Utc::now();
    Coupon::new(
        "BLACKFRIDAY",
        30,
        total,
        now - ChronoDuration::hours(1),
        now + ChronoDuration::days(3),
        10,
    )
    .unwrap()
}

type PgService = CouponService<PostgresCouponRepository, InMemoryLockBackend, PostgresRowLockBackend>;

/// Lock waiters each park a connection on `lock_pool`, so it is kept apart
/// from the pool the repository needs to make progress.
fn service(
    pool: PgPool,
    lock_pool: PgPool,
    remote: InMemoryLockBackend,
) -> (Arc<PgService>, OutboxPublisher, InMemoryBroker) {
    let broker = InMemoryBroker::default();
    let dead_letters = Arc::new(DeadLetterService::new(
        InMemoryDeadLetterRepository::new(),
        Arc::new(broker.clone()),
    ));
    let publisher = OutboxPublisher::spawn(dead_letters, OutboxConfig::default());
    let locks = Arc::new(LockCoordinator::new(
        remote,
        PostgresRowLockBackend::new(lock_pool, Duration::from_secs(10)),
        &CoordinationConfig::default(),
    ));
    let service = Arc::new(CouponService::new(
        PostgresCouponRepository::new(pool),
        locks,
        publisher.clone(),
        CouponConfig {
            lock_ttl: Duration::from_secs(10),
            max_conflict_retries: 3,
        },
    ));
    (service, publisher, broker)
}

#[tokio::test]
#[serial]
async fn round_trips_coupon_and_issuance() {
    let pool = get_test_pool().await;
    let repo = PostgresCouponRepository::new(pool);
    let mut coupon = open_coupon(3);
    repo.create(&coupon).await.unwrap();

    let loaded = repo.find(coupon.id()).await.unwrap().unwrap();
    assert_eq!(loaded.name(), "BLACKFRIDAY");
    assert_eq!(loaded.version(), Version::initial());

    let user_id = UserId::new();
    let issued = coupon.issue(user_id, Utc::now()).unwrap();
    repo.save_issuance(&coupon, &issued, StagedEvents::new())
        .await
        .unwrap();

    let stored = repo.find(coupon.id()).await.unwrap().unwrap();
    assert_eq!(stored.issued_quantity(), 1);
    assert_eq!(stored.version(), Version::new(1));

    let ownership = repo
        .find_issuance(coupon.id(), user_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(ownership.id, issued.id);
    assert_eq!(ownership.status, UserCouponStatus::Available);
}

#[tokio::test]
#[serial]
async fn stale_writer_fails_version_check() {
    let pool = get_test_pool().await;
    let repo = PostgresCouponRepository::new(pool);
    let coupon = open_coupon(3);
    repo.create(&coupon).await.unwrap();

    let mut first = repo.find(coupon.id()).await.unwrap().unwrap();
    let mut second = repo.find(coupon.id()).await.unwrap().unwrap();

    let issued = first.issue(UserId::new(), Utc::now()).unwrap();
    repo.save_issuance(&first, &issued, StagedEvents::new())
        .await
        .unwrap();

    let late = second.issue(UserId::new(), Utc::now()).unwrap();
    let err = repo
        .save_issuance(&second, &late, StagedEvents::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::VersionConflict { .. }));

    let stored = repo.find(coupon.id()).await.unwrap().unwrap();
    assert_eq!(stored.issued_quantity(), 1);
    assert!(
        repo.find_issuance(coupon.id(), late.user_id)
            .await
            .unwrap()
            .is_none()
    );
}

#[tokio::test]
#[serial]
async fn duplicate_owner_rolls_back_quantity() {
    let pool = get_test_pool().await;
    let repo = PostgresCouponRepository::new(pool);
    let coupon = open_coupon(3);
    repo.create(&coupon).await.unwrap();
    let user_id = UserId::new();

    let mut first = repo.find(coupon.id()).await.unwrap().unwrap();
    let issued = first.issue(user_id, Utc::now()).unwrap();
    repo.save_issuance(&first, &issued, StagedEvents::new())
        .await
        .unwrap();

    let mut again = repo.find(coupon.id()).await.unwrap().unwrap();
    let duplicate = again.issue(user_id, Utc::now()).unwrap();
    let err = repo
        .save_issuance(&again, &duplicate, StagedEvents::new())
        .await
        .unwrap_err();
    assert!(matches!(err, RepositoryError::DuplicateIssuance { .. }));

    let stored = repo.find(coupon.id()).await.unwrap().unwrap();
    assert_eq!(stored.issued_quantity(), 1);
}

#[tokio::test]
#[serial]
async fn fifty_callers_on_row_lock_fallback() {
    let pool = get_test_pool().await;
    let remote = InMemoryLockBackend::default();
    remote.set_unavailable(true);
    let lock_pool = connect(60).await;
    let (service, publisher, broker) = service(pool.clone(), lock_pool, remote);

    let coupon = open_coupon(5);
    service.repository().create(&coupon).await.unwrap();

    let attempts = (0..50).map(|_| {
        let service = Arc::clone(&service);
        let coupon_id = coupon.id();
        tokio::spawn(async move { service.issue(coupon_id, UserId::new()).await })
    });
    let results: Vec<_> = join_all(attempts)
        .await
        .into_iter()
        .map(|joined| joined.unwrap())
        .collect();

    assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 5);
    assert_eq!(
        results
            .iter()
            .filter(|r| matches!(r, Err(IssuanceError::CouponExhausted { .. })))
            .count(),
        45
    );
    assert_eq!(service.locks().breaker().state(), CircuitState::Open);

    let issued: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM user_coupons WHERE coupon_id = $1")
        .bind(coupon.id().as_uuid())
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(issued, 5);

    publisher.flush().await;
    assert_eq!(broker.records_for("coupon-issued").len(), 5);
}
