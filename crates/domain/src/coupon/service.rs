//! Coupon issuance service.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use common::{CouponId, UserId};
use coordination::{LockBackend, LockCoordinator, LockError};
use outbox::{CouponIssued, OutboxPublisher, StagedEvents};
use tokio::sync::oneshot;

use crate::{IssuanceError, RepositoryError};

use super::{CouponRepository, UserCoupon};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CouponConfig {
    /// Lease on the per-coupon lock. Bounds the whole critical section.
    pub lock_ttl: Duration,
    /// Extra attempts after an optimistic version conflict.
    pub max_conflict_retries: u32,
}

impl Default for CouponConfig {
    fn default() -> Self {
        Self {
            lock_ttl: Duration::from_secs(10),
            max_conflict_retries: 3,
        }
    }
}

/// Issues coupons one copy at a time.
///
/// Each issuance runs under the lock `coupon:{id}`. The `coupon-issued` event
/// is handed to the publisher right after the write commits, normally while
/// the lock is still held, so events for one coupon reach the publisher in
/// commit order.
///
/// The write and the handoff run on their own task. If the lease expires
/// while they are in flight they still finish together: a committed issuance
/// is always published and reported as issued. The version check on save
/// keeps the quantity exact once the lock has been given up.
pub struct CouponService<C, R, F>
where
    C: CouponRepository,
    R: LockBackend,
    F: LockBackend,
{
    repository: Arc<C>,
    locks: Arc<LockCoordinator<R, F>>,
    publisher: OutboxPublisher,
    config: CouponConfig,
}

impl<C, R, F> CouponService<C, R, F>
where
    C: CouponRepository + 'static,
    R: LockBackend,
    F: LockBackend,
{
    pub fn new(
        repository: C,
        locks: Arc<LockCoordinator<R, F>>,
        publisher: OutboxPublisher,
        config: CouponConfig,
    ) -> Self {
        Self {
            repository: Arc::new(repository),
            locks,
            publisher,
            config,
        }
    }

    pub fn repository(&self) -> &C {
        &self.repository
    }

    pub fn locks(&self) -> &Arc<LockCoordinator<R, F>> {
        &self.locks
    }

    /// Issues one copy of `coupon_id` to `user_id`.
    ///
    /// # Errors
    ///
    /// - `CouponNotFound`, `CouponExpired`, `CouponExhausted`,
    ///   `DuplicateIssuance`: terminal, nothing was written.
    /// - `VersionConflict`: another writer kept winning; retriable.
    /// - `Lock`: the lock could not be taken; retriable.
    #[tracing::instrument(skip(self))]
    pub async fn issue(
        &self,
        coupon_id: CouponId,
        user_id: UserId,
    ) -> Result<UserCoupon, IssuanceError> {
        let key = format!("coupon:{coupon_id}");
        let mut attempt = 0;

        loop {
            attempt += 1;
            let (landed, outcome) = oneshot::channel();
            let result = self
                .locks
                .with_lock(&key, self.config.lock_ttl, || {
                    self.issue_locked(coupon_id, user_id, landed)
                })
                .await;

            let result = match result {
                Err(IssuanceError::Lock(LockError::LeaseExpired { .. })) => match outcome.await {
                    Ok(issued) => {
                        tracing::warn!(%coupon_id, %user_id, "issuance committed after its lease expired");
                        Ok(issued)
                    }
                    Err(_) => result,
                },
                other => other,
            };

            match result {
                Ok(issued) => {
                    metrics::counter!("coupon_issued_total").increment(1);
                    tracing::info!(
                        %coupon_id,
                        %user_id,
                        user_coupon_id = %issued.id,
                        "coupon issued"
                    );
                    return Ok(issued);
                }
                Err(IssuanceError::VersionConflict { .. })
                    if attempt <= self.config.max_conflict_retries =>
                {
                    tracing::warn!(%coupon_id, attempt, "version conflict, retrying issuance");
                }
                Err(err) => {
                    metrics::counter!("coupon_issue_rejected_total", "reason" => err.reason())
                        .increment(1);
                    if err.is_retriable() {
                        tracing::warn!(%coupon_id, %user_id, error = %err, "issuance failed");
                    } else {
                        tracing::info!(%coupon_id, %user_id, error = %err, "issuance rejected");
                    }
                    return Err(err);
                }
            }
        }
    }

    /// Checks and writes one issuance; sends it on `landed` once committed.
    async fn issue_locked(
        &self,
        coupon_id: CouponId,
        user_id: UserId,
        landed: oneshot::Sender<UserCoupon>,
    ) -> Result<UserCoupon, IssuanceError> {
        let mut coupon = self
            .repository
            .find(coupon_id)
            .await?
            .ok_or(IssuanceError::CouponNotFound(coupon_id))?;

        let now = Utc::now();
        coupon.ensure_issuable(now)?;

        if let Some(existing) = self.repository.find_issuance(coupon_id, user_id).await? {
            return Err(IssuanceError::DuplicateIssuance {
                coupon_id,
                user_id,
                existing: Some(existing.id),
            });
        }

        let issued = coupon.issue(user_id, now)?;

        let mut events = StagedEvents::new();
        events.stage(&CouponIssued {
            user_coupon_id: issued.id,
            user_id,
            coupon_id,
            coupon_name: coupon.name().to_string(),
            discount_rate: coupon.discount_rate(),
            issued_at: issued.issued_at,
            expires_at: issued.expires_at,
            timestamp: now,
        })?;

        // Dropping this future must not split the commit from the handoff.
        let repository = Arc::clone(&self.repository);
        let publisher = self.publisher.clone();
        let commit = tokio::spawn(async move {
            let committed = repository.save_issuance(&coupon, &issued, events).await?;
            publisher.publish_after_commit(committed);
            let _ = landed.send(issued.clone());
            Ok::<_, RepositoryError>(issued)
        });

        match commit.await {
            Ok(result) => Ok(result?),
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(err) => Err(RepositoryError::Interrupted(err.to_string()).into()),
        }
    }
}
