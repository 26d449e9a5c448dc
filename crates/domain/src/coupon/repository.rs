use async_trait::async_trait;
use common::{CouponId, UserId};
use outbox::{CommittedEvents, StagedEvents};

use crate::RepositoryError;

use super::{Coupon, UserCoupon};

/// Storage for coupons and their ownership records.
#[async_trait]
pub trait CouponRepository: Send + Sync {
    /// Adds a coupon to the catalog.
    async fn create(&self, coupon: &Coupon) -> Result<(), RepositoryError>;

    async fn find(&self, id: CouponId) -> Result<Option<Coupon>, RepositoryError>;

    async fn find_issuance(
        &self,
        coupon_id: CouponId,
        user_id: UserId,
    ) -> Result<Option<UserCoupon>, RepositoryError>;

    /// Atomically writes the coupon's new issued count and the ownership record.
    ///
    /// `coupon.version()` must still be the stored version; the stored version
    /// is then bumped by one. On success the staged events are released as
    /// committed. On any error nothing is written and the events are dropped.
    async fn save_issuance(
        &self,
        coupon: &Coupon,
        issued: &UserCoupon,
        events: StagedEvents,
    ) -> Result<CommittedEvents, RepositoryError>;
}
