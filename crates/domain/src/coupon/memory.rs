use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use common::{CouponId, UserId};
use outbox::{CommittedEvents, StagedEvents};

use crate::RepositoryError;

use super::{Coupon, CouponRepository, UserCoupon};

#[derive(Debug, Default)]
struct InMemoryCouponState {
    coupons: HashMap<CouponId, Coupon>,
    issuances: HashMap<(CouponId, UserId), UserCoupon>,
}

/// In-memory coupon repository for testing.
#[derive(Debug, Clone, Default)]
pub struct InMemoryCouponRepository {
    state: Arc<RwLock<InMemoryCouponState>>,
}

impl InMemoryCouponRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of ownership records for a coupon.
    pub fn issuance_count(&self, coupon_id: CouponId) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .issuances
            .keys()
            .filter(|(id, _)| *id == coupon_id)
            .count()
    }

    /// Bumps the stored version as if another writer had saved the coupon.
    pub fn touch(&self, coupon_id: CouponId) {
        if let Some(coupon) = self.state.write().unwrap_or_else(PoisonError::into_inner).coupons.get_mut(&coupon_id) {
            coupon.version = coupon.version.next();
        }
    }
}

#[async_trait]
impl CouponRepository for InMemoryCouponRepository {
    async fn create(&self, coupon: &Coupon) -> Result<(), RepositoryError> {
        self.state
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .coupons
            .insert(coupon.id, coupon.clone());
        Ok(())
    }

    async fn find(&self, id: CouponId) -> Result<Option<Coupon>, RepositoryError> {
        Ok(self.state.read().unwrap_or_else(PoisonError::into_inner).coupons.get(&id).cloned())
    }

    async fn find_issuance(
        &self,
        coupon_id: CouponId,
        user_id: UserId,
    ) -> Result<Option<UserCoupon>, RepositoryError> {
        Ok(self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .issuances
            .get(&(coupon_id, user_id))
            .cloned())
    }

    async fn save_issuance(
        &self,
        coupon: &Coupon,
        issued: &UserCoupon,
        events: StagedEvents,
    ) -> Result<CommittedEvents, RepositoryError> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);

        let stored_version = state
            .coupons
            .get(&coupon.id)
            .map(|stored| stored.version)
            .ok_or_else(|| RepositoryError::CorruptRow(format!("coupon {} vanished", coupon.id)))?;
        if stored_version != coupon.version {
            return Err(RepositoryError::VersionConflict {
                coupon_id: coupon.id,
                expected: coupon.version,
            });
        }
        if coupon.issued_quantity > coupon.total_quantity {
            return Err(RepositoryError::CorruptRow(format!(
                "coupon {} would exceed its total quantity",
                coupon.id
            )));
        }
        let owner = (issued.coupon_id, issued.user_id);
        if state.issuances.contains_key(&owner) {
            return Err(RepositoryError::DuplicateIssuance {
                coupon_id: issued.coupon_id,
                user_id: issued.user_id,
            });
        }

        let mut saved = coupon.clone();
        saved.version = coupon.version.next();
        state.coupons.insert(saved.id, saved);
        state.issuances.insert(owner, issued.clone());

        Ok(events.into_committed())
    }
}
