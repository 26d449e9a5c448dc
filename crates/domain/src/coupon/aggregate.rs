//! Coupon aggregate: a quantity-capped resource.

use chrono::{DateTime, Duration, Utc};
use common::{CouponId, UserId, Version};
use serde::{Deserialize, Serialize};

use crate::IssuanceError;

use super::UserCoupon;

const MAX_VALIDITY_DAYS: i32 = 3_650;

/// A coupon with a fixed number of copies.
///
/// Invariant: `issued_quantity <= total_quantity`. The issuance lock keeps
/// writers serialized; the version checked at write time rejects anyone who
/// got around it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coupon {
    pub(crate) id: CouponId,
    pub(crate) name: String,
    pub(crate) discount_rate: i32,
    pub(crate) total_quantity: i32,
    pub(crate) issued_quantity: i32,
    pub(crate) valid_from: DateTime<Utc>,
    pub(crate) valid_until: DateTime<Utc>,
    pub(crate) validity_days: i32,
    pub(crate) version: Version,
}

impl Coupon {
    /// Defines a new coupon with nothing issued yet.
    ///
    /// # Errors
    ///
    /// Returns `IssuanceError::InvalidCoupon` if the rate is outside 0..=100,
    /// the quantity is negative, the window is inverted, or the validity
    /// period is not between 1 and 3650 days.
    pub fn new(
        name: impl Into<String>,
        discount_rate: i32,
        total_quantity: i32,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
        validity_days: i32,
    ) -> Result<Self, IssuanceError> {
        if !(0..=100).contains(&discount_rate) {
            return Err(IssuanceError::InvalidCoupon(format!(
                "discount rate {discount_rate} is outside 0..=100"
            )));
        }
        if total_quantity < 0 {
            return Err(IssuanceError::InvalidCoupon(
                "total quantity cannot be negative".to_string(),
            ));
        }
        if valid_until < valid_from {
            return Err(IssuanceError::InvalidCoupon(
                "validity window ends before it starts".to_string(),
            ));
        }
        if !(1..=MAX_VALIDITY_DAYS).contains(&validity_days) {
            return Err(IssuanceError::InvalidCoupon(format!(
                "validity days {validity_days} is outside 1..={MAX_VALIDITY_DAYS}"
            )));
        }

        Ok(Self {
            id: CouponId::new(),
            name: name.into(),
            discount_rate,
            total_quantity,
            issued_quantity: 0,
            valid_from,
            valid_until,
            validity_days,
            version: Version::initial(),
        })
    }

    pub fn id(&self) -> CouponId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn discount_rate(&self) -> i32 {
        self.discount_rate
    }

    pub fn total_quantity(&self) -> i32 {
        self.total_quantity
    }

    pub fn issued_quantity(&self) -> i32 {
        self.issued_quantity
    }

    pub fn remaining(&self) -> i32 {
        self.total_quantity - self.issued_quantity
    }

    pub fn valid_from(&self) -> DateTime<Utc> {
        self.valid_from
    }

    pub fn valid_until(&self) -> DateTime<Utc> {
        self.valid_until
    }

    pub fn validity_days(&self) -> i32 {
        self.validity_days
    }

    /// Version as loaded from storage.
    pub fn version(&self) -> Version {
        self.version
    }

    pub fn is_valid_at(&self, now: DateTime<Utc>) -> bool {
        self.valid_from <= now && now <= self.valid_until
    }

    /// Checks the window and the cap without changing anything.
    pub fn ensure_issuable(&self, now: DateTime<Utc>) -> Result<(), IssuanceError> {
        if !self.is_valid_at(now) {
            return Err(IssuanceError::CouponExpired {
                coupon_id: self.id,
                valid_from: self.valid_from,
                valid_until: self.valid_until,
            });
        }
        if self.issued_quantity >= self.total_quantity {
            return Err(IssuanceError::CouponExhausted {
                coupon_id: self.id,
                total_quantity: self.total_quantity,
            });
        }
        Ok(())
    }

    /// Takes one copy for `user_id` and returns the ownership record.
    ///
    /// The version is left as loaded; the repository compares it on save.
    pub fn issue(&mut self, user_id: UserId, now: DateTime<Utc>) -> Result<UserCoupon, IssuanceError> {
        self.ensure_issuable(now)?;
        self.issued_quantity += 1;
        Ok(UserCoupon::available(
            self.id,
            user_id,
            now,
            now + Duration::days(i64::from(self.validity_days)),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::UserCouponStatus;

    fn coupon(total: i32) -> Coupon {
        let now = Utc::now();
        Coupon::new(
            "WELCOME",
            10,
            total,
            now - Duration::days(1),
            now + Duration::days(1),
            7,
        )
        .unwrap()
    }

    #[test]
    fn test_issue_increments_and_sets_expiry() {
        let mut coupon = coupon(2);
        let user_id = UserId::new();
        let now = Utc::now();

        let issued = coupon.issue(user_id, now).unwrap();

        assert_eq!(coupon.issued_quantity(), 1);
        assert_eq!(coupon.remaining(), 1);
        assert_eq!(coupon.version(), Version::initial());
        assert_eq!(issued.status, UserCouponStatus::Available);
        assert_eq!(issued.user_id, user_id);
        assert_eq!(issued.issued_at, now);
        assert_eq!(issued.expires_at, now + Duration::days(7));
    }

    #[test]
    fn test_issue_stops_at_cap() {
        let mut coupon = coupon(1);
        coupon.issue(UserId::new(), Utc::now()).unwrap();

        let err = coupon.issue(UserId::new(), Utc::now()).unwrap_err();
        assert!(matches!(
            err,
            IssuanceError::CouponExhausted {
                total_quantity: 1,
                ..
            }
        ));
        assert_eq!(coupon.issued_quantity(), 1);
    }

    #[test]
    fn test_outside_window_is_expired() {
        let mut coupon = coupon(5);
        let err = coupon
            .issue(UserId::new(), Utc::now() + Duration::days(2))
            .unwrap_err();
        assert!(matches!(err, IssuanceError::CouponExpired { .. }));

        let err = coupon
            .issue(UserId::new(), Utc::now() - Duration::days(2))
            .unwrap_err();
        assert!(matches!(err, IssuanceError::CouponExpired { .. }));
        assert_eq!(coupon.issued_quantity(), 0);
    }

    #[test]
    fn test_zero_quantity_is_exhausted() {
        let coupon = coupon(0);
        assert!(matches!(
            coupon.ensure_issuable(Utc::now()),
            Err(IssuanceError::CouponExhausted { .. })
        ));
    }

    #[test]
    fn test_rejects_invalid_definitions() {
        let now = Utc::now();
        let later = now + Duration::days(1);
        assert!(Coupon::new("A", 101, 1, now, later, 7).is_err());
        assert!(Coupon::new("A", 10, -1, now, later, 7).is_err());
        assert!(Coupon::new("A", 10, 1, later, now, 7).is_err());
        assert!(Coupon::new("A", 10, 1, now, later, 0).is_err());
        assert!(Coupon::new("A", 10, 1, now, later, 7).is_ok());
    }
}
