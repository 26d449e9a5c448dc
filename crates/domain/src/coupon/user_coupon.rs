use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use common::{CouponId, UserCouponId, UserId};
use serde::{Deserialize, Serialize};

use crate::RepositoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UserCouponStatus {
    Available,
    Used,
    Expired,
}

impl UserCouponStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserCouponStatus::Available => "AVAILABLE",
            UserCouponStatus::Used => "USED",
            UserCouponStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for UserCouponStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserCouponStatus {
    type Err = RepositoryError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(UserCouponStatus::Available),
            "USED" => Ok(UserCouponStatus::Used),
            "EXPIRED" => Ok(UserCouponStatus::Expired),
            other => Err(RepositoryError::CorruptRow(format!(
                "unknown user coupon status {other}"
            ))),
        }
    }
}

/// Ownership of one issued copy of a coupon.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCoupon {
    pub id: UserCouponId,
    pub user_id: UserId,
    pub coupon_id: CouponId,
    pub status: UserCouponStatus,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// What a successful issuance hands back to the caller.
pub type IssuanceRecord = UserCoupon;

impl UserCoupon {
    pub fn available(
        coupon_id: CouponId,
        user_id: UserId,
        issued_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: UserCouponId::new(),
            user_id,
            coupon_id,
            status: UserCouponStatus::Available,
            issued_at,
            expires_at,
        }
    }
}
