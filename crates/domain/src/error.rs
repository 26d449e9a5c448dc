//! Domain error types.

use chrono::{DateTime, Utc};
use common::{CouponId, UserCouponId, UserId, Version};
use coordination::LockError;
use thiserror::Error;

/// Errors from coupon storage.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// The stored coupon moved past the version the writer read.
    #[error("Version conflict for coupon {coupon_id}: expected version {expected}")]
    VersionConflict {
        coupon_id: CouponId,
        expected: Version,
    },

    /// The user already owns this coupon.
    #[error("User {user_id} already holds coupon {coupon_id}")]
    DuplicateIssuance { coupon_id: CouponId, user_id: UserId },

    #[error("Corrupt row: {0}")]
    CorruptRow(String),

    /// The task running the write stopped before reporting an outcome.
    #[error("Write interrupted: {0}")]
    Interrupted(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors returned by coupon issuance.
#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error("Coupon not found: {0}")]
    CouponNotFound(CouponId),

    /// Now is outside the coupon's validity window.
    #[error("Coupon {coupon_id} is only valid from {valid_from} until {valid_until}")]
    CouponExpired {
        coupon_id: CouponId,
        valid_from: DateTime<Utc>,
        valid_until: DateTime<Utc>,
    },

    #[error("Coupon {coupon_id} is exhausted: all {total_quantity} issued")]
    CouponExhausted {
        coupon_id: CouponId,
        total_quantity: i32,
    },

    /// The user already holds this coupon; `existing` is their ownership record.
    #[error("User {user_id} already holds coupon {coupon_id}")]
    DuplicateIssuance {
        coupon_id: CouponId,
        user_id: UserId,
        existing: Option<UserCouponId>,
    },

    #[error("Invalid coupon definition: {0}")]
    InvalidCoupon(String),

    /// The optimistic version check failed on every allowed attempt.
    #[error("Concurrent update to coupon {coupon_id}, retry later")]
    VersionConflict { coupon_id: CouponId },

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    #[error("Repository error: {0}")]
    Repository(RepositoryError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl IssuanceError {
    /// Returns true if repeating the same request may succeed.
    ///
    /// Business rule violations are terminal. Lock failures and version
    /// conflicts are transient.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            IssuanceError::Lock(_) | IssuanceError::VersionConflict { .. }
        )
    }

    /// Short label used for the rejection metric.
    pub fn reason(&self) -> &'static str {
        match self {
            IssuanceError::CouponNotFound(_) => "not_found",
            IssuanceError::CouponExpired { .. } => "expired",
            IssuanceError::CouponExhausted { .. } => "exhausted",
            IssuanceError::DuplicateIssuance { .. } => "duplicate",
            IssuanceError::InvalidCoupon(_) => "invalid",
            IssuanceError::VersionConflict { .. } => "conflict",
            IssuanceError::Lock(_) => "lock",
            IssuanceError::Repository(_) => "repository",
            IssuanceError::Serialization(_) => "serialization",
        }
    }
}

impl From<RepositoryError> for IssuanceError {
    fn from(err: RepositoryError) -> Self {
        match err {
            RepositoryError::VersionConflict { coupon_id, .. } => {
                IssuanceError::VersionConflict { coupon_id }
            }
            RepositoryError::DuplicateIssuance { coupon_id, user_id } => {
                IssuanceError::DuplicateIssuance {
                    coupon_id,
                    user_id,
                    existing: None,
                }
            }
            other => IssuanceError::Repository(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use coordination::{BackendError, LockStrategy};

    use super::*;

    #[test]
    fn test_business_errors_are_terminal() {
        let coupon_id = CouponId::new();
        let terminal = [
            IssuanceError::CouponNotFound(coupon_id),
            IssuanceError::CouponExhausted {
                coupon_id,
                total_quantity: 5,
            },
            IssuanceError::DuplicateIssuance {
                coupon_id,
                user_id: UserId::new(),
                existing: None,
            },
        ];
        for err in terminal {
            assert!(!err.is_retriable(), "{err} should be terminal");
        }
    }

    #[test]
    fn test_conflicts_and_lock_failures_are_retriable() {
        let coupon_id = CouponId::new();
        assert!(IssuanceError::VersionConflict { coupon_id }.is_retriable());

        let lock = IssuanceError::from(LockError::AcquisitionFailed {
            key: format!("coupon:{coupon_id}"),
            strategy: LockStrategy::Fallback,
            source: BackendError::Contended {
                key: format!("coupon:{coupon_id}"),
                waited: Duration::from_secs(5),
            },
        });
        assert!(lock.is_retriable());
        assert_eq!(lock.reason(), "lock");
    }

    #[test]
    fn test_repository_errors_map_to_issuance_errors() {
        let coupon_id = CouponId::new();
        let user_id = UserId::new();

        let conflict = IssuanceError::from(RepositoryError::VersionConflict {
            coupon_id,
            expected: Version::new(3),
        });
        assert!(matches!(conflict, IssuanceError::VersionConflict { .. }));

        let duplicate =
            IssuanceError::from(RepositoryError::DuplicateIssuance { coupon_id, user_id });
        assert!(matches!(
            duplicate,
            IssuanceError::DuplicateIssuance { existing: None, .. }
        ));
    }
}
