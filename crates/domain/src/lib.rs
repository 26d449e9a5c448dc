//! Domain layer for checkout consistency.
//!
//! This crate provides:
//! - The `Coupon` aggregate, a quantity-capped resource
//! - `CouponRepository` with in-memory and PostgreSQL implementations
//! - `CouponService`, which issues coupons under a distributed lock and
//!   hands the resulting events to the outbox after commit

pub mod coupon;
pub mod error;

pub use coupon::{
    Coupon, CouponConfig, CouponRepository, CouponService, InMemoryCouponRepository,
    IssuanceRecord, PostgresCouponRepository, UserCoupon, UserCouponStatus,
};
pub use error::{IssuanceError, RepositoryError};
