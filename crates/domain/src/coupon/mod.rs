//! Coupon issuance.

mod aggregate;
mod memory;
mod postgres;
mod repository;
mod service;
mod user_coupon;

pub use aggregate::Coupon;
pub use memory::InMemoryCouponRepository;
pub use postgres::PostgresCouponRepository;
pub use repository::CouponRepository;
pub use service::{CouponConfig, CouponService};
pub use user_coupon::{IssuanceRecord, UserCoupon, UserCouponStatus};
