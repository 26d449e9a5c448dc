//! Shared types used across the coordination, outbox, and domain crates.

pub mod types;
pub mod version;

pub use types::{CouponId, OrderId, PaymentId, UserCouponId, UserId};
pub use version::Version;
