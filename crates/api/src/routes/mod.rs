pub mod coupons;
pub mod dead_letters;
pub mod health;
pub mod metrics;
