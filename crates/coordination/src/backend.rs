use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::{LockToken, Result};

/// The path a lock was taken on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LockStrategy {
    /// Remote cache service; fast, may be unavailable.
    Remote,
    /// Relational row lock; slower, serialized through the database.
    Fallback,
}

impl LockStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            LockStrategy::Remote => "remote",
            LockStrategy::Fallback => "fallback",
        }
    }
}

impl std::fmt::Display for LockStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A held lock. Dropping a lease without releasing it leaves cleanup to the
/// backend (TTL expiry or transaction rollback).
pub trait Lease: Send {
    fn token(&self) -> &LockToken;
}

/// Try-acquire/release of a named exclusive token with a TTL.
///
/// All implementations must be thread-safe (Send + Sync).
#[async_trait]
pub trait LockBackend: Send + Sync {
    type Lease: Lease + 'static;

    /// Acquires `key` for at most `ttl`.
    ///
    /// Waits for an existing holder up to the backend's own acquisition
    /// timeout, then fails with `Contended`. Infrastructure failures are
    /// reported as `Unavailable`.
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<Self::Lease>;

    /// Releases a lease previously returned by `try_acquire`.
    async fn release(&self, lease: Self::Lease) -> Result<()>;
}
