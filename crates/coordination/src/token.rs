use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Proof of exclusive ownership of a named key.
///
/// A token is owned by the call that acquired it and is released either
/// explicitly or when `expires_at` passes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockToken {
    pub key: String,
    /// Random per-acquisition value; release only succeeds for the holder.
    pub holder_id: String,
    pub expires_at: DateTime<Utc>,
}

impl LockToken {
    /// Creates a token for `key` with a fresh holder ID.
    pub fn new(key: impl Into<String>, ttl: Duration) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::seconds(30));
        Self {
            key: key.into(),
            holder_id: Uuid::new_v4().to_string(),
            expires_at: Utc::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Utc::now() >= self.expires_at
    }
}
