//! Remote lock backed by Redis.
//!
//! Keys are stored as `lock:{key}` → holder ID with a millisecond TTL:
//! - **Acquire**: `SET key holder NX PX ttl`, retried with backoff while another
//!   holder has the key
//! - **Release**: compare-and-delete Lua script, so a holder whose lease
//!   expired never deletes its successor's key
//!
//! Every round trip is bounded by a command timeout. A slow or unreachable
//! server is reported as [`BackendError::Unavailable`], which the coordinator
//! treats as a reason to fall back.

use std::time::Duration;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{Client, FromRedisValue};
use tokio::sync::OnceCell;
use tokio::time::Instant;

use crate::{BackendError, Lease, LockBackend, LockToken, Result};

const KEY_PREFIX: &str = "lock:";

const BACKOFF_BASE: Duration = Duration::from_millis(10);
const BACKOFF_MAX: Duration = Duration::from_millis(200);

const RELEASE_SCRIPT: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
else
    return 0
end
"#;

/// Lease on a Redis key.
#[derive(Debug)]
pub struct RedisLease {
    token: LockToken,
}

impl Lease for RedisLease {
    fn token(&self) -> &LockToken {
        &self.token
    }
}

/// Redis-backed remote lock.
///
/// The connection is established lazily on first use, so a process can start
/// while Redis is down and run on the fallback until it comes back.
pub struct RedisLockBackend {
    client: Client,
    conn: OnceCell<ConnectionManager>,
    release_script: redis::Script,
    acquire_timeout: Duration,
    command_timeout: Duration,
}

impl RedisLockBackend {
    /// Creates a backend for `redis_url` without connecting yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the URL is malformed.
    pub fn new(
        redis_url: &str,
        acquire_timeout: Duration,
        command_timeout: Duration,
    ) -> Result<Self> {
        let client = Client::open(redis_url)?;
        Ok(Self {
            client,
            conn: OnceCell::new(),
            release_script: redis::Script::new(RELEASE_SCRIPT),
            acquire_timeout,
            command_timeout,
        })
    }

    fn redis_key(key: &str) -> String {
        format!("{KEY_PREFIX}{key}")
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        let init = self
            .conn
            .get_or_try_init(|| ConnectionManager::new(self.client.clone()));
        let conn = tokio::time::timeout(self.command_timeout, init)
            .await
            .map_err(|_| BackendError::Unavailable("timed out connecting to Redis".to_string()))??;
        Ok(conn.clone())
    }

    async fn query<T: FromRedisValue>(&self, cmd: &redis::Cmd) -> Result<T> {
        let mut conn = self.connection().await?;
        let reply: redis::RedisResult<T> =
            tokio::time::timeout(self.command_timeout, cmd.query_async(&mut conn))
                .await
                .map_err(|_| {
                    BackendError::Unavailable(format!(
                        "Redis command timed out after {:?}",
                        self.command_timeout
                    ))
                })?;
        Ok(reply?)
    }
}

#[async_trait]
impl LockBackend for RedisLockBackend {
    type Lease = RedisLease;

    #[tracing::instrument(skip(self))]
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<RedisLease> {
        let token = LockToken::new(key, ttl);
        let redis_key = Self::redis_key(key);
        let ttl_ms = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);

        let mut set = redis::cmd("SET");
        set.arg(&redis_key)
            .arg(&token.holder_id)
            .arg("NX")
            .arg("PX")
            .arg(ttl_ms);

        let started = Instant::now();
        let mut backoff = BACKOFF_BASE;
        loop {
            let acquired: Option<String> = self.query(&set).await?;
            if acquired.is_some() {
                return Ok(RedisLease { token });
            }

            if started.elapsed() >= self.acquire_timeout {
                return Err(BackendError::Contended {
                    key: key.to_string(),
                    waited: self.acquire_timeout,
                });
            }
            tokio::time::sleep(backoff).await;
            backoff = backoff.saturating_mul(2).min(BACKOFF_MAX);
        }
    }

    async fn release(&self, lease: RedisLease) -> Result<()> {
        let mut conn = self.connection().await?;
        let mut invocation = self.release_script.prepare_invoke();
        invocation
            .key(Self::redis_key(&lease.token.key))
            .arg(&lease.token.holder_id);

        let deleted: redis::RedisResult<i64> =
            tokio::time::timeout(self.command_timeout, invocation.invoke_async(&mut conn))
                .await
                .map_err(|_| BackendError::Unavailable("Redis release timed out".to_string()))?;

        if deleted? == 0 {
            tracing::warn!(
                key = %lease.token.key,
                "lock expired before release; key now belongs to another holder or nobody"
            );
        }
        Ok(())
    }
}
