use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{PgPool, Postgres, Transaction};

use crate::{BackendError, Lease, LockBackend, LockToken, Result};

/// SQLSTATE raised when `lock_timeout` expires.
const LOCK_NOT_AVAILABLE: &str = "55P03";

/// Formats a duration for a PostgreSQL timeout setting.
///
/// PostgreSQL reads `0` as "no timeout", so the value is floored at 1ms.
fn timeout_setting(timeout: Duration) -> String {
    format!("{}ms", timeout.as_millis().max(1))
}

/// Lease held as an open transaction owning a `SELECT ... FOR UPDATE` row lock.
///
/// Dropping the lease rolls the transaction back, which also releases the row.
pub struct PgRowLease {
    token: LockToken,
    tx: Transaction<'static, Postgres>,
}

impl Lease for PgRowLease {
    fn token(&self) -> &LockToken {
        &self.token
    }
}

/// Fallback lock backed by a pessimistic row lock in PostgreSQL.
///
/// Every key maps to one row in `distributed_locks`. Acquiring locks that row
/// inside a transaction that stays open until release, so concurrent holders
/// are serialized by the database even when the remote service is down.
#[derive(Clone)]
pub struct PostgresRowLockBackend {
    pool: PgPool,
    lock_timeout: Duration,
}

impl PostgresRowLockBackend {
    /// Creates a backend that waits at most `lock_timeout` for another holder.
    ///
    /// A zero timeout is raised to 1ms; the wait is always bounded.
    pub fn new(pool: PgPool, lock_timeout: Duration) -> Self {
        Self {
            pool,
            lock_timeout: lock_timeout.max(Duration::from_millis(1)),
        }
    }

    /// How long an acquisition waits on another holder.
    pub fn lock_timeout(&self) -> Duration {
        self.lock_timeout
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn classify(&self, key: &str, err: sqlx::Error) -> BackendError {
        if let sqlx::Error::Database(ref db_err) = err
            && db_err.code().as_deref() == Some(LOCK_NOT_AVAILABLE)
        {
            return BackendError::Contended {
                key: key.to_string(),
                waited: self.lock_timeout,
            };
        }
        BackendError::Database(err)
    }
}

#[async_trait]
impl LockBackend for PostgresRowLockBackend {
    type Lease = PgRowLease;

    #[tracing::instrument(skip(self))]
    async fn try_acquire(&self, key: &str, ttl: Duration) -> Result<PgRowLease> {
        // Make sure the row exists outside the locking transaction so first-time
        // keys do not wait on each other's uncommitted inserts.
        sqlx::query(
            "INSERT INTO distributed_locks (lock_key) VALUES ($1) ON CONFLICT (lock_key) DO NOTHING",
        )
        .bind(key)
        .execute(&self.pool)
        .await?;

        let mut tx = self.pool.begin().await?;

        sqlx::query("SELECT set_config('lock_timeout', $1, true)")
            .bind(timeout_setting(self.lock_timeout))
            .execute(&mut *tx)
            .await?;
        // A holder that outlives its lease is cut off by the server.
        sqlx::query("SELECT set_config('idle_in_transaction_session_timeout', $1, true)")
            .bind(timeout_setting(ttl))
            .execute(&mut *tx)
            .await?;

        sqlx::query("SELECT lock_key FROM distributed_locks WHERE lock_key = $1 FOR UPDATE")
            .bind(key)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| self.classify(key, e))?;

        let token = LockToken::new(key, ttl);
        sqlx::query(
            r#"
            UPDATE distributed_locks
            SET holder_id = $2, locked_at = $3, expires_at = $4
            WHERE lock_key = $1
            "#,
        )
        .bind(key)
        .bind(&token.holder_id)
        .bind(Utc::now())
        .bind(token.expires_at)
        .execute(&mut *tx)
        .await?;

        Ok(PgRowLease { token, tx })
    }

    async fn release(&self, lease: PgRowLease) -> Result<()> {
        lease.tx.commit().await?;
        Ok(())
    }
}
