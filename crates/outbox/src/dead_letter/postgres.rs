use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{DeadLetterMessage, DeadLetterRepository, DeadLetterStatus, NewDeadLetter, Result};

const COLUMNS: &str = "id, topic, partition_id, message_offset, message_key, payload, \
     error_message, stack_trace, failed_at, retry_count, status, reprocessed_at, note";

/// PostgreSQL-backed dead-letter repository.
#[derive(Clone)]
pub struct PostgresDeadLetterRepository {
    pool: PgPool,
}

impl PostgresDeadLetterRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_message(row: PgRow) -> Result<DeadLetterMessage> {
        let status: String = row.try_get("status")?;

        Ok(DeadLetterMessage {
            id: row.try_get("id")?,
            topic: row.try_get("topic")?,
            partition: row.try_get("partition_id")?,
            offset: row.try_get("message_offset")?,
            key: row.try_get("message_key")?,
            payload: row.try_get("payload")?,
            error_message: row.try_get("error_message")?,
            stack_trace: row.try_get("stack_trace")?,
            failed_at: row.try_get("failed_at")?,
            retry_count: row.try_get("retry_count")?,
            status: status.parse()?,
            reprocessed_at: row.try_get("reprocessed_at")?,
            note: row.try_get("note")?,
        })
    }
}

#[async_trait]
impl DeadLetterRepository for PostgresDeadLetterRepository {
    async fn insert(&self, message: NewDeadLetter) -> Result<DeadLetterMessage> {
        let row = sqlx::query(&format!(
            r#"
            INSERT INTO dead_letter_messages
                (topic, partition_id, message_offset, message_key, payload,
                 error_message, stack_trace, failed_at, retry_count, status)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, 'PENDING')
            RETURNING {COLUMNS}
            "#
        ))
        .bind(&message.topic)
        .bind(message.partition)
        .bind(message.offset)
        .bind(&message.key)
        .bind(&message.payload)
        .bind(&message.error_message)
        .bind(&message.stack_trace)
        .bind(Utc::now())
        .bind(message.retry_count)
        .fetch_one(&self.pool)
        .await?;

        Self::row_to_message(row)
    }

    async fn find(&self, id: i64) -> Result<Option<DeadLetterMessage>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM dead_letter_messages WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_message).transpose()
    }

    async fn list(&self, status: Option<DeadLetterStatus>) -> Result<Vec<DeadLetterMessage>> {
        let rows = match status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM dead_letter_messages WHERE status = $1 \
                     ORDER BY failed_at DESC, id DESC"
                ))
                .bind(status.as_str())
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {COLUMNS} FROM dead_letter_messages ORDER BY failed_at DESC, id DESC"
                ))
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn count_by_status(&self, status: DeadLetterStatus) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM dead_letter_messages WHERE status = $1")
                .bind(status.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.max(0) as u64)
    }

    async fn pending_by_topic(&self) -> Result<Vec<(String, u64)>> {
        let rows = sqlx::query(
            r#"
            SELECT topic, COUNT(*) AS pending
            FROM dead_letter_messages
            WHERE status = 'PENDING'
            GROUP BY topic
            ORDER BY topic
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| -> Result<(String, u64)> {
                let topic: String = row.try_get("topic")?;
                let pending: i64 = row.try_get("pending")?;
                Ok((topic, pending.max(0) as u64))
            })
            .collect()
    }

    async fn mark_reprocessed(&self, id: i64, at: DateTime<Utc>, note: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE dead_letter_messages
            SET status = 'REPROCESSED', reprocessed_at = $2, note = $3
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(at)
        .bind(note)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_ignored(&self, id: i64, note: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE dead_letter_messages
            SET status = 'IGNORED', note = $2
            WHERE id = $1 AND status = 'PENDING'
            "#,
        )
        .bind(id)
        .bind(note)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }
}
