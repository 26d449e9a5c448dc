use async_trait::async_trait;
use common::{CouponId, UserCouponId, UserId, Version};
use outbox::{CommittedEvents, StagedEvents};
use sqlx::{PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::RepositoryError;

use super::{Coupon, CouponRepository, UserCoupon};

/// PostgreSQL-backed coupon repository.
#[derive(Clone)]
pub struct PostgresCouponRepository {
    pool: PgPool,
}

impl PostgresCouponRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_coupon(row: PgRow) -> Result<Coupon, RepositoryError> {
        Ok(Coupon {
            id: CouponId::from_uuid(row.try_get::<Uuid, _>("id")?),
            name: row.try_get("name")?,
            discount_rate: row.try_get("discount_rate")?,
            total_quantity: row.try_get("total_quantity")?,
            issued_quantity: row.try_get("issued_quantity")?,
            valid_from: row.try_get("valid_from")?,
            valid_until: row.try_get("valid_until")?,
            validity_days: row.try_get("validity_days")?,
            version: Version::new(row.try_get("version")?),
        })
    }

    fn row_to_user_coupon(row: PgRow) -> Result<UserCoupon, RepositoryError> {
        let status: String = row.try_get("status")?;
        Ok(UserCoupon {
            id: UserCouponId::from_uuid(row.try_get::<Uuid, _>("id")?),
            user_id: UserId::from_uuid(row.try_get::<Uuid, _>("user_id")?),
            coupon_id: CouponId::from_uuid(row.try_get::<Uuid, _>("coupon_id")?),
            status: status.parse()?,
            issued_at: row.try_get("issued_at")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

#[async_trait]
impl CouponRepository for PostgresCouponRepository {
    async fn create(&self, coupon: &Coupon) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"
            INSERT INTO coupons
                (id, name, discount_rate, total_quantity, issued_quantity,
                 valid_from, valid_until, validity_days, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(coupon.id.as_uuid())
        .bind(&coupon.name)
        .bind(coupon.discount_rate)
        .bind(coupon.total_quantity)
        .bind(coupon.issued_quantity)
        .bind(coupon.valid_from)
        .bind(coupon.valid_until)
        .bind(coupon.validity_days)
        .bind(coupon.version.as_i64())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find(&self, id: CouponId) -> Result<Option<Coupon>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, name, discount_rate, total_quantity, issued_quantity,
                   valid_from, valid_until, validity_days, version
            FROM coupons
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_coupon).transpose()
    }

    async fn find_issuance(
        &self,
        coupon_id: CouponId,
        user_id: UserId,
    ) -> Result<Option<UserCoupon>, RepositoryError> {
        let row = sqlx::query(
            r#"
            SELECT id, user_id, coupon_id, status, issued_at, expires_at
            FROM user_coupons
            WHERE coupon_id = $1 AND user_id = $2
            "#,
        )
        .bind(coupon_id.as_uuid())
        .bind(user_id.as_uuid())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_user_coupon).transpose()
    }

    async fn save_issuance(
        &self,
        coupon: &Coupon,
        issued: &UserCoupon,
        events: StagedEvents,
    ) -> Result<CommittedEvents, RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            r#"
            UPDATE coupons
            SET issued_quantity = $2, version = $3
            WHERE id = $1 AND version = $4
            "#,
        )
        .bind(coupon.id.as_uuid())
        .bind(coupon.issued_quantity)
        .bind(coupon.version.next().as_i64())
        .bind(coupon.version.as_i64())
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::VersionConflict {
                coupon_id: coupon.id,
                expected: coupon.version,
            });
        }

        sqlx::query(
            r#"
            INSERT INTO user_coupons (id, user_id, coupon_id, status, issued_at, expires_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(issued.id.as_uuid())
        .bind(issued.user_id.as_uuid())
        .bind(issued.coupon_id.as_uuid())
        .bind(issued.status.as_str())
        .bind(issued.issued_at)
        .bind(issued.expires_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.constraint() == Some("unique_user_coupon")
            {
                return RepositoryError::DuplicateIssuance {
                    coupon_id: issued.coupon_id,
                    user_id: issued.user_id,
                };
            }
            RepositoryError::Database(e)
        })?;

        Ok(events.commit(tx).await?)
    }
}
