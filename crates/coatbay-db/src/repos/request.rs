//! Request repository

use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbRequest, DbResult};

pub struct RequestRepo {
    pool: PgPool,
}

impl RequestRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, request: &DbRequest) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cb_requests (id, buyer, status, published, delivery_date,
                awarded_offer, dispute_open, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(request.id)
        .bind(request.buyer)
        .bind(&request.status)
        .bind(request.published)
        .bind(request.delivery_date)
        .bind(request.awarded_offer)
        .bind(request.dispute_open)
        .bind(request.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find(&self, id: Uuid) -> DbResult<Option<DbRequest>> {
        let request = sqlx::query_as::<_, DbRequest>("SELECT * FROM cb_requests WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(request)
    }

    pub async fn set_status(&self, id: Uuid, status: &str) -> DbResult<bool> {
        let result = sqlx::query("UPDATE cb_requests SET status = $2 WHERE id = $1")
            .bind(id)
            .bind(status)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Bid-flow reservation re-check: one conditional UPDATE, zero rows
    /// means the reservation was superseded.
    pub async fn reserve_awarded_offer(&self, id: Uuid, offer: Uuid) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE cb_requests SET status = 'awarded'
            WHERE id = $1 AND awarded_offer = $2
              AND status IN ('open', 'accepted', 'awarded')
            "#,
        )
        .bind(id)
        .bind(offer)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn bulk_cancel(&self, ids: &[Uuid]) -> DbResult<u64> {
        let result = sqlx::query(
            "UPDATE cb_requests SET status = 'cancelled' WHERE id = ANY($1) AND status <> 'cancelled'",
        )
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
