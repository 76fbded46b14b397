//! Hold repository
//!
//! The money-movement guards live here. Each is one conditional UPDATE
//! restating the full prior-state predicate, never a read followed by a
//! write.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbHold, DbResult};

pub struct HoldRepo {
    pool: PgPool,
}

impl HoldRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, hold: &DbHold) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cb_holds (id, kind, buyer, supplier, request_id, offer_id,
                amount_cents, currency, status, intent_id, charge_id, transfer_id,
                auto_release_at, auto_refund_at, shipped_at, reported_at,
                dispute_opened_at, refunded_cents, fee_cents, released_at, refunded_at,
                created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12,
                $13, $14, $15, $16, $17, $18, $19, $20, $21, $22)
            "#,
        )
        .bind(hold.id)
        .bind(&hold.kind)
        .bind(hold.buyer)
        .bind(hold.supplier)
        .bind(hold.request_id)
        .bind(hold.offer_id)
        .bind(hold.amount_cents)
        .bind(&hold.currency)
        .bind(&hold.status)
        .bind(&hold.intent_id)
        .bind(&hold.charge_id)
        .bind(&hold.transfer_id)
        .bind(hold.auto_release_at)
        .bind(hold.auto_refund_at)
        .bind(hold.shipped_at)
        .bind(hold.reported_at)
        .bind(hold.dispute_opened_at)
        .bind(hold.refunded_cents)
        .bind(hold.fee_cents)
        .bind(hold.released_at)
        .bind(hold.refunded_at)
        .bind(hold.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find(&self, id: Uuid) -> DbResult<Option<DbHold>> {
        let hold = sqlx::query_as::<_, DbHold>("SELECT * FROM cb_holds WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(hold)
    }

    /// The one non-terminal hold for an (offer, buyer) pair, if any.
    pub async fn find_open_for_offer(
        &self,
        offer_id: Uuid,
        buyer: Uuid,
    ) -> DbResult<Option<DbHold>> {
        let hold = sqlx::query_as::<_, DbHold>(
            r#"
            SELECT * FROM cb_holds
            WHERE offer_id = $1 AND buyer = $2
              AND released_at IS NULL AND refunded_at IS NULL
            ORDER BY created_at
            LIMIT 1
            "#,
        )
        .bind(offer_id)
        .bind(buyer)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hold)
    }

    pub async fn set_intent(&self, id: Uuid, intent_id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE cb_holds SET intent_id = $2
            WHERE id = $1 AND status = 'requires_confirmation' AND intent_id IS NULL
            "#,
        )
        .bind(id)
        .bind(intent_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_funds_held(&self, id: Uuid, charge_id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE cb_holds SET status = 'funds_held', charge_id = $2
            WHERE id = $1 AND status = 'requires_confirmation' AND intent_id IS NOT NULL
            "#,
        )
        .bind(id)
        .bind(charge_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_charge(&self, id: Uuid, charge_id: &str) -> DbResult<bool> {
        let result =
            sqlx::query("UPDATE cb_holds SET charge_id = $2 WHERE id = $1 AND charge_id IS NULL")
                .bind(id)
                .bind(charge_id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn release_guarded(
        &self,
        id: Uuid,
        transfer_id: &str,
        fee_cents: i64,
        released_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE cb_holds
            SET status = 'released', transfer_id = $2, fee_cents = $3, released_at = $4
            WHERE id = $1 AND status = 'funds_held' AND transfer_id IS NULL
            "#,
        )
        .bind(id)
        .bind(transfer_id)
        .bind(fee_cents)
        .bind(released_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn refund_guarded(
        &self,
        id: Uuid,
        new_refunded_cents: i64,
        terminal: bool,
        refunded_at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE cb_holds
            SET refunded_cents = $2,
                status = CASE WHEN $3 THEN 'refunded' ELSE status END,
                refunded_at = CASE WHEN $3 THEN $4 ELSE refunded_at END
            WHERE id = $1 AND status = 'funds_held' AND transfer_id IS NULL
            "#,
        )
        .bind(id)
        .bind(new_refunded_cents)
        .bind(terminal)
        .bind(refunded_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn backfill_auto_refund_at(
        &self,
        id: Uuid,
        deadline: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE cb_holds SET auto_refund_at = $2
            WHERE id = $1 AND auto_refund_at IS NULL AND status = 'funds_held'
            "#,
        )
        .bind(id)
        .bind(deadline)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_shipped(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<bool> {
        let result =
            sqlx::query("UPDATE cb_holds SET shipped_at = $2 WHERE id = $1 AND shipped_at IS NULL")
                .bind(id)
                .bind(at)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn mark_reported(&self, id: Uuid, at: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE cb_holds SET reported_at = $2 WHERE id = $1 AND reported_at IS NULL",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn due_auto_refund(
        &self,
        now: DateTime<Utc>,
        legacy_cutoff: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<DbHold>> {
        let holds = sqlx::query_as::<_, DbHold>(
            r#"
            SELECT * FROM cb_holds
            WHERE status = 'funds_held'
              AND shipped_at IS NULL AND reported_at IS NULL
              AND transfer_id IS NULL AND charge_id IS NOT NULL
              AND ((auto_refund_at IS NOT NULL AND auto_refund_at <= $1)
                   OR (auto_refund_at IS NULL AND created_at < $2))
            ORDER BY created_at
            LIMIT $3
            "#,
        )
        .bind(now)
        .bind(legacy_cutoff)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(holds)
    }

    pub async fn due_auto_release(
        &self,
        now: DateTime<Utc>,
        limit: i64,
    ) -> DbResult<Vec<DbHold>> {
        let holds = sqlx::query_as::<_, DbHold>(
            r#"
            SELECT * FROM cb_holds
            WHERE status = 'funds_held'
              AND transfer_id IS NULL AND charge_id IS NOT NULL
              AND auto_release_at IS NOT NULL AND auto_release_at <= $1
            ORDER BY created_at
            LIMIT $2
            "#,
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(holds)
    }

    pub async fn missing_auto_refund_deadline(&self, limit: i64) -> DbResult<Vec<DbHold>> {
        let holds = sqlx::query_as::<_, DbHold>(
            r#"
            SELECT * FROM cb_holds
            WHERE status = 'funds_held' AND auto_refund_at IS NULL
              AND (shipped_at IS NOT NULL OR reported_at IS NOT NULL)
            ORDER BY created_at
            LIMIT $1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(holds)
    }
}
