//! Offer repository

use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbOffer, DbResult};

pub struct OfferRepo {
    pool: PgPool,
}

impl OfferRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, offer: &DbOffer) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cb_offers (id, request_id, supplier, item_cents, shipping_cents,
                total_cents, currency, status, payout_status, expires_at, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(offer.id)
        .bind(offer.request_id)
        .bind(offer.supplier)
        .bind(offer.item_cents)
        .bind(offer.shipping_cents)
        .bind(offer.total_cents)
        .bind(&offer.currency)
        .bind(&offer.status)
        .bind(&offer.payout_status)
        .bind(offer.expires_at)
        .bind(offer.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find(&self, id: Uuid) -> DbResult<Option<DbOffer>> {
        let offer = sqlx::query_as::<_, DbOffer>("SELECT * FROM cb_offers WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(offer)
    }

    pub async fn find_by_request(&self, request_id: Uuid) -> DbResult<Vec<DbOffer>> {
        let offers = sqlx::query_as::<_, DbOffer>(
            "SELECT * FROM cb_offers WHERE request_id = $1 ORDER BY created_at",
        )
        .bind(request_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(offers)
    }

    /// Accept one offer and decline its active siblings, atomically. The
    /// chosen offer's `active -> accepted` transition is the guard; if it
    /// affects zero rows the whole transaction is a no-op.
    pub async fn accept_guarded(&self, request_id: Uuid, offer_id: Uuid) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        let accepted = sqlx::query(
            "UPDATE cb_offers SET status = 'accepted' WHERE id = $1 AND status = 'active'",
        )
        .bind(offer_id)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            > 0;
        if !accepted {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query(
            r#"
            UPDATE cb_offers SET status = 'declined'
            WHERE request_id = $1 AND id <> $2 AND status = 'active'
            "#,
        )
        .bind(request_id)
        .bind(offer_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "UPDATE cb_requests SET status = 'accepted', awarded_offer = $2 WHERE id = $1",
        )
        .bind(request_id)
        .bind(offer_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(true)
    }

    pub async fn set_status(
        &self,
        id: Uuid,
        status: &str,
        payout_status: Option<&str>,
    ) -> DbResult<bool> {
        let result = match payout_status {
            Some(payout) => {
                sqlx::query("UPDATE cb_offers SET status = $2, payout_status = $3 WHERE id = $1")
                    .bind(id)
                    .bind(status)
                    .bind(payout)
                    .execute(&self.pool)
                    .await?
            }
            None => {
                sqlx::query("UPDATE cb_offers SET status = $2 WHERE id = $1")
                    .bind(id)
                    .bind(status)
                    .execute(&self.pool)
                    .await?
            }
        };
        Ok(result.rows_affected() > 0)
    }
}
