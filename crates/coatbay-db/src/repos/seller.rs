//! Seller profile repository

use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbSellerProfile, DbResult};

pub struct SellerRepo {
    pool: PgPool,
}

impl SellerRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn upsert(&self, profile: &DbSellerProfile) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cb_sellers (party, is_business, vat_id, country, payout_account_id, email)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (party) DO UPDATE SET
                is_business = EXCLUDED.is_business,
                vat_id = EXCLUDED.vat_id,
                country = EXCLUDED.country,
                payout_account_id = EXCLUDED.payout_account_id,
                email = EXCLUDED.email
            "#,
        )
        .bind(profile.party)
        .bind(profile.is_business)
        .bind(&profile.vat_id)
        .bind(&profile.country)
        .bind(&profile.payout_account_id)
        .bind(&profile.email)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find(&self, party: Uuid) -> DbResult<Option<DbSellerProfile>> {
        let profile =
            sqlx::query_as::<_, DbSellerProfile>("SELECT * FROM cb_sellers WHERE party = $1")
                .bind(party)
                .fetch_optional(&self.pool)
                .await?;
        Ok(profile)
    }
}
