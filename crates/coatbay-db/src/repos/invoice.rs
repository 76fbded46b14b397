//! Invoice repository

use sqlx::PgPool;
use uuid::Uuid;

use crate::{DbInvoice, DbResult};

pub struct InvoiceRepo {
    pool: PgPool,
}

impl InvoiceRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// One invoice per hold, enforced by the unique index on `hold_id`. A
    /// concurrent duplicate insert is swallowed; the stored row wins.
    pub async fn insert(&self, invoice: &DbInvoice) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cb_invoices (id, hold_id, seller, buyer, currency, gross_cents,
                net_cents, vat_cents, fee_rate_bps, tax_mode, legal_note, document_ref,
                created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (hold_id) DO NOTHING
            "#,
        )
        .bind(invoice.id)
        .bind(invoice.hold_id)
        .bind(invoice.seller)
        .bind(invoice.buyer)
        .bind(&invoice.currency)
        .bind(invoice.gross_cents)
        .bind(invoice.net_cents)
        .bind(invoice.vat_cents)
        .bind(invoice.fee_rate_bps)
        .bind(&invoice.tax_mode)
        .bind(&invoice.legal_note)
        .bind(&invoice.document_ref)
        .bind(invoice.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn find_by_hold(&self, hold_id: Uuid) -> DbResult<Option<DbInvoice>> {
        let invoice =
            sqlx::query_as::<_, DbInvoice>("SELECT * FROM cb_invoices WHERE hold_id = $1")
                .bind(hold_id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(invoice)
    }
}
