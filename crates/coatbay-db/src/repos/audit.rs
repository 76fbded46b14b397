//! Audit trail repository

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::DbResult;

pub struct AuditRepo {
    pool: PgPool,
}

impl AuditRepo {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn append(
        &self,
        id: Uuid,
        action: &str,
        hold_id: Option<Uuid>,
        actor: Option<Uuid>,
        detail: &serde_json::Value,
        at: DateTime<Utc>,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO cb_audit (id, action, hold_id, actor, detail, at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(id)
        .bind(action)
        .bind(hold_id)
        .bind(actor)
        .bind(detail)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
