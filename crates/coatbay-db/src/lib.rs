//! Coatbay Database Layer
//!
//! PostgreSQL persistence for the settlement engine. Each domain table has
//! its own repository over a shared `PgPool`; `PgLedger` assembles them into
//! the `LedgerStore` the settlement engine and scheduler run against.
//!
//! Every money-movement write is a single conditional UPDATE that restates
//! the expected prior state. No repository ever does SELECT-then-UPDATE.

pub mod config;
pub mod error;
pub mod ledger;
pub mod models;
pub mod repos;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::info;

pub use config::DatabaseConfig;
pub use error::{DbError, DbResult};
pub use ledger::PgLedger;
pub use models::*;
pub use repos::*;

/// Database connection pool
pub struct Database {
    /// PostgreSQL connection pool
    pub pg: PgPool,
}

impl Database {
    /// Connect to PostgreSQL
    pub async fn connect(config: &DatabaseConfig) -> DbResult<Self> {
        info!("Connecting to PostgreSQL: {}", config.postgres_url_masked());

        let pg = PgPoolOptions::new()
            .max_connections(config.pg_max_connections)
            .min_connections(config.pg_min_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.pg_acquire_timeout_secs))
            .connect(&config.postgres_url)
            .await
            .map_err(|e| DbError::Connection(format!("PostgreSQL: {}", e)))?;

        info!("Connected to PostgreSQL");

        Ok(Self { pg })
    }

    /// Run database migrations
    pub async fn migrate(&self) -> DbResult<()> {
        info!("Running database migrations...");
        sqlx::migrate!("./migrations")
            .run(&self.pg)
            .await
            .map_err(|e| DbError::Migration(e.to_string()))?;
        info!("Migrations complete");
        Ok(())
    }

    /// Health check for the database connection
    pub async fn health_check(&self) -> DbResult<bool> {
        let ok = sqlx::query("SELECT 1").fetch_one(&self.pg).await.is_ok();
        Ok(ok)
    }

    /// Create repository instances
    pub fn request_repo(&self) -> RequestRepo {
        RequestRepo::new(self.pg.clone())
    }

    pub fn offer_repo(&self) -> OfferRepo {
        OfferRepo::new(self.pg.clone())
    }

    pub fn hold_repo(&self) -> HoldRepo {
        HoldRepo::new(self.pg.clone())
    }

    pub fn invoice_repo(&self) -> InvoiceRepo {
        InvoiceRepo::new(self.pg.clone())
    }

    pub fn seller_repo(&self) -> SellerRepo {
        SellerRepo::new(self.pg.clone())
    }

    pub fn audit_repo(&self) -> AuditRepo {
        AuditRepo::new(self.pg.clone())
    }

    /// The `LedgerStore` implementation over this pool
    pub fn ledger(&self) -> PgLedger {
        PgLedger::new(self.pg.clone())
    }
}
