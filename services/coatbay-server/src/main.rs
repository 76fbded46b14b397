//! Coatbay Settlement Server
//!
//! HTTP surface over the settlement engine: offer acceptance, hold actions,
//! release/refund, commission invoices, and an operator sweep trigger. A
//! background sweeper runs the same sweep on a fixed cadence.
//!
//! With `DEMO_MODE=1` the server runs against the in-memory ledger and mock
//! gateway so the binary works without PostgreSQL.

mod error;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tracing_subscriber::EnvFilter;

use coatbay_db::{Database, DatabaseConfig};
use coatbay_gateway::MockGateway;
use coatbay_ledger::{LedgerStore, MemoryLedger};
use coatbay_scheduler::SettlementSweeper;
use coatbay_settlement::{EngineConfig, SettlementEngine, TextRenderer};

use crate::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        "Starting Coatbay settlement server"
    );

    let demo_mode = env_flag("DEMO_MODE");
    let port: u16 = env_parsed("COATBAY_PORT", 8080)?;
    let sweep_interval_secs: u64 = env_parsed("COATBAY_SWEEP_INTERVAL_SECS", 300)?;

    let mut engine_config = EngineConfig::default();
    if let Ok(bps) = std::env::var("COATBAY_FEE_BPS") {
        engine_config.fee_rate_bps = bps.parse()?;
    }
    if let Ok(country) = std::env::var("COATBAY_PLATFORM_COUNTRY") {
        engine_config.platform_country = country;
    }

    let ledger: Arc<dyn LedgerStore> = if demo_mode {
        tracing::warn!("DEMO_MODE set: using in-memory ledger, all state is ephemeral");
        Arc::new(MemoryLedger::new())
    } else {
        let config = DatabaseConfig::from_env();
        let db = Database::connect(&config).await?;
        db.migrate().await?;
        if !db.health_check().await? {
            anyhow::bail!("database health check failed");
        }
        Arc::new(db.ledger())
    };

    // The gateway adapter is injected here; the mock stands in until a
    // processor-backed implementation is configured.
    let gateway = Arc::new(MockGateway::new());

    let engine = Arc::new(
        SettlementEngine::new(ledger.clone(), gateway, engine_config)
            .with_renderer(Arc::new(TextRenderer)),
    );
    let sweeper = Arc::new(SettlementSweeper::new(engine.clone(), ledger.clone()));

    tokio::spawn(
        sweeper
            .clone()
            .run_loop(Duration::from_secs(sweep_interval_secs)),
    );
    tracing::info!(every_secs = sweep_interval_secs, "settlement sweeper scheduled");

    let app = routes::create_router(Arc::new(AppState {
        engine,
        sweeper,
        ledger,
    }));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, demo_mode, "server listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

fn env_flag(name: &str) -> bool {
    matches!(
        std::env::var(name).as_deref(),
        Ok("1") | Ok("true") | Ok("yes")
    )
}

fn env_parsed<T: std::str::FromStr>(name: &str, default: T) -> anyhow::Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => Ok(raw.parse()?),
        Err(_) => Ok(default),
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("received Ctrl+C, shutting down"),
        _ = terminate => tracing::info!("received SIGTERM, shutting down"),
    }
}
