//! Shared application state

use std::sync::Arc;

use coatbay_ledger::LedgerStore;
use coatbay_scheduler::SettlementSweeper;
use coatbay_settlement::SettlementEngine;

pub struct AppState {
    pub engine: Arc<SettlementEngine>,
    pub sweeper: Arc<SettlementSweeper>,
    pub ledger: Arc<dyn LedgerStore>,
}
