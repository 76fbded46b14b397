//! Coatbay Settlement Engine
//!
//! The rules governing how money moves from a buyer, through a
//! platform-held hold, to a seller (or back to the buyer): offer acceptance
//! and payment-intent provisioning, the action permission calculator,
//! the release and refund engines, and commission invoicing.
//!
//! The engine owns nothing global. It receives a `LedgerStore` and a
//! `PaymentGateway` at construction, so tests substitute the in-memory
//! ledger and the mock gateway.

pub mod accept;
pub mod actions;
pub mod engine;
pub mod invoice;
pub mod release;
pub mod refund;

#[cfg(test)]
pub(crate) mod testutil;

pub use accept::ProvisionedIntent;
pub use actions::{compute_actions, ActionAvailability, ActionDecision, Party, PartyActions};
pub use engine::{EngineConfig, SettlementEngine};
pub use invoice::{DocumentRenderer, TextRenderer};
pub use release::ReleaseOutcome;
pub use refund::RefundOutcome;
