//! Coatbay Ledger Store - the transactional row store seam
//!
//! Every state-changing write is a guarded conditional update: "transition
//! row x only if it is still in the expected prior state, and report whether
//! a row actually changed". Zero rows affected means another actor already
//! made the transition; callers treat that as an idempotency or
//! reconciliation signal, never as a fresh failure to retry with side
//! effects.

pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use coatbay_types::{
    Hold, HoldId, Invoice, Offer, OfferId, OfferStatus, PartyId, PayoutStatus, Request,
    RequestId, RequestStatus, Result, SellerProfile,
};

pub use memory::MemoryLedger;

/// Best-effort audit row; its failure never rolls back the money movement
/// it describes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: Uuid,
    pub action: String,
    pub hold_id: Option<HoldId>,
    pub actor: Option<PartyId>,
    pub detail: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        action: impl Into<String>,
        hold_id: Option<HoldId>,
        actor: Option<PartyId>,
        detail: serde_json::Value,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: action.into(),
            hold_id,
            actor,
            detail,
            at: Utc::now(),
        }
    }
}

/// The ledger store seam
///
/// Implemented by `MemoryLedger` for tests/demo and by `coatbay-db`'s
/// `PgLedger` for production.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    // ------------------------------------------------------------------
    // Point reads
    // ------------------------------------------------------------------
    async fn request(&self, id: RequestId) -> Result<Option<Request>>;
    async fn offer(&self, id: OfferId) -> Result<Option<Offer>>;
    async fn hold(&self, id: HoldId) -> Result<Option<Hold>>;
    async fn invoice_for_hold(&self, hold: HoldId) -> Result<Option<Invoice>>;
    async fn seller_profile(&self, party: PartyId) -> Result<Option<SellerProfile>>;
    async fn offers_for_request(&self, request: RequestId) -> Result<Vec<Offer>>;

    /// The authoritative "is there already an open hold" read for intent
    /// reuse: a hold for this (offer, buyer) pair that is not terminal.
    async fn open_hold_for_offer(&self, offer: OfferId, buyer: PartyId)
        -> Result<Option<Hold>>;

    // ------------------------------------------------------------------
    // Inserts
    // ------------------------------------------------------------------
    async fn insert_request(&self, request: &Request) -> Result<()>;
    async fn insert_offer(&self, offer: &Offer) -> Result<()>;
    async fn insert_seller_profile(&self, profile: &SellerProfile) -> Result<()>;
    async fn insert_hold(&self, hold: &Hold) -> Result<()>;
    async fn insert_invoice(&self, invoice: &Invoice) -> Result<()>;
    async fn append_audit(&self, entry: AuditEntry) -> Result<()>;

    // ------------------------------------------------------------------
    // Guarded conditional writes
    // ------------------------------------------------------------------

    /// Accept one offer: the chosen offer moves to `accepted` only if it is
    /// still `active`; sibling active offers move to `declined`; the request
    /// moves to `accepted`. Returns whether the chosen offer transitioned.
    async fn accept_offer_guarded(&self, request: RequestId, offer: OfferId) -> Result<bool>;

    /// Bid-flow reservation check: succeeds only if the request still
    /// references exactly this offer and is still awaiting payment.
    async fn reserve_job_offer_guarded(&self, request: RequestId, offer: OfferId)
        -> Result<bool>;

    /// Attach the payment intent to a hold still awaiting one.
    async fn set_hold_intent(&self, hold: HoldId, intent_id: &str) -> Result<bool>;

    /// Payment confirmed: `requires_confirmation` → `funds_held`, charge
    /// attached.
    async fn mark_hold_funds_held(&self, hold: HoldId, charge_id: &str) -> Result<bool>;

    /// Cache a lazily-resolved charge id on a hold that has none yet.
    async fn set_hold_charge(&self, hold: HoldId, charge_id: &str) -> Result<bool>;

    /// Release: set transfer id, fee and released_at only if the hold is
    /// still `funds_held` with no transfer.
    async fn release_hold_guarded(
        &self,
        hold: HoldId,
        transfer_id: &str,
        fee_cents: i64,
        released_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Refund: raise the refunded amount (and terminate the hold when
    /// `terminal`), only if the hold is still `funds_held` with no transfer.
    async fn refund_hold_guarded(
        &self,
        hold: HoldId,
        new_refunded_cents: i64,
        terminal: bool,
        refunded_at: DateTime<Utc>,
    ) -> Result<bool>;

    /// Populate a missing auto-refund deadline; never disturbs a hold that
    /// already has one.
    async fn backfill_auto_refund_at(
        &self,
        hold: HoldId,
        deadline: DateTime<Utc>,
    ) -> Result<bool>;

    /// Record the ship/report timestamp on a hold that does not have it yet.
    async fn mark_hold_shipped(&self, hold: HoldId, at: DateTime<Utc>) -> Result<bool>;
    async fn mark_hold_reported(&self, hold: HoldId, at: DateTime<Utc>) -> Result<bool>;

    async fn set_request_status(&self, request: RequestId, status: RequestStatus)
        -> Result<bool>;

    async fn set_offer_status(
        &self,
        offer: OfferId,
        status: OfferStatus,
        payout_status: Option<PayoutStatus>,
    ) -> Result<bool>;

    /// Cancel many requests at once after an auto-refund sweep; returns how
    /// many rows changed.
    async fn bulk_cancel_requests(&self, ids: &[RequestId]) -> Result<u64>;

    // ------------------------------------------------------------------
    // Sweep queries (fixed-size pagination)
    // ------------------------------------------------------------------

    /// Holds eligible for the auto-refund sweep: funds held, unfulfilled
    /// (neither shipped nor reported), no transfer, charge present, and past
    /// `auto_refund_at` — or, for legacy rows without a deadline, created
    /// before `legacy_cutoff`.
    async fn holds_due_auto_refund(
        &self,
        now: DateTime<Utc>,
        legacy_cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Hold>>;

    /// Holds eligible for the auto-release sweep: funds held, no transfer,
    /// charge present, past `auto_release_at`.
    async fn holds_due_auto_release(&self, now: DateTime<Utc>, limit: usize)
        -> Result<Vec<Hold>>;

    /// Holds whose auto-refund deadline is still unset but whose anchoring
    /// timestamp has since arrived.
    async fn holds_missing_auto_refund_deadline(&self, limit: usize) -> Result<Vec<Hold>>;
}
