//! In-memory ledger store
//!
//! Backs the engine and scheduler tests and the server's demo mode. Guard
//! semantics are identical to the SQL implementation: a write that finds the
//! row in an unexpected state changes nothing and reports `false`.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use coatbay_types::{
    Hold, HoldId, HoldStatus, Invoice, Offer, OfferId, OfferStatus, PartyId, PayoutStatus,
    Request, RequestId, RequestStatus, Result, SellerProfile,
};

use crate::{AuditEntry, LedgerStore};

#[derive(Default)]
struct Tables {
    requests: HashMap<RequestId, Request>,
    offers: HashMap<OfferId, Offer>,
    holds: HashMap<HoldId, Hold>,
    invoices: HashMap<HoldId, Invoice>,
    sellers: HashMap<PartyId, SellerProfile>,
    audit: Vec<AuditEntry>,
}

/// In-memory `LedgerStore`
#[derive(Default, Clone)]
pub struct MemoryLedger {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: flip the dispute flag on a request.
    pub async fn set_dispute(&self, request: RequestId, open: bool) {
        if let Some(r) = self.tables.write().await.requests.get_mut(&request) {
            r.dispute_open = open;
        }
    }

    /// Test helper: the audit trail so far.
    pub async fn audit_entries(&self) -> Vec<AuditEntry> {
        self.tables.read().await.audit.clone()
    }
}

#[async_trait::async_trait]
impl LedgerStore for MemoryLedger {
    async fn request(&self, id: RequestId) -> Result<Option<Request>> {
        Ok(self.tables.read().await.requests.get(&id).cloned())
    }

    async fn offer(&self, id: OfferId) -> Result<Option<Offer>> {
        Ok(self.tables.read().await.offers.get(&id).cloned())
    }

    async fn hold(&self, id: HoldId) -> Result<Option<Hold>> {
        Ok(self.tables.read().await.holds.get(&id).cloned())
    }

    async fn invoice_for_hold(&self, hold: HoldId) -> Result<Option<Invoice>> {
        Ok(self.tables.read().await.invoices.get(&hold).cloned())
    }

    async fn seller_profile(&self, party: PartyId) -> Result<Option<SellerProfile>> {
        Ok(self.tables.read().await.sellers.get(&party).cloned())
    }

    async fn offers_for_request(&self, request: RequestId) -> Result<Vec<Offer>> {
        let tables = self.tables.read().await;
        let mut offers: Vec<Offer> = tables
            .offers
            .values()
            .filter(|o| o.request_id == request)
            .cloned()
            .collect();
        offers.sort_by_key(|o| o.created_at);
        Ok(offers)
    }

    async fn open_hold_for_offer(
        &self,
        offer: OfferId,
        buyer: PartyId,
    ) -> Result<Option<Hold>> {
        let tables = self.tables.read().await;
        Ok(tables
            .holds
            .values()
            .find(|h| h.offer_id == offer && h.buyer == buyer && !h.is_terminal())
            .cloned())
    }

    async fn insert_request(&self, request: &Request) -> Result<()> {
        self.tables
            .write()
            .await
            .requests
            .insert(request.id, request.clone());
        Ok(())
    }

    async fn insert_offer(&self, offer: &Offer) -> Result<()> {
        self.tables
            .write()
            .await
            .offers
            .insert(offer.id, offer.clone());
        Ok(())
    }

    async fn insert_seller_profile(&self, profile: &SellerProfile) -> Result<()> {
        self.tables
            .write()
            .await
            .sellers
            .insert(profile.party, profile.clone());
        Ok(())
    }

    async fn insert_hold(&self, hold: &Hold) -> Result<()> {
        self.tables.write().await.holds.insert(hold.id, hold.clone());
        Ok(())
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<()> {
        self.tables
            .write()
            .await
            .invoices
            .insert(invoice.hold_id, invoice.clone());
        Ok(())
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<()> {
        self.tables.write().await.audit.push(entry);
        Ok(())
    }

    async fn accept_offer_guarded(&self, request: RequestId, offer: OfferId) -> Result<bool> {
        let mut tables = self.tables.write().await;

        let transitioned = match tables.offers.get_mut(&offer) {
            Some(o) if o.status == OfferStatus::Active => {
                o.status = OfferStatus::Accepted;
                true
            }
            _ => false,
        };
        if !transitioned {
            return Ok(false);
        }

        for sibling in tables.offers.values_mut() {
            if sibling.request_id == request
                && sibling.id != offer
                && sibling.status == OfferStatus::Active
            {
                sibling.status = OfferStatus::Declined;
            }
        }
        if let Some(r) = tables.requests.get_mut(&request) {
            r.status = RequestStatus::Accepted;
            r.awarded_offer = Some(offer);
        }
        Ok(true)
    }

    async fn reserve_job_offer_guarded(
        &self,
        request: RequestId,
        offer: OfferId,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.requests.get_mut(&request) {
            Some(r)
                if r.awarded_offer == Some(offer)
                    && matches!(
                        r.status,
                        RequestStatus::Open | RequestStatus::Accepted | RequestStatus::Awarded
                    ) =>
            {
                r.status = RequestStatus::Awarded;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_hold_intent(&self, hold: HoldId, intent_id: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.holds.get_mut(&hold) {
            Some(h)
                if h.status == HoldStatus::RequiresConfirmation && h.intent_id.is_none() =>
            {
                h.intent_id = Some(intent_id.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_hold_funds_held(&self, hold: HoldId, charge_id: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.holds.get_mut(&hold) {
            Some(h)
                if h.status == HoldStatus::RequiresConfirmation && h.intent_id.is_some() =>
            {
                h.status = HoldStatus::FundsHeld;
                h.charge_id = Some(charge_id.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_hold_charge(&self, hold: HoldId, charge_id: &str) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.holds.get_mut(&hold) {
            Some(h) if h.charge_id.is_none() => {
                h.charge_id = Some(charge_id.to_string());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn release_hold_guarded(
        &self,
        hold: HoldId,
        transfer_id: &str,
        fee_cents: i64,
        released_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.holds.get_mut(&hold) {
            Some(h) if h.status == HoldStatus::FundsHeld && h.transfer_id.is_none() => {
                h.status = HoldStatus::Released;
                h.transfer_id = Some(transfer_id.to_string());
                h.fee_cents = fee_cents;
                h.released_at = Some(released_at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn refund_hold_guarded(
        &self,
        hold: HoldId,
        new_refunded_cents: i64,
        terminal: bool,
        refunded_at: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.holds.get_mut(&hold) {
            Some(h) if h.status == HoldStatus::FundsHeld && h.transfer_id.is_none() => {
                h.refunded_cents = new_refunded_cents;
                if terminal {
                    h.status = HoldStatus::Refunded;
                    h.refunded_at = Some(refunded_at);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn backfill_auto_refund_at(
        &self,
        hold: HoldId,
        deadline: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.holds.get_mut(&hold) {
            Some(h) if h.auto_refund_at.is_none() && h.status == HoldStatus::FundsHeld => {
                h.auto_refund_at = Some(deadline);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_hold_shipped(&self, hold: HoldId, at: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.holds.get_mut(&hold) {
            Some(h) if h.shipped_at.is_none() => {
                h.shipped_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_hold_reported(&self, hold: HoldId, at: DateTime<Utc>) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.holds.get_mut(&hold) {
            Some(h) if h.reported_at.is_none() => {
                h.reported_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_request_status(
        &self,
        request: RequestId,
        status: RequestStatus,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.requests.get_mut(&request) {
            Some(r) => {
                r.status = status;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn set_offer_status(
        &self,
        offer: OfferId,
        status: OfferStatus,
        payout_status: Option<PayoutStatus>,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        match tables.offers.get_mut(&offer) {
            Some(o) => {
                o.status = status;
                if let Some(p) = payout_status {
                    o.payout_status = p;
                }
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn bulk_cancel_requests(&self, ids: &[RequestId]) -> Result<u64> {
        let mut tables = self.tables.write().await;
        let mut changed = 0;
        for id in ids {
            if let Some(r) = tables.requests.get_mut(id) {
                if r.status != RequestStatus::Cancelled {
                    r.status = RequestStatus::Cancelled;
                    changed += 1;
                }
            }
        }
        Ok(changed)
    }

    async fn holds_due_auto_refund(
        &self,
        now: DateTime<Utc>,
        legacy_cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Hold>> {
        let tables = self.tables.read().await;
        let mut due: Vec<Hold> = tables
            .holds
            .values()
            .filter(|h| {
                h.status == HoldStatus::FundsHeld
                    && h.shipped_at.is_none()
                    && h.reported_at.is_none()
                    && h.transfer_id.is_none()
                    && h.charge_id.is_some()
                    && match h.auto_refund_at {
                        Some(deadline) => deadline <= now,
                        None => h.created_at < legacy_cutoff,
                    }
            })
            .cloned()
            .collect();
        due.sort_by_key(|h| h.created_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn holds_due_auto_release(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Hold>> {
        let tables = self.tables.read().await;
        let mut due: Vec<Hold> = tables
            .holds
            .values()
            .filter(|h| {
                h.status == HoldStatus::FundsHeld
                    && h.transfer_id.is_none()
                    && h.charge_id.is_some()
                    && h.auto_release_at.is_some_and(|deadline| deadline <= now)
            })
            .cloned()
            .collect();
        due.sort_by_key(|h| h.created_at);
        due.truncate(limit);
        Ok(due)
    }

    async fn holds_missing_auto_refund_deadline(&self, limit: usize) -> Result<Vec<Hold>> {
        let tables = self.tables.read().await;
        let mut missing: Vec<Hold> = tables
            .holds
            .values()
            .filter(|h| {
                h.status == HoldStatus::FundsHeld
                    && h.auto_refund_at.is_none()
                    && (h.shipped_at.is_some() || h.reported_at.is_some())
            })
            .cloned()
            .collect();
        missing.sort_by_key(|h| h.created_at);
        missing.truncate(limit);
        Ok(missing)
    }
}
