//! `LedgerStore` backed by PostgreSQL

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use coatbay_ledger::{AuditEntry, LedgerStore};
use coatbay_types::{
    Hold, HoldId, Invoice, Offer, OfferId, OfferStatus, PartyId, PayoutStatus, Request,
    RequestId, RequestStatus, Result, SellerProfile,
};

use crate::models::{DbHold, DbInvoice, DbOffer, DbRequest, DbSellerProfile};
use crate::repos::{AuditRepo, HoldRepo, InvoiceRepo, OfferRepo, RequestRepo, SellerRepo};

/// The production ledger store
pub struct PgLedger {
    requests: RequestRepo,
    offers: OfferRepo,
    holds: HoldRepo,
    invoices: InvoiceRepo,
    sellers: SellerRepo,
    audit: AuditRepo,
}

impl PgLedger {
    pub fn new(pool: PgPool) -> Self {
        Self {
            requests: RequestRepo::new(pool.clone()),
            offers: OfferRepo::new(pool.clone()),
            holds: HoldRepo::new(pool.clone()),
            invoices: InvoiceRepo::new(pool.clone()),
            sellers: SellerRepo::new(pool.clone()),
            audit: AuditRepo::new(pool),
        }
    }
}

#[async_trait::async_trait]
impl LedgerStore for PgLedger {
    async fn request(&self, id: RequestId) -> Result<Option<Request>> {
        self.requests
            .find(id.as_uuid())
            .await?
            .map(DbRequest::into_domain)
            .transpose()
    }

    async fn offer(&self, id: OfferId) -> Result<Option<Offer>> {
        self.offers
            .find(id.as_uuid())
            .await?
            .map(DbOffer::into_domain)
            .transpose()
    }

    async fn hold(&self, id: HoldId) -> Result<Option<Hold>> {
        self.holds
            .find(id.as_uuid())
            .await?
            .map(DbHold::into_domain)
            .transpose()
    }

    async fn invoice_for_hold(&self, hold: HoldId) -> Result<Option<Invoice>> {
        self.invoices
            .find_by_hold(hold.as_uuid())
            .await?
            .map(DbInvoice::into_domain)
            .transpose()
    }

    async fn seller_profile(&self, party: PartyId) -> Result<Option<SellerProfile>> {
        Ok(self
            .sellers
            .find(party.as_uuid())
            .await?
            .map(DbSellerProfile::into_domain))
    }

    async fn offers_for_request(&self, request: RequestId) -> Result<Vec<Offer>> {
        self.offers
            .find_by_request(request.as_uuid())
            .await?
            .into_iter()
            .map(DbOffer::into_domain)
            .collect()
    }

    async fn open_hold_for_offer(
        &self,
        offer: OfferId,
        buyer: PartyId,
    ) -> Result<Option<Hold>> {
        self.holds
            .find_open_for_offer(offer.as_uuid(), buyer.as_uuid())
            .await?
            .map(DbHold::into_domain)
            .transpose()
    }

    async fn insert_request(&self, request: &Request) -> Result<()> {
        Ok(self.requests.insert(&DbRequest::from_domain(request)).await?)
    }

    async fn insert_offer(&self, offer: &Offer) -> Result<()> {
        Ok(self.offers.insert(&DbOffer::from_domain(offer)).await?)
    }

    async fn insert_seller_profile(&self, profile: &SellerProfile) -> Result<()> {
        Ok(self
            .sellers
            .upsert(&DbSellerProfile::from_domain(profile))
            .await?)
    }

    async fn insert_hold(&self, hold: &Hold) -> Result<()> {
        Ok(self.holds.insert(&DbHold::from_domain(hold)).await?)
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> Result<()> {
        Ok(self.invoices.insert(&DbInvoice::from_domain(invoice)).await?)
    }

    async fn append_audit(&self, entry: AuditEntry) -> Result<()> {
        Ok(self
            .audit
            .append(
                entry.id,
                &entry.action,
                entry.hold_id.map(|h| h.as_uuid()),
                entry.actor.map(|a| a.as_uuid()),
                &entry.detail,
                entry.at,
            )
            .await?)
    }

    async fn accept_offer_guarded(&self, request: RequestId, offer: OfferId) -> Result<bool> {
        Ok(self
            .offers
            .accept_guarded(request.as_uuid(), offer.as_uuid())
            .await?)
    }

    async fn reserve_job_offer_guarded(
        &self,
        request: RequestId,
        offer: OfferId,
    ) -> Result<bool> {
        Ok(self
            .requests
            .reserve_awarded_offer(request.as_uuid(), offer.as_uuid())
            .await?)
    }

    async fn set_hold_intent(&self, hold: HoldId, intent_id: &str) -> Result<bool> {
        Ok(self.holds.set_intent(hold.as_uuid(), intent_id).await?)
    }

    async fn mark_hold_funds_held(&self, hold: HoldId, charge_id: &str) -> Result<bool> {
        Ok(self.holds.mark_funds_held(hold.as_uuid(), charge_id).await?)
    }

    async fn set_hold_charge(&self, hold: HoldId, charge_id: &str) -> Result<bool> {
        Ok(self.holds.set_charge(hold.as_uuid(), charge_id).await?)
    }

    async fn release_hold_guarded(
        &self,
        hold: HoldId,
        transfer_id: &str,
        fee_cents: i64,
        released_at: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .holds
            .release_guarded(hold.as_uuid(), transfer_id, fee_cents, released_at)
            .await?)
    }

    async fn refund_hold_guarded(
        &self,
        hold: HoldId,
        new_refunded_cents: i64,
        terminal: bool,
        refunded_at: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .holds
            .refund_guarded(hold.as_uuid(), new_refunded_cents, terminal, refunded_at)
            .await?)
    }

    async fn backfill_auto_refund_at(
        &self,
        hold: HoldId,
        deadline: DateTime<Utc>,
    ) -> Result<bool> {
        Ok(self
            .holds
            .backfill_auto_refund_at(hold.as_uuid(), deadline)
            .await?)
    }

    async fn mark_hold_shipped(&self, hold: HoldId, at: DateTime<Utc>) -> Result<bool> {
        Ok(self.holds.mark_shipped(hold.as_uuid(), at).await?)
    }

    async fn mark_hold_reported(&self, hold: HoldId, at: DateTime<Utc>) -> Result<bool> {
        Ok(self.holds.mark_reported(hold.as_uuid(), at).await?)
    }

    async fn set_request_status(
        &self,
        request: RequestId,
        status: RequestStatus,
    ) -> Result<bool> {
        Ok(self
            .requests
            .set_status(request.as_uuid(), status.as_str())
            .await?)
    }

    async fn set_offer_status(
        &self,
        offer: OfferId,
        status: OfferStatus,
        payout_status: Option<PayoutStatus>,
    ) -> Result<bool> {
        Ok(self
            .offers
            .set_status(
                offer.as_uuid(),
                status.as_str(),
                payout_status.map(|p| p.as_str()),
            )
            .await?)
    }

    async fn bulk_cancel_requests(&self, ids: &[RequestId]) -> Result<u64> {
        let raw: Vec<uuid::Uuid> = ids.iter().map(|id| id.as_uuid()).collect();
        Ok(self.requests.bulk_cancel(&raw).await?)
    }

    async fn holds_due_auto_refund(
        &self,
        now: DateTime<Utc>,
        legacy_cutoff: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Hold>> {
        self.holds
            .due_auto_refund(now, legacy_cutoff, limit as i64)
            .await?
            .into_iter()
            .map(DbHold::into_domain)
            .collect()
    }

    async fn holds_due_auto_release(
        &self,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Hold>> {
        self.holds
            .due_auto_release(now, limit as i64)
            .await?
            .into_iter()
            .map(DbHold::into_domain)
            .collect()
    }

    async fn holds_missing_auto_refund_deadline(&self, limit: usize) -> Result<Vec<Hold>> {
        self.holds
            .missing_auto_refund_deadline(limit as i64)
            .await?
            .into_iter()
            .map(DbHold::into_domain)
            .collect()
    }
}
