//! Coatbay settlement sweeps
//!
//! Three passes over the open holds, in order:
//!   1. backfill auto-refund deadlines that became computable since the
//!      last run (the anchoring timestamp arrived after hold creation),
//!   2. force-refund unshipped holds whose deadline passed,
//!   3. release holds whose grace period elapsed, then invoice them.
//!
//! Every pass reads a fixed-size batch and treats each hold independently:
//! one failing hold is logged and counted, never aborts the sweep. All
//! money movement goes through the settlement engine, so a sweep racing a
//! manual action resolves exactly like two concurrent manual actions.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{info, warn};

use coatbay_ledger::{AuditEntry, LedgerStore};
use coatbay_settlement::SettlementEngine;
use coatbay_types::{CoatbayError, RequestId, Result};
use coatbay_windows::{auto_refund_deadline, LEGACY_FALLBACK_DAYS};

/// Holds processed per pass per run.
pub const DEFAULT_BATCH_SIZE: usize = 200;

/// What one sweep run did
#[derive(Debug, Default, Clone, Serialize)]
pub struct SweepReport {
    pub backfilled: u64,
    pub refunded: u64,
    pub released: u64,
    pub invoiced: u64,
    pub skipped_disputed: u64,
    pub skipped_unboarded: u64,
    pub failures: u64,
}

impl SweepReport {
    pub fn is_clean(&self) -> bool {
        self.failures == 0
    }
}

/// Periodic settlement sweeper
pub struct SettlementSweeper {
    engine: Arc<SettlementEngine>,
    ledger: Arc<dyn LedgerStore>,
    batch_size: usize,
}

impl SettlementSweeper {
    pub fn new(engine: Arc<SettlementEngine>, ledger: Arc<dyn LedgerStore>) -> Self {
        Self {
            engine,
            ledger,
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// One full sweep at the given instant.
    pub async fn run(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport::default();
        self.backfill_deadlines(&mut report).await?;
        self.refund_overdue(now, &mut report).await?;
        self.release_matured(now, &mut report).await?;
        info!(
            backfilled = report.backfilled,
            refunded = report.refunded,
            released = report.released,
            invoiced = report.invoiced,
            skipped_disputed = report.skipped_disputed,
            skipped_unboarded = report.skipped_unboarded,
            failures = report.failures,
            "settlement sweep finished"
        );
        Ok(report)
    }

    /// Run forever at a fixed cadence; a failing run is logged and the next
    /// tick proceeds normally.
    pub async fn run_loop(self: Arc<Self>, every: std::time::Duration) {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            if let Err(err) = self.run(Utc::now()).await {
                warn!(%err, "settlement sweep run failed");
            }
        }
    }

    /// Pass 1: holds created before their anchoring timestamp existed get
    /// their auto-refund deadline filled in once the anchor arrives.
    async fn backfill_deadlines(&self, report: &mut SweepReport) -> Result<()> {
        let missing = self
            .ledger
            .holds_missing_auto_refund_deadline(self.batch_size)
            .await?;
        for hold in missing {
            let Some(deadline) = auto_refund_deadline(&hold) else {
                continue;
            };
            if self.ledger.backfill_auto_refund_at(hold.id, deadline).await? {
                report.backfilled += 1;
            }
        }
        Ok(())
    }

    /// Pass 2: unshipped holds past their deadline (or, lacking one, older
    /// than the legacy fallback) are refunded in full and their requests
    /// cancelled in bulk.
    async fn refund_overdue(&self, now: DateTime<Utc>, report: &mut SweepReport) -> Result<()> {
        let legacy_cutoff = now - Duration::days(LEGACY_FALLBACK_DAYS);
        let due = self
            .ledger
            .holds_due_auto_refund(now, legacy_cutoff, self.batch_size)
            .await?;

        let mut cancelled: Vec<RequestId> = Vec::new();
        for hold in due {
            match self.engine.refund_whole(&hold, None, "auto_no_shipment").await {
                Ok(outcome) => {
                    report.refunded += 1;
                    if outcome.terminal {
                        cancelled.push(hold.request_id);
                    }
                    let audit = AuditEntry::new(
                        "hold.auto_refunded",
                        Some(hold.id),
                        None,
                        serde_json::json!({
                            "reason": "auto_no_shipment",
                            "refund_id": outcome.refund_id,
                            "amount_cents": outcome.amount.cents,
                        }),
                    );
                    if let Err(err) = self.ledger.append_audit(audit).await {
                        warn!(hold = %hold.id, %err, "audit append failed in refund sweep");
                    }
                }
                Err(CoatbayError::NothingToRefund { .. }) => {
                    // Raced a manual refund between the query and here.
                }
                Err(err) => {
                    report.failures += 1;
                    warn!(hold = %hold.id, %err, "auto-refund failed, skipping hold");
                }
            }
        }

        if !cancelled.is_empty() {
            let changed = self.ledger.bulk_cancel_requests(&cancelled).await?;
            info!(requests = cancelled.len(), changed, "cancelled requests after auto-refund");
        }
        Ok(())
    }

    /// Pass 3: holds past their auto-release deadline are released to the
    /// seller and invoiced. Open disputes freeze a hold in place.
    async fn release_matured(&self, now: DateTime<Utc>, report: &mut SweepReport) -> Result<()> {
        let due = self
            .ledger
            .holds_due_auto_release(now, self.batch_size)
            .await?;
        for hold in due {
            if hold.dispute_opened_at.is_some() {
                report.skipped_disputed += 1;
                continue;
            }
            let request = self.ledger.request(hold.request_id).await?;
            if request.is_some_and(|r| r.dispute_open) {
                report.skipped_disputed += 1;
                continue;
            }

            match self.engine.release_unchecked(&hold, None).await {
                Ok(_) => report.released += 1,
                Err(CoatbayError::SellerNotOnboarded { .. }) => {
                    // Stays held until the seller finishes onboarding.
                    report.skipped_unboarded += 1;
                    continue;
                }
                Err(err) => {
                    report.failures += 1;
                    warn!(hold = %hold.id, %err, "auto-release failed, skipping hold");
                    continue;
                }
            }

            // Invoicing is non-fatal: the hold is released either way and a
            // later run (or manual call) can produce the invoice.
            match self.engine.ensure_invoice(hold.id).await {
                Ok(_) => report.invoiced += 1,
                Err(err) => {
                    report.failures += 1;
                    warn!(hold = %hold.id, %err, "invoicing failed after auto-release");
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coatbay_gateway::MockGateway;
    use coatbay_ledger::MemoryLedger;
    use coatbay_settlement::EngineConfig;
    use coatbay_types::{
        Hold, HoldId, HoldKind, HoldStatus, Money, Offer, OfferStatus, PartyId, PayoutStatus,
        Request, RequestStatus, SellerProfile,
    };

    struct Fixture {
        sweeper: SettlementSweeper,
        ledger: MemoryLedger,
        gateway: Arc<MockGateway>,
        buyer: PartyId,
        seller: PartyId,
    }

    async fn fixture() -> Fixture {
        let ledger = MemoryLedger::new();
        let gateway = Arc::new(MockGateway::new());
        let buyer = PartyId::new();
        let seller = PartyId::new();

        ledger
            .insert_seller_profile(&SellerProfile {
                party: seller,
                is_business: true,
                vat_id: Some("ATU12345678".to_string()),
                country: "AT".to_string(),
                payout_account_id: Some("acct_seller".to_string()),
                email: None,
            })
            .await
            .unwrap();
        gateway.add_account("acct_seller", true).await;

        let engine = Arc::new(SettlementEngine::new(
            Arc::new(ledger.clone()),
            gateway.clone(),
            EngineConfig::default(),
        ));
        let sweeper = SettlementSweeper::new(engine, Arc::new(ledger.clone()));
        Fixture {
            sweeper,
            ledger,
            gateway,
            buyer,
            seller,
        }
    }

    /// A paid hold with its request and offer rows, seeded directly.
    async fn seed_hold(f: &Fixture, kind: HoldKind, age_days: i64) -> Hold {
        let mut request = Request::new(f.buyer, None);
        request.status = RequestStatus::Accepted;
        let offer = Offer::new(
            request.id,
            f.seller,
            Money::eur(10_000),
            Money::eur(0),
            Utc::now() + Duration::hours(72),
        )
        .unwrap();
        request.awarded_offer = Some(offer.id);
        f.ledger.insert_request(&request).await.unwrap();
        f.ledger.insert_offer(&offer).await.unwrap();
        f.ledger
            .set_offer_status(offer.id, OfferStatus::Paid, Some(PayoutStatus::Hold))
            .await
            .unwrap();

        let created_at = Utc::now() - Duration::days(age_days);
        let hold = Hold {
            id: HoldId::new(),
            kind,
            buyer: f.buyer,
            supplier: f.seller,
            request_id: request.id,
            offer_id: offer.id,
            amount: Money::eur(10_000),
            status: HoldStatus::FundsHeld,
            intent_id: Some("pi_1".to_string()),
            charge_id: Some("ch_1".to_string()),
            transfer_id: None,
            auto_release_at: None,
            auto_refund_at: None,
            shipped_at: None,
            reported_at: None,
            dispute_opened_at: None,
            refunded_cents: 0,
            fee_cents: 700,
            released_at: None,
            refunded_at: None,
            created_at,
        };
        f.ledger.insert_hold(&hold).await.unwrap();
        hold
    }

    #[tokio::test]
    async fn legacy_unshipped_hold_is_refunded_and_request_cancelled() {
        let f = fixture().await;
        let old = seed_hold(&f, HoldKind::JobBid, 8).await;
        let young = seed_hold(&f, HoldKind::JobBid, 3).await;

        let report = f.sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(report.refunded, 1);
        assert_eq!(report.failures, 0);

        let stored = f.ledger.hold(old.id).await.unwrap().unwrap();
        assert_eq!(stored.status, HoldStatus::Refunded);
        let request = f.ledger.request(old.request_id).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Cancelled);
        assert_eq!(f.gateway.refunded_on_charge("ch_1").await, 10_000);

        // The younger hold is inside the legacy fallback and untouched.
        let stored = f.ledger.hold(young.id).await.unwrap().unwrap();
        assert_eq!(stored.status, HoldStatus::FundsHeld);

        let audit = f.ledger.audit_entries().await;
        let auto = audit
            .iter()
            .find(|e| e.action == "hold.auto_refunded")
            .unwrap();
        assert_eq!(auto.detail["reason"], "auto_no_shipment");
        assert!(auto.actor.is_none());
    }

    #[tokio::test]
    async fn deadline_past_refund_beats_legacy_fallback() {
        let f = fixture().await;
        let mut hold = seed_hold(&f, HoldKind::ShopPurchase, 2).await;
        hold.auto_refund_at = Some(Utc::now() - Duration::hours(1));
        f.ledger.insert_hold(&hold).await.unwrap();

        let report = f.sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(report.refunded, 1);
    }

    #[tokio::test]
    async fn shipped_hold_gets_deadline_backfilled_not_refunded() {
        let f = fixture().await;
        let hold = seed_hold(&f, HoldKind::JobBid, 10).await;
        let shipped_at = Utc::now() - Duration::days(2);
        f.ledger.mark_hold_shipped(hold.id, shipped_at).await.unwrap();

        let report = f.sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(report.backfilled, 1);
        assert_eq!(report.refunded, 0);

        let stored = f.ledger.hold(hold.id).await.unwrap().unwrap();
        assert_eq!(
            stored.auto_refund_at,
            Some(shipped_at + Duration::days(28))
        );
        assert_eq!(stored.status, HoldStatus::FundsHeld);
    }

    #[tokio::test]
    async fn matured_hold_is_released_and_invoiced() {
        let f = fixture().await;
        let mut hold = seed_hold(&f, HoldKind::DirectOffer, 30).await;
        hold.reported_at = Some(Utc::now() - Duration::days(30));
        hold.auto_release_at = Some(Utc::now() - Duration::days(2));
        f.ledger.insert_hold(&hold).await.unwrap();

        let report = f.sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(report.released, 1);
        assert_eq!(report.invoiced, 1);
        assert_eq!(report.failures, 0);

        let stored = f.ledger.hold(hold.id).await.unwrap().unwrap();
        assert_eq!(stored.status, HoldStatus::Released);
        assert!(stored.transfer_id.is_some());
        assert!(f
            .ledger
            .invoice_for_hold(hold.id)
            .await
            .unwrap()
            .is_some());
        let request = f.ledger.request(hold.request_id).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Paid);
    }

    #[tokio::test]
    async fn open_dispute_freezes_auto_release() {
        let f = fixture().await;
        let mut hold = seed_hold(&f, HoldKind::DirectOffer, 30).await;
        hold.reported_at = Some(Utc::now() - Duration::days(30));
        hold.auto_release_at = Some(Utc::now() - Duration::days(2));
        f.ledger.insert_hold(&hold).await.unwrap();
        f.ledger.set_dispute(hold.request_id, true).await;

        let report = f.sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(report.released, 0);
        assert_eq!(report.skipped_disputed, 1);
        let stored = f.ledger.hold(hold.id).await.unwrap().unwrap();
        assert_eq!(stored.status, HoldStatus::FundsHeld);

        // Dispute resolved: the next run releases.
        f.ledger.set_dispute(hold.request_id, false).await;
        let report = f.sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(report.released, 1);
    }

    #[tokio::test]
    async fn unboarded_seller_is_skipped_and_retried_later() {
        let f = fixture().await;
        f.gateway.add_account("acct_seller", false).await;
        let mut hold = seed_hold(&f, HoldKind::DirectOffer, 30).await;
        hold.reported_at = Some(Utc::now() - Duration::days(30));
        hold.auto_release_at = Some(Utc::now() - Duration::days(2));
        f.ledger.insert_hold(&hold).await.unwrap();

        let report = f.sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(report.skipped_unboarded, 1);
        assert_eq!(report.released, 0);
        assert_eq!(report.failures, 0);

        f.gateway.add_account("acct_seller", true).await;
        let report = f.sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(report.released, 1);
    }

    #[tokio::test]
    async fn one_failing_hold_does_not_abort_the_batch() {
        let f = fixture().await;
        let mut a = seed_hold(&f, HoldKind::DirectOffer, 30).await;
        a.reported_at = Some(Utc::now() - Duration::days(30));
        a.auto_release_at = Some(Utc::now() - Duration::days(2));
        f.ledger.insert_hold(&a).await.unwrap();
        let mut b = seed_hold(&f, HoldKind::DirectOffer, 30).await;
        b.reported_at = Some(Utc::now() - Duration::days(30));
        b.auto_release_at = Some(Utc::now() - Duration::days(1));
        f.ledger.insert_hold(&b).await.unwrap();

        // First transfer attempt in the run times out.
        f.gateway.fail_next_transfer().await;

        let report = f.sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(report.released, 1);
        assert_eq!(report.failures, 1);

        // The failed hold is retried on the next run with the same key.
        let report = f.sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(report.released, 1);
        assert_eq!(f.gateway.transfer_effects().await, 2);
    }

    #[tokio::test]
    async fn batch_size_caps_each_pass() {
        let f = fixture().await;
        for _ in 0..3 {
            seed_hold(&f, HoldKind::JobBid, 10).await;
        }
        let sweeper = SettlementSweeper::new(
            Arc::new(SettlementEngine::new(
                Arc::new(f.ledger.clone()),
                f.gateway.clone(),
                EngineConfig::default(),
            )),
            Arc::new(f.ledger.clone()),
        )
        .with_batch_size(2);

        let report = sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(report.refunded, 2);
        let report = sweeper.run(Utc::now()).await.unwrap();
        assert_eq!(report.refunded, 1);
    }
}
