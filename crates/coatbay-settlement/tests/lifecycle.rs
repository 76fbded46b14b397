//! Full settlement lifecycle against the in-memory ledger and mock gateway.

use std::sync::Arc;

use chrono::{Duration, Utc};

use coatbay_gateway::MockGateway;
use coatbay_ledger::{LedgerStore, MemoryLedger};
use coatbay_settlement::{
    EngineConfig, ProvisionedIntent, ReleaseOutcome, SettlementEngine,
};
use coatbay_types::{
    HoldStatus, Money, Offer, OfferStatus, PartyId, Request, RequestStatus, SellerProfile,
    TaxMode,
};

struct World {
    engine: SettlementEngine,
    ledger: MemoryLedger,
    gateway: Arc<MockGateway>,
    buyer: PartyId,
    request: Request,
    offer: Offer,
}

async fn world() -> World {
    let ledger = MemoryLedger::new();
    let gateway = Arc::new(MockGateway::new());
    let buyer = PartyId::new();
    let seller = PartyId::new();

    let request = Request::new(buyer, None);
    ledger.insert_request(&request).await.unwrap();
    let offer = Offer::new(
        request.id,
        seller,
        Money::eur(10_000),
        Money::eur(0),
        Utc::now() + Duration::hours(72),
    )
    .unwrap();
    ledger.insert_offer(&offer).await.unwrap();
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

    let engine = SettlementEngine::new(
        Arc::new(ledger.clone()),
        gateway.clone(),
        EngineConfig::default(),
    );
    World {
        engine,
        ledger,
        gateway,
        buyer,
        request,
        offer,
    }
}

async fn pay(w: &World) -> ProvisionedIntent {
    let provisioned = w
        .engine
        .accept_offer(w.request.id, w.offer.id, w.buyer)
        .await
        .unwrap();
    w.gateway.settle_intent(&provisioned.intent_id).await.unwrap();
    w.engine.confirm_payment(provisioned.hold_id).await.unwrap();
    provisioned
}

#[tokio::test]
async fn accept_pay_release_invoice() {
    let w = world().await;
    let provisioned = pay(&w).await;

    let hold = w.ledger.hold(provisioned.hold_id).await.unwrap().unwrap();
    assert_eq!(hold.status, HoldStatus::FundsHeld);
    assert!(hold.charge_id.is_some());

    let outcome = w
        .engine
        .release_hold(provisioned.hold_id, w.buyer)
        .await
        .unwrap();
    let (fee, payout) = match outcome {
        ReleaseOutcome::Released { fee, payout, .. } => (fee, payout),
        other => panic!("expected Released, got {other:?}"),
    };
    assert_eq!(fee.cents, 700);
    assert_eq!(fee.cents + payout.cents, 10_000);

    let first = w.engine.ensure_invoice(provisioned.hold_id).await.unwrap();
    let second = w.engine.ensure_invoice(provisioned.hold_id).await.unwrap();
    assert_eq!(first.id, second.id);
    assert_eq!(first.gross_cents, 700);
    assert_eq!(first.net_cents + first.vat_cents, first.gross_cents);
    assert_eq!(first.tax_mode, TaxMode::VatIncluded);

    // Transferred funds are out of reach for refunds.
    let err = w
        .engine
        .refund_hold(provisioned.hold_id, w.buyer, None, None)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "FORBIDDEN");
    assert_eq!(w.gateway.refund_effects().await, 0);
}

#[tokio::test]
async fn accept_pay_full_refund_cancels_everything() {
    let w = world().await;
    let provisioned = pay(&w).await;

    let outcome = w
        .engine
        .refund_hold(provisioned.hold_id, w.buyer, None, None)
        .await
        .unwrap();
    assert!(outcome.terminal);
    assert_eq!(outcome.refunded_total, 10_000);

    let hold = w.ledger.hold(provisioned.hold_id).await.unwrap().unwrap();
    assert_eq!(hold.status, HoldStatus::Refunded);
    let offer = w.ledger.offer(w.offer.id).await.unwrap().unwrap();
    assert_eq!(offer.status, OfferStatus::Refunded);
    let request = w.ledger.request(w.request.id).await.unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Cancelled);

    // A refunded hold can never be released.
    let err = w
        .engine
        .release_hold(provisioned.hold_id, w.buyer)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "FORBIDDEN");
    assert_eq!(w.gateway.transfer_effects().await, 0);
}

#[tokio::test]
async fn retried_acceptance_reuses_the_open_hold() {
    let w = world().await;
    let first = w
        .engine
        .accept_offer(w.request.id, w.offer.id, w.buyer)
        .await
        .unwrap();

    // A plain replay is rejected; the offer already left Active.
    let err = w
        .engine
        .accept_offer(w.request.id, w.offer.id, w.buyer)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "NOT_ACTIVE");

    // A retried flow (offer re-activated) lands on the same hold and intent.
    w.ledger
        .set_offer_status(w.offer.id, OfferStatus::Active, None)
        .await
        .unwrap();
    let second = w
        .engine
        .accept_offer(w.request.id, w.offer.id, w.buyer)
        .await
        .unwrap();
    assert_eq!(first.hold_id, second.hold_id);
    assert_eq!(first.intent_id, second.intent_id);
}
