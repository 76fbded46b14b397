//! Shared test fixture: a hold driven through accept, pay and confirm.

use std::sync::Arc;

use chrono::{Duration, Utc};

use coatbay_gateway::MockGateway;
use coatbay_ledger::{LedgerStore, MemoryLedger};
use coatbay_types::{HoldId, Money, Offer, PartyId, Request, SellerProfile};

use crate::engine::{EngineConfig, SettlementEngine};

pub(crate) struct Fixture {
    pub engine: SettlementEngine,
    pub ledger: MemoryLedger,
    pub gateway: Arc<MockGateway>,
    pub buyer: PartyId,
    pub seller: PartyId,
    pub request: Request,
    pub offer: Offer,
    pub hold_id: HoldId,
}

/// Happy path up to `funds_held`, with an onboarded domestic seller.
pub(crate) async fn paid_fixture(item_cents: i64) -> Fixture {
    paid_fixture_with_seller(item_cents, |seller| SellerProfile {
        party: seller,
        is_business: true,
        vat_id: Some("ATU12345678".to_string()),
        country: "AT".to_string(),
        payout_account_id: Some("acct_seller".to_string()),
        email: None,
    })
    .await
}

pub(crate) async fn paid_fixture_with_seller(
    item_cents: i64,
    profile: impl FnOnce(PartyId) -> SellerProfile,
) -> Fixture {
    let ledger = MemoryLedger::new();
    let gateway = Arc::new(MockGateway::new());
    let buyer = PartyId::new();
    let seller = PartyId::new();

    let request = Request::new(buyer, None);
    ledger.insert_request(&request).await.unwrap();
    let offer = Offer::new(
        request.id,
        seller,
        Money::eur(item_cents),
        Money::eur(0),
        Utc::now() + Duration::hours(72),
    )
    .unwrap();
    ledger.insert_offer(&offer).await.unwrap();
    ledger.insert_seller_profile(&profile(seller)).await.unwrap();
    gateway.add_account("acct_seller", true).await;

    let engine = SettlementEngine::new(
        Arc::new(ledger.clone()),
        gateway.clone(),
        EngineConfig::default(),
    );

    let provisioned = engine.accept_offer(request.id, offer.id, buyer).await.unwrap();
    gateway.settle_intent(&provisioned.intent_id).await.unwrap();
    engine.confirm_payment(provisioned.hold_id).await.unwrap();

    Fixture {
        engine,
        ledger,
        gateway,
        buyer,
        seller,
        request,
        offer,
        hold_id: provisioned.hold_id,
    }
}
