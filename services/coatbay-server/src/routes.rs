//! Router and request handlers
//!
//! Handlers are thin: deserialize, call the engine, serialize. All policy
//! lives in the settlement crates.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::Method;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use serde::Deserialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use coatbay_scheduler::SweepReport;
use coatbay_settlement::{
    compute_actions, ActionAvailability, ProvisionedIntent, RefundOutcome, ReleaseOutcome,
};
use coatbay_types::{CoatbayError, HoldId, Invoice, Money, OfferId, PartyId, RequestId};

use crate::error::ApiResult;
use crate::state::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route(
            "/requests/:id/offers/:offer_id/accept",
            post(accept_offer),
        )
        .route("/jobs/:id/bids/:offer_id/accept", post(accept_job_bid))
        .route("/holds/:id/actions", get(hold_actions))
        .route("/holds/:id/release", post(release_hold))
        .route("/holds/:id/refund", post(refund_hold))
        .route("/holds/:id/invoice", get(get_invoice).post(ensure_invoice))
        .route("/settlement/sweep", post(run_sweep))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[derive(Debug, Deserialize)]
struct ActorBody {
    actor: PartyId,
}

#[derive(Debug, Deserialize)]
struct RefundBody {
    actor: PartyId,
    /// Omit for a full refund of the remaining amount.
    amount_cents: Option<i64>,
    /// Tagged onto the gateway refund and the audit row.
    reason: Option<String>,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "coatbay-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

async fn accept_offer(
    State(state): State<Arc<AppState>>,
    Path((request_id, offer_id)): Path<(RequestId, OfferId)>,
    Json(body): Json<ActorBody>,
) -> ApiResult<Json<ProvisionedIntent>> {
    let provisioned = state
        .engine
        .accept_offer(request_id, offer_id, body.actor)
        .await?;
    Ok(Json(provisioned))
}

async fn accept_job_bid(
    State(state): State<Arc<AppState>>,
    Path((request_id, offer_id)): Path<(RequestId, OfferId)>,
    Json(body): Json<ActorBody>,
) -> ApiResult<Json<ProvisionedIntent>> {
    let provisioned = state
        .engine
        .accept_job_bid(request_id, offer_id, body.actor)
        .await?;
    Ok(Json(provisioned))
}

async fn hold_actions(
    State(state): State<Arc<AppState>>,
    Path(hold_id): Path<HoldId>,
) -> ApiResult<Json<ActionAvailability>> {
    let hold = state
        .ledger
        .hold(hold_id)
        .await?
        .ok_or_else(|| CoatbayError::not_found("hold", hold_id))?;
    let offer = state
        .ledger
        .offer(hold.offer_id)
        .await?
        .ok_or_else(|| CoatbayError::not_found("offer", hold.offer_id))?;
    let request = state
        .ledger
        .request(hold.request_id)
        .await?
        .ok_or_else(|| CoatbayError::not_found("request", hold.request_id))?;

    Ok(Json(compute_actions(&hold, &offer, &request, Utc::now())))
}

async fn release_hold(
    State(state): State<Arc<AppState>>,
    Path(hold_id): Path<HoldId>,
    Json(body): Json<ActorBody>,
) -> ApiResult<Json<ReleaseOutcome>> {
    let outcome = state.engine.release_hold(hold_id, body.actor).await?;
    Ok(Json(outcome))
}

async fn refund_hold(
    State(state): State<Arc<AppState>>,
    Path(hold_id): Path<HoldId>,
    Json(body): Json<RefundBody>,
) -> ApiResult<Json<RefundOutcome>> {
    // A partial amount is denominated in the hold's own currency.
    let amount = match body.amount_cents {
        Some(cents) => {
            let hold = state
                .ledger
                .hold(hold_id)
                .await?
                .ok_or_else(|| CoatbayError::not_found("hold", hold_id))?;
            Some(Money::new(cents, hold.currency()))
        }
        None => None,
    };
    let outcome = state
        .engine
        .refund_hold(hold_id, body.actor, amount, body.reason.as_deref())
        .await?;
    Ok(Json(outcome))
}

async fn get_invoice(
    State(state): State<Arc<AppState>>,
    Path(hold_id): Path<HoldId>,
) -> ApiResult<Json<Invoice>> {
    let invoice = state
        .ledger
        .invoice_for_hold(hold_id)
        .await?
        .ok_or_else(|| CoatbayError::not_found("invoice", hold_id))?;
    Ok(Json(invoice))
}

async fn ensure_invoice(
    State(state): State<Arc<AppState>>,
    Path(hold_id): Path<HoldId>,
) -> ApiResult<Json<Invoice>> {
    let invoice = state.engine.ensure_invoice(hold_id).await?;
    Ok(Json(invoice))
}

async fn run_sweep(State(state): State<Arc<AppState>>) -> ApiResult<Json<SweepReport>> {
    let report = state.sweeper.run(Utc::now()).await?;
    Ok(Json(report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use chrono::Duration;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    use coatbay_gateway::MockGateway;
    use coatbay_ledger::{LedgerStore, MemoryLedger};
    use coatbay_scheduler::SettlementSweeper;
    use coatbay_settlement::{EngineConfig, SettlementEngine};
    use coatbay_types::{Money, Offer, Request, SellerProfile};

    struct TestApp {
        router: Router,
        ledger: MemoryLedger,
        gateway: Arc<MockGateway>,
        engine: Arc<SettlementEngine>,
        buyer: PartyId,
        seller: PartyId,
        request: Request,
        offer: Offer,
    }

    async fn test_app() -> TestApp {
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
                is_business: false,
                vat_id: None,
                country: "AT".to_string(),
                payout_account_id: Some("acct_seller".to_string()),
                email: None,
            })
            .await
            .unwrap();
        gateway.add_account("acct_seller", true).await;

        let shared: Arc<dyn LedgerStore> = Arc::new(ledger.clone());
        let engine = Arc::new(SettlementEngine::new(
            shared.clone(),
            gateway.clone(),
            EngineConfig::default(),
        ));
        let sweeper = Arc::new(SettlementSweeper::new(engine.clone(), shared.clone()));
        let state = Arc::new(AppState {
            engine: engine.clone(),
            sweeper,
            ledger: shared,
        });
        TestApp {
            router: create_router(state),
            ledger,
            gateway,
            engine,
            buyer,
            seller,
            request,
            offer,
        }
    }

    async fn call(router: &Router, method: &str, uri: &str, body: Option<serde_json::Value>) -> (StatusCode, serde_json::Value) {
        let request = match body {
            Some(json) => HttpRequest::builder()
                .method(method)
                .uri(uri)
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => HttpRequest::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        };
        let response = router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let json = if bytes.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, json)
    }

    #[tokio::test]
    async fn health_reports_service_name() {
        let app = test_app().await;
        let (status, body) = call(&app.router, "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "coatbay-server");
    }

    #[tokio::test]
    async fn accept_provisions_intent_over_http() {
        let app = test_app().await;
        let uri = format!(
            "/requests/{}/offers/{}/accept",
            app.request.id, app.offer.id
        );
        let (status, body) = call(
            &app.router,
            "POST",
            &uri,
            Some(serde_json::json!({ "actor": app.buyer })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert!(body["client_secret"].as_str().is_some());
        assert!(body["hold_id"].as_str().is_some());
    }

    #[tokio::test]
    async fn wrong_actor_maps_to_forbidden() {
        let app = test_app().await;
        let uri = format!(
            "/requests/{}/offers/{}/accept",
            app.request.id, app.offer.id
        );
        let (status, body) = call(
            &app.router,
            "POST",
            &uri,
            Some(serde_json::json!({ "actor": PartyId::new() })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["error"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn missing_hold_maps_to_not_found() {
        let app = test_app().await;
        let uri = format!("/holds/{}/actions", HoldId::new());
        let (status, body) = call(&app.router, "GET", &uri, None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn full_lifecycle_over_http() {
        let app = test_app().await;

        // Accept and pay.
        let uri = format!(
            "/requests/{}/offers/{}/accept",
            app.request.id, app.offer.id
        );
        let (_, accepted) = call(
            &app.router,
            "POST",
            &uri,
            Some(serde_json::json!({ "actor": app.buyer })),
        )
        .await;
        let hold_id: HoldId =
            serde_json::from_value(accepted["hold_id"].clone()).unwrap();
        let intent_id = accepted["intent_id"].as_str().unwrap().to_string();
        app.gateway.settle_intent(&intent_id).await.unwrap();
        app.engine.confirm_payment(hold_id).await.unwrap();

        // Both actions visible to the buyer before the unlock.
        let (status, actions) =
            call(&app.router, "GET", &format!("/holds/{hold_id}/actions"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(actions["buyer"]["release"]["decision"], "allowed");
        assert_eq!(actions["buyer"]["refund"]["decision"], "allowed");
        assert_eq!(
            actions["seller"]["refund"]["decision"], "blocked",
            "refund stays buyer-only"
        );

        // Buyer releases.
        let (status, released) = call(
            &app.router,
            "POST",
            &format!("/holds/{hold_id}/release"),
            Some(serde_json::json!({ "actor": app.buyer })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(released["Released"]["fee"]["cents"], 700);
        assert_eq!(released["Released"]["payout"]["cents"], 9_300);

        // Invoice can be ensured and then fetched.
        let (status, ensured) = call(
            &app.router,
            "POST",
            &format!("/holds/{hold_id}/invoice"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(ensured["gross_cents"], 700);

        let (status, fetched) = call(
            &app.router,
            "GET",
            &format!("/holds/{hold_id}/invoice"),
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(fetched["id"], ensured["id"]);

        // Refund after release is forbidden.
        let (status, refused) = call(
            &app.router,
            "POST",
            &format!("/holds/{hold_id}/refund"),
            Some(serde_json::json!({ "actor": app.buyer })),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(refused["error"], "FORBIDDEN");
    }

    #[tokio::test]
    async fn partial_refund_over_http() {
        let app = test_app().await;
        let uri = format!(
            "/requests/{}/offers/{}/accept",
            app.request.id, app.offer.id
        );
        let (_, accepted) = call(
            &app.router,
            "POST",
            &uri,
            Some(serde_json::json!({ "actor": app.buyer })),
        )
        .await;
        let hold_id: HoldId =
            serde_json::from_value(accepted["hold_id"].clone()).unwrap();
        let intent_id = accepted["intent_id"].as_str().unwrap().to_string();
        app.gateway.settle_intent(&intent_id).await.unwrap();
        app.engine.confirm_payment(hold_id).await.unwrap();

        let (status, refunded) = call(
            &app.router,
            "POST",
            &format!("/holds/{hold_id}/refund"),
            Some(serde_json::json!({ "actor": app.buyer, "amount_cents": 2_500 })),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(refunded["refunded_total"], 2_500);
        assert_eq!(refunded["terminal"], false);

        let hold = app.ledger.hold(hold_id).await.unwrap().unwrap();
        assert_eq!(hold.refunded_cents, 2_500);
    }

    #[tokio::test]
    async fn sweep_endpoint_returns_report() {
        let app = test_app().await;
        let (status, report) = call(&app.router, "POST", "/settlement/sweep", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["refunded"], 0);
        assert_eq!(report["released"], 0);
        assert_eq!(report["failures"], 0);
    }
}
