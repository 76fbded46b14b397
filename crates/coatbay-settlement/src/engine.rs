//! The settlement engine: injected collaborators and shared configuration

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::info;

use coatbay_gateway::{IntentStatus, PaymentGateway};
use coatbay_ledger::LedgerStore;
use coatbay_types::{
    CoatbayError, HoldId, HoldStatus, OfferStatus, PayoutStatus, Result,
};
use coatbay_windows::CalendarZone;

use crate::invoice::DocumentRenderer;

/// Engine-wide settlement parameters
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Platform commission rate in basis points (700 = 7%)
    pub fee_rate_bps: u32,
    /// VAT rate for domestic inclusive splits, in basis points (2000 = 20%)
    pub vat_rate_bps: u32,
    /// Country whose sellers get domestic VAT treatment
    pub platform_country: String,
    /// Zone for calendar-day evaluation
    pub zone: CalendarZone,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fee_rate_bps: 700,
            vat_rate_bps: 2_000,
            platform_country: "AT".to_string(),
            zone: CalendarZone::CentralEuropean,
        }
    }
}

/// The settlement engine
///
/// All operations run to completion within one call and are safe under
/// arbitrary concurrent invocation: every state change goes through the
/// ledger's guarded transitions, and every gateway effect carries a
/// deterministic idempotency key.
pub struct SettlementEngine {
    pub(crate) ledger: Arc<dyn LedgerStore>,
    pub(crate) gateway: Arc<dyn PaymentGateway>,
    pub(crate) renderer: Option<Arc<dyn DocumentRenderer>>,
    pub(crate) config: EngineConfig,
}

impl SettlementEngine {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        gateway: Arc<dyn PaymentGateway>,
        config: EngineConfig,
    ) -> Self {
        Self {
            ledger,
            gateway,
            renderer: None,
            config,
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn DocumentRenderer>) -> Self {
        self.renderer = Some(renderer);
        self
    }

    pub fn ledger(&self) -> Arc<dyn LedgerStore> {
        self.ledger.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Payment confirmation, driven by the gateway's webhook collaborator.
    ///
    /// Verifies the intent actually succeeded at the gateway, then applies
    /// the guarded `requires_confirmation` → `funds_held` transition and
    /// marks the offer paid. Re-delivered webhooks land on an already-held
    /// hold and degrade to a no-op.
    pub async fn confirm_payment(&self, hold_id: HoldId) -> Result<()> {
        let hold = self
            .ledger
            .hold(hold_id)
            .await?
            .ok_or_else(|| CoatbayError::not_found("hold", hold_id))?;

        if hold.status != HoldStatus::RequiresConfirmation {
            // Webhook re-delivery after the transition already happened.
            return Ok(());
        }

        let intent_id = hold.intent_id.as_deref().ok_or_else(|| {
            CoatbayError::StateConflict {
                entity: "hold",
                id: hold_id.to_string(),
                detail: "no payment intent provisioned".to_string(),
            }
        })?;

        let intent = self.gateway.retrieve_payment_intent(intent_id).await?;
        if intent.status != IntentStatus::Succeeded {
            return Err(CoatbayError::StateConflict {
                entity: "hold",
                id: hold_id.to_string(),
                detail: format!("intent {intent_id} has not succeeded"),
            });
        }
        let charge_id = intent.charge_id.as_deref().ok_or_else(|| {
            CoatbayError::gateway_transient("succeeded intent carries no charge yet")
        })?;

        if self.ledger.mark_hold_funds_held(hold_id, charge_id).await? {
            self.ledger
                .set_offer_status(hold.offer_id, OfferStatus::Paid, Some(PayoutStatus::Hold))
                .await?;
            info!(hold = %hold_id, charge = charge_id, "payment confirmed, funds held");
        }
        Ok(())
    }

    /// Seller reports shipment; anchors the job-bid settlement windows.
    pub async fn record_shipment(&self, hold_id: HoldId, at: DateTime<Utc>) -> Result<bool> {
        Ok(self.ledger.mark_hold_shipped(hold_id, at).await?)
    }

    /// Buyer/seller files the completion report; anchors the direct-offer
    /// settlement windows.
    pub async fn record_report(&self, hold_id: HoldId, at: DateTime<Utc>) -> Result<bool> {
        Ok(self.ledger.mark_hold_reported(hold_id, at).await?)
    }
}
