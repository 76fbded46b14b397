//! Refunding held funds to the buyer
//!
//! Refunds may be partial. The gateway refund happens before the guarded
//! ledger update; the idempotency key binds the refund to the exact prior
//! state (amount refunded so far), so a concurrent duplicate collapses to
//! one gateway effect and the guarded update arbitrates who records it.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use coatbay_ledger::AuditEntry;
use coatbay_types::{
    CoatbayError, Hold, HoldId, Money, OfferStatus, PartyId, RequestStatus, Result,
};

use crate::actions::compute_actions;
use crate::engine::SettlementEngine;

/// Result of a refund that reached the gateway
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefundOutcome {
    pub refund_id: String,
    /// Amount refunded by this call
    pub amount: Money,
    /// Total refunded on the hold after this call, in minor units
    pub refunded_total: i64,
    /// Whether the hold is now fully refunded and terminal
    pub terminal: bool,
}

impl SettlementEngine {
    /// Refund part or all of a hold back to the buyer.
    ///
    /// Only the buyer may refund, and only inside the 28-day window. Passing
    /// `None` refunds the full remaining amount and terminates the hold.
    pub async fn refund_hold(
        &self,
        hold_id: HoldId,
        actor: PartyId,
        amount: Option<Money>,
        reason: Option<&str>,
    ) -> Result<RefundOutcome> {
        let hold = self
            .ledger
            .hold(hold_id)
            .await?
            .ok_or_else(|| CoatbayError::not_found("hold", hold_id))?;

        let party = self.party_of(&hold, actor)?;
        let offer = self
            .ledger
            .offer(hold.offer_id)
            .await?
            .ok_or_else(|| CoatbayError::not_found("offer", hold.offer_id))?;
        let request = self
            .ledger
            .request(hold.request_id)
            .await?
            .ok_or_else(|| CoatbayError::not_found("request", hold.request_id))?;

        let decision = compute_actions(&hold, &offer, &request, Utc::now())
            .for_party(party)
            .refund;
        if let Some(reason) = decision.blocked_reason() {
            return Err(CoatbayError::Forbidden { reason });
        }

        let reason = reason.unwrap_or("requested_by_buyer");
        self.refund_unchecked(&hold, Some(actor), amount, true, reason)
            .await
    }

    /// Refund the full remaining amount without a permission check; used by
    /// the scheduler's auto-refund sweep, which cancels the parent requests
    /// in bulk afterwards.
    pub async fn refund_whole(
        &self,
        hold: &Hold,
        actor: Option<PartyId>,
        reason: &str,
    ) -> Result<RefundOutcome> {
        self.refund_unchecked(hold, actor, None, false, reason).await
    }

    async fn refund_unchecked(
        &self,
        hold: &Hold,
        actor: Option<PartyId>,
        amount: Option<Money>,
        cancel_request: bool,
        reason: &str,
    ) -> Result<RefundOutcome> {
        let remaining = hold.net_gross();
        if !remaining.is_positive() {
            return Err(CoatbayError::NothingToRefund {
                hold_id: hold.id.to_string(),
            });
        }

        let amount = amount.unwrap_or(remaining);
        if amount.currency != hold.currency() {
            return Err(CoatbayError::CurrencyMismatch {
                expected: hold.currency().code().to_string(),
                actual: amount.currency.code().to_string(),
            });
        }
        if !amount.is_positive() {
            return Err(CoatbayError::InvalidAmount {
                reason: "refund amount must be positive".to_string(),
            });
        }
        if amount.cents > remaining.cents {
            return Err(CoatbayError::InvalidAmount {
                reason: format!(
                    "refund of {} exceeds remaining {}",
                    amount, remaining
                ),
            });
        }

        let charge_id = self.resolve_charge(hold).await?;

        let metadata: HashMap<String, String> = [
            ("hold_id".to_string(), hold.id.to_string()),
            ("offer_id".to_string(), hold.offer_id.to_string()),
            ("reason".to_string(), reason.to_string()),
        ]
        .into_iter()
        .collect();

        // The key encodes the prior refunded total, so two calls refunding
        // from the same state share one gateway effect, while a later
        // refund from an advanced state gets a fresh one.
        let key = format!(
            "refund:{}:{}:{}:{}",
            hold.id, hold.offer_id, amount.cents, hold.refunded_cents
        );
        let receipt = self
            .gateway
            .create_refund(&charge_id, amount, &key, metadata)
            .await?;

        let refunded_total = hold.refunded_cents + amount.cents;
        let terminal = refunded_total >= hold.amount.cents;
        let refunded_at = Utc::now();

        if !self
            .ledger
            .refund_hold_guarded(hold.id, refunded_total, terminal, refunded_at)
            .await?
        {
            // The gateway refund exists but the guarded update lost. If the
            // stored total already covers ours this was the concurrent twin
            // of the same refund; anything else needs an operator.
            let current = self
                .ledger
                .hold(hold.id)
                .await?
                .ok_or_else(|| CoatbayError::not_found("hold", hold.id))?;
            if current.refunded_cents >= refunded_total {
                return Ok(RefundOutcome {
                    refund_id: receipt.id,
                    amount,
                    refunded_total: current.refunded_cents,
                    terminal: current.refunded_at.is_some(),
                });
            }
            error!(hold = %hold.id, refund = %receipt.id,
                stored_refunded = current.refunded_cents, expected = refunded_total,
                "refund created but hold not updated; manual reconciliation required");
            return Err(CoatbayError::Reconciliation {
                hold_id: hold.id.to_string(),
                external_ref: receipt.id,
            });
        }

        if terminal {
            self.ledger
                .set_offer_status(hold.offer_id, OfferStatus::Refunded, None)
                .await?;
            if cancel_request {
                self.ledger
                    .set_request_status(hold.request_id, RequestStatus::Cancelled)
                    .await?;
            }
        }

        let audit = AuditEntry::new(
            "hold.refunded",
            Some(hold.id),
            actor,
            serde_json::json!({
                "refund_id": receipt.id,
                "amount_cents": amount.cents,
                "refunded_total_cents": refunded_total,
                "terminal": terminal,
                "currency": hold.currency().code(),
                "reason": reason,
            }),
        );
        if let Err(err) = self.ledger.append_audit(audit).await {
            warn!(hold = %hold.id, %err, "audit append failed after refund");
        }

        info!(hold = %hold.id, refund = %receipt.id, %amount, terminal, "hold refunded");
        Ok(RefundOutcome {
            refund_id: receipt.id,
            amount,
            refunded_total,
            terminal,
        })
    }

    /// The charge id is recorded at payment confirmation, but holds confirmed
    /// before that existed resolve it lazily from the intent and cache it.
    async fn resolve_charge(&self, hold: &Hold) -> Result<String> {
        if let Some(charge) = hold.charge_id.clone() {
            return Ok(charge);
        }
        let intent_id = hold.intent_id.as_deref().ok_or_else(|| {
            CoatbayError::StateConflict {
                entity: "hold",
                id: hold.id.to_string(),
                detail: "no payment intent to resolve a charge from".to_string(),
            }
        })?;
        let intent = self.gateway.retrieve_payment_intent(intent_id).await?;
        let charge = intent.charge_id.ok_or_else(|| CoatbayError::StateConflict {
            entity: "hold",
            id: hold.id.to_string(),
            detail: format!("intent {intent_id} has no charge"),
        })?;
        if !self.ledger.set_hold_charge(hold.id, &charge).await? {
            warn!(hold = %hold.id, "charge id already cached by a concurrent call");
        }
        Ok(charge)
    }
}
