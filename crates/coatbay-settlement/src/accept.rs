//! Offer acceptance and payment-intent provisioning

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use coatbay_types::{
    CoatbayError, Hold, HoldId, HoldKind, HoldStatus, Offer, OfferId, OfferStatus, PartyId,
    Request, RequestId, Result,
};
use coatbay_windows::auto_release_deadline;

use crate::engine::SettlementEngine;

/// What the caller needs to let the buyer pay
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionedIntent {
    pub hold_id: HoldId,
    pub intent_id: String,
    pub client_secret: String,
}

impl SettlementEngine {
    /// Accept a direct offer on a request and provision its payment intent.
    pub async fn accept_offer(
        &self,
        request_id: RequestId,
        offer_id: OfferId,
        actor: PartyId,
    ) -> Result<ProvisionedIntent> {
        let (request, offer) = self.validate_acceptance(request_id, offer_id, actor).await?;
        self.apply_acceptance(&request, &offer).await?;
        self.provision_intent(&offer, actor, HoldKind::DirectOffer)
            .await
    }

    /// Accept a bid on a posted job. Identical to `accept_offer` except for
    /// the extra reservation re-check before any intent is created: if the
    /// job no longer references this exact offer, the reservation was
    /// superseded and the flow aborts before a charge can happen.
    pub async fn accept_job_bid(
        &self,
        request_id: RequestId,
        offer_id: OfferId,
        actor: PartyId,
    ) -> Result<ProvisionedIntent> {
        let (request, offer) = self.validate_acceptance(request_id, offer_id, actor).await?;
        self.apply_acceptance(&request, &offer).await?;

        if !self
            .ledger
            .reserve_job_offer_guarded(request_id, offer_id)
            .await?
        {
            warn!(request = %request_id, offer = %offer_id,
                "job offer reservation superseded, aborting before charge");
            return Err(CoatbayError::ReservationLost);
        }

        self.provision_intent(&offer, actor, HoldKind::JobBid).await
    }

    async fn validate_acceptance(
        &self,
        request_id: RequestId,
        offer_id: OfferId,
        actor: PartyId,
    ) -> Result<(Request, Offer)> {
        let request = self
            .ledger
            .request(request_id)
            .await?
            .ok_or_else(|| CoatbayError::not_found("request", request_id))?;
        if request.buyer != actor {
            return Err(CoatbayError::Forbidden {
                reason: "not_request_owner",
            });
        }

        let offer = self
            .ledger
            .offer(offer_id)
            .await?
            .ok_or_else(|| CoatbayError::not_found("offer", offer_id))?;
        if offer.request_id != request_id {
            return Err(CoatbayError::WrongRequest {
                offer_id: offer_id.to_string(),
                request_id: request_id.to_string(),
            });
        }
        if offer.supplier == actor {
            return Err(CoatbayError::SelfDealing);
        }
        if offer.status != OfferStatus::Active {
            return Err(CoatbayError::NotActive {
                offer_id: offer_id.to_string(),
            });
        }
        if offer.expires_at <= Utc::now() {
            return Err(CoatbayError::Expired {
                offer_id: offer_id.to_string(),
                expired_at: offer.expires_at.to_rfc3339(),
            });
        }

        Ok((request, offer))
    }

    async fn apply_acceptance(&self, request: &Request, offer: &Offer) -> Result<()> {
        if !self
            .ledger
            .accept_offer_guarded(request.id, offer.id)
            .await?
        {
            // Another call accepted this or a sibling offer first.
            return Err(CoatbayError::StateConflict {
                entity: "offer",
                id: offer.id.to_string(),
                detail: "offer is no longer active".to_string(),
            });
        }
        info!(request = %request.id, offer = %offer.id, "offer accepted, siblings declined");
        Ok(())
    }

    /// Reuse-or-create the hold and its payment intent. At most one
    /// non-terminal hold exists per (offer, buyer) pair: an existing open
    /// hold is authoritative and its intent is reused.
    async fn provision_intent(
        &self,
        offer: &Offer,
        buyer: PartyId,
        kind: HoldKind,
    ) -> Result<ProvisionedIntent> {
        let customer = self.gateway.ensure_customer(buyer, None).await?;

        let hold = match self.ledger.open_hold_for_offer(offer.id, buyer).await? {
            Some(existing) => existing,
            None => {
                let hold = self.new_hold(offer, buyer, kind);
                self.ledger.insert_hold(&hold).await?;
                info!(hold = %hold.id, offer = %offer.id, amount = %hold.amount,
                    "hold created awaiting payment");
                hold
            }
        };

        let metadata: HashMap<String, String> = [
            ("hold_id".to_string(), hold.id.to_string()),
            ("offer_id".to_string(), offer.id.to_string()),
            ("request_id".to_string(), offer.request_id.to_string()),
            ("customer".to_string(), customer),
        ]
        .into_iter()
        .collect();

        if let Some(intent_id) = hold.intent_id.clone() {
            // Reuse the existing intent, refreshing its metadata.
            self.gateway
                .update_intent_metadata(&intent_id, metadata)
                .await?;
            let intent = self.gateway.retrieve_payment_intent(&intent_id).await?;
            return Ok(ProvisionedIntent {
                hold_id: hold.id,
                intent_id,
                client_secret: intent.client_secret,
            });
        }

        // A gateway failure here leaves the hold in requires_confirmation
        // with no intent id: safely retryable, never a dangling bad intent.
        let intent = self
            .gateway
            .create_payment_intent(hold.amount, &format!("intent:{}", hold.id), metadata)
            .await?;

        if !self.ledger.set_hold_intent(hold.id, &intent.id).await? {
            // A concurrent provision won; its intent is the authoritative one.
            let current = self
                .ledger
                .hold(hold.id)
                .await?
                .ok_or_else(|| CoatbayError::not_found("hold", hold.id))?;
            if let Some(existing_id) = current.intent_id {
                let existing = self.gateway.retrieve_payment_intent(&existing_id).await?;
                return Ok(ProvisionedIntent {
                    hold_id: hold.id,
                    intent_id: existing_id,
                    client_secret: existing.client_secret,
                });
            }
            return Err(CoatbayError::StateConflict {
                entity: "hold",
                id: hold.id.to_string(),
                detail: "hold left requires_confirmation during provisioning".to_string(),
            });
        }

        Ok(ProvisionedIntent {
            hold_id: hold.id,
            intent_id: intent.id,
            client_secret: intent.client_secret,
        })
    }

    fn new_hold(&self, offer: &Offer, buyer: PartyId, kind: HoldKind) -> Hold {
        let created_at = Utc::now();
        let mut hold = Hold {
            id: HoldId::new(),
            kind,
            buyer,
            supplier: offer.supplier,
            request_id: offer.request_id,
            offer_id: offer.id,
            amount: offer.total,
            status: HoldStatus::RequiresConfirmation,
            intent_id: None,
            charge_id: None,
            transfer_id: None,
            auto_release_at: None,
            auto_refund_at: None,
            shipped_at: None,
            reported_at: None,
            dispute_opened_at: None,
            refunded_cents: 0,
            fee_cents: offer.total.at_bps(self.config.fee_rate_bps).cents,
            released_at: None,
            refunded_at: None,
            created_at,
        };
        hold.auto_release_at = Some(auto_release_deadline(&hold));
        hold.auto_refund_at = coatbay_windows::auto_refund_deadline(&hold);
        hold
    }
}
