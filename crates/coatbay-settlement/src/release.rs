//! Releasing held funds to the seller
//!
//! The transfer is the point of no return: the gateway call happens first,
//! then the guarded ledger transition. If the guarded update matches no row
//! after a transfer was created, the transfer is never rolled back; the
//! result is either a benign idempotency replay (same transfer id already
//! recorded) or a loud reconciliation error for an operator.

use std::collections::HashMap;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use coatbay_ledger::AuditEntry;
use coatbay_types::{
    CoatbayError, Hold, HoldId, Money, OfferStatus, PartyId, PayoutStatus, RequestStatus,
    Result,
};

use crate::actions::{compute_actions, Party};
use crate::engine::SettlementEngine;

/// Result of a release attempt that did not error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ReleaseOutcome {
    /// Funds transferred to the seller by this call
    Released {
        transfer_id: String,
        fee: Money,
        payout: Money,
    },
    /// A previous call already released this hold; replayed as a no-op
    AlreadyReleased { transfer_id: String },
    /// Refunds consumed the full gross; there is nothing to transfer
    NothingToRelease,
}

impl SettlementEngine {
    /// Release a hold's net amount to the seller, minus the platform fee.
    ///
    /// `actor` must be the buyer or the seller of the hold; the permission
    /// calculator decides which of them may release right now.
    pub async fn release_hold(&self, hold_id: HoldId, actor: PartyId) -> Result<ReleaseOutcome> {
        let hold = self
            .ledger
            .hold(hold_id)
            .await?
            .ok_or_else(|| CoatbayError::not_found("hold", hold_id))?;

        // Idempotent replay: a hold that already carries a transfer is done.
        if let Some(transfer_id) = hold.transfer_id.clone() {
            return Ok(ReleaseOutcome::AlreadyReleased { transfer_id });
        }

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
            .release;
        if let Some(reason) = decision.blocked_reason() {
            return Err(CoatbayError::Forbidden { reason });
        }

        self.release_unchecked(&hold, Some(actor)).await
    }

    /// The transfer itself, shared between the manual path (after the
    /// permission check) and the scheduler's auto-release sweep (which has
    /// its own eligibility query).
    pub async fn release_unchecked(
        &self,
        hold: &Hold,
        actor: Option<PartyId>,
    ) -> Result<ReleaseOutcome> {
        // Fee and payout derive from the net gross so a (historic) partial
        // refund can never over-pay the seller.
        let net_gross = hold.net_gross();
        if !net_gross.is_positive() {
            info!(hold = %hold.id, "net gross exhausted by refunds, nothing to release");
            return Ok(ReleaseOutcome::NothingToRelease);
        }

        let seller = self
            .ledger
            .seller_profile(hold.supplier)
            .await?
            .ok_or_else(|| CoatbayError::not_found("seller profile", hold.supplier))?;
        let account = seller.payout_account_id.as_deref().ok_or_else(|| {
            CoatbayError::SellerNotOnboarded {
                seller: hold.supplier.to_string(),
            }
        })?;
        let status = self.gateway.retrieve_account(account).await?;
        if !status.payouts_enabled {
            return Err(CoatbayError::SellerNotOnboarded {
                seller: hold.supplier.to_string(),
            });
        }

        let fee = net_gross.at_bps(self.config.fee_rate_bps);
        let payout = net_gross.checked_sub(fee)?;
        if !payout.is_positive() {
            return Err(CoatbayError::PayoutZero {
                hold_id: hold.id.to_string(),
            });
        }

        let metadata: HashMap<String, String> = [
            ("hold_id".to_string(), hold.id.to_string()),
            ("offer_id".to_string(), hold.offer_id.to_string()),
            ("fee_cents".to_string(), fee.cents.to_string()),
        ]
        .into_iter()
        .collect();

        // One key per (hold, offer): any retry of this release, from any
        // caller, lands on the same gateway transfer.
        let key = format!("release:{}:{}", hold.id, hold.offer_id);
        let transfer = self
            .gateway
            .create_transfer(payout, account, &key, metadata)
            .await?;

        let released_at = Utc::now();
        if !self
            .ledger
            .release_hold_guarded(hold.id, &transfer.id, fee.cents, released_at)
            .await?
        {
            // The transfer exists but our guarded update lost. Re-read: if
            // the stored transfer is ours this was a concurrent replay of the
            // same release; anything else is an operator problem.
            let current = self
                .ledger
                .hold(hold.id)
                .await?
                .ok_or_else(|| CoatbayError::not_found("hold", hold.id))?;
            if current.transfer_id.as_deref() == Some(transfer.id.as_str()) {
                return Ok(ReleaseOutcome::AlreadyReleased {
                    transfer_id: transfer.id,
                });
            }
            error!(hold = %hold.id, transfer = %transfer.id,
                stored = ?current.transfer_id,
                "transfer created but hold left funds_held; manual reconciliation required");
            return Err(CoatbayError::Reconciliation {
                hold_id: hold.id.to_string(),
                external_ref: transfer.id,
            });
        }

        // Status propagation after the money moved; failures here are
        // re-driven by reads, never by repeating the transfer.
        self.ledger
            .set_offer_status(
                hold.offer_id,
                OfferStatus::Released,
                Some(PayoutStatus::Transferred),
            )
            .await?;
        self.ledger
            .set_request_status(hold.request_id, RequestStatus::Paid)
            .await?;

        let audit = AuditEntry::new(
            "hold.released",
            Some(hold.id),
            actor,
            serde_json::json!({
                "transfer_id": transfer.id,
                "fee_cents": fee.cents,
                "payout_cents": payout.cents,
                "currency": hold.currency().code(),
            }),
        );
        if let Err(err) = self.ledger.append_audit(audit).await {
            warn!(hold = %hold.id, %err, "audit append failed after release");
        }

        info!(hold = %hold.id, transfer = %transfer.id, %fee, %payout, "hold released");
        Ok(ReleaseOutcome::Released {
            transfer_id: transfer.id,
            fee,
            payout,
        })
    }

    pub(crate) fn party_of(&self, hold: &Hold, actor: PartyId) -> Result<Party> {
        if actor == hold.buyer {
            Ok(Party::Buyer)
        } else if actor == hold.supplier {
            Ok(Party::Seller)
        } else {
            Err(CoatbayError::Forbidden {
                reason: "not_a_hold_party",
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::EngineConfig;
    use crate::testutil::paid_fixture;
    use chrono::Duration;
    use coatbay_ledger::LedgerStore;

    #[tokio::test]
    async fn buyer_release_transfers_payout_minus_fee() {
        let f = paid_fixture(10_000).await;
        let outcome = f.engine.release_hold(f.hold_id, f.buyer).await.unwrap();

        let (fee, payout) = match outcome {
            ReleaseOutcome::Released { fee, payout, .. } => (fee, payout),
            other => panic!("expected Released, got {other:?}"),
        };
        assert_eq!(fee.cents, 700);
        assert_eq!(payout.cents, 9_300);

        let hold = f.ledger.hold(f.hold_id).await.unwrap().unwrap();
        assert!(hold.transfer_id.is_some());
        assert_eq!(hold.fee_cents, 700);
        assert!(hold.released_at.is_some());

        let offer = f.ledger.offer(f.offer.id).await.unwrap().unwrap();
        assert_eq!(offer.status, OfferStatus::Released);
        assert_eq!(offer.payout_status, PayoutStatus::Transferred);
        let request = f.ledger.request(f.request.id).await.unwrap().unwrap();
        assert_eq!(request.status, RequestStatus::Paid);
    }

    #[tokio::test]
    async fn second_release_replays_without_second_transfer() {
        let f = paid_fixture(10_000).await;
        let first = f.engine.release_hold(f.hold_id, f.buyer).await.unwrap();
        let first_id = match first {
            ReleaseOutcome::Released { transfer_id, .. } => transfer_id,
            other => panic!("expected Released, got {other:?}"),
        };

        let second = f.engine.release_hold(f.hold_id, f.buyer).await.unwrap();
        match second {
            ReleaseOutcome::AlreadyReleased { transfer_id } => {
                assert_eq!(transfer_id, first_id)
            }
            other => panic!("expected AlreadyReleased, got {other:?}"),
        }
        assert_eq!(f.gateway.transfer_effects().await, 1);
    }

    #[tokio::test]
    async fn release_retries_same_key_after_gateway_timeout() {
        let f = paid_fixture(10_000).await;
        f.gateway.fail_next_transfer().await;

        let err = f.engine.release_hold(f.hold_id, f.buyer).await.unwrap_err();
        assert!(err.is_retriable());
        // Nothing moved locally.
        let hold = f.ledger.hold(f.hold_id).await.unwrap().unwrap();
        assert!(hold.transfer_id.is_none());

        f.engine.release_hold(f.hold_id, f.buyer).await.unwrap();
        assert_eq!(f.gateway.transfer_effects().await, 1);
    }

    #[tokio::test]
    async fn seller_release_blocked_until_unlock() {
        let f = paid_fixture(10_000).await;
        // No report yet: reference date missing.
        let err = f.engine.release_hold(f.hold_id, f.seller).await.unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN");

        // Report 30 days in the past; seller window is open.
        f.ledger
            .mark_hold_reported(f.hold_id, Utc::now() - Duration::days(30))
            .await
            .unwrap();
        let outcome = f.engine.release_hold(f.hold_id, f.seller).await.unwrap();
        assert!(matches!(outcome, ReleaseOutcome::Released { .. }));
    }

    #[tokio::test]
    async fn outsider_cannot_release() {
        let f = paid_fixture(10_000).await;
        let err = f
            .engine
            .release_hold(f.hold_id, PartyId::new())
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN");
    }

    #[tokio::test]
    async fn unboarded_seller_blocks_release() {
        let f = paid_fixture(10_000).await;
        f.gateway.add_account("acct_seller", false).await;

        let err = f.engine.release_hold(f.hold_id, f.buyer).await.unwrap_err();
        assert_eq!(err.error_code(), "SELLER_NOT_ONBOARDED");
        let hold = f.ledger.hold(f.hold_id).await.unwrap().unwrap();
        assert!(hold.transfer_id.is_none());
    }

    #[tokio::test]
    async fn exhausted_gross_releases_nothing() {
        let f = paid_fixture(10_000).await;
        // Simulate a historic refund that consumed the full gross without
        // terminating the hold.
        f.ledger
            .refund_hold_guarded(f.hold_id, 10_000, false, Utc::now())
            .await
            .unwrap();

        // Partial refund blocks the permission path outright.
        let err = f.engine.release_hold(f.hold_id, f.buyer).await.unwrap_err();
        assert_eq!(err.error_code(), "FORBIDDEN");

        // The unchecked path (as the sweep would use) is a no-op success.
        let hold = f.ledger.hold(f.hold_id).await.unwrap().unwrap();
        let outcome = f.engine.release_unchecked(&hold, None).await.unwrap();
        assert!(matches!(outcome, ReleaseOutcome::NothingToRelease));
        assert_eq!(f.gateway.transfer_effects().await, 0);
    }

    #[tokio::test]
    async fn fee_swallowing_full_gross_is_rejected() {
        let f = paid_fixture(10_000).await;
        let engine = SettlementEngine::new(
            std::sync::Arc::new(f.ledger.clone()),
            f.gateway.clone(),
            EngineConfig {
                fee_rate_bps: 10_000,
                ..EngineConfig::default()
            },
        );

        let hold = f.ledger.hold(f.hold_id).await.unwrap().unwrap();
        let err = engine.release_unchecked(&hold, None).await.unwrap_err();
        assert_eq!(err.error_code(), "PAYOUT_ZERO");
        assert_eq!(f.gateway.transfer_effects().await, 0);
    }
}
