//! Action permission calculator
//!
//! Pure function of (hold, offer, request, now). Decides which of
//! {release, refund} each party may invoke right now, and carries a
//! machine-readable reason for every refusal so the consuming surface can
//! render precise guidance.

use chrono::{DateTime, Utc};
use serde::Serialize;

use coatbay_types::{Hold, Offer, OfferStatus, PayoutStatus, Request, RequestStatus};
use coatbay_windows::{deadline_anchor, refund_unlock_instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Party {
    Buyer,
    Seller,
}

/// Whether one party may perform one action, and if not, why.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum ActionDecision {
    Allowed,
    Blocked { reason: &'static str },
}

impl ActionDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ActionDecision::Allowed)
    }

    pub fn blocked_reason(&self) -> Option<&'static str> {
        match self {
            ActionDecision::Allowed => None,
            ActionDecision::Blocked { reason } => Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct PartyActions {
    pub release: ActionDecision,
    pub refund: ActionDecision,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ActionAvailability {
    pub buyer: PartyActions,
    pub seller: PartyActions,
    /// The instant at which the buyer's refund window closes and the
    /// seller's release window opens. Absent when the reference date is
    /// missing or invalid.
    pub unlock_at: Option<DateTime<Utc>>,
}

impl ActionAvailability {
    pub fn for_party(&self, party: Party) -> PartyActions {
        match party {
            Party::Buyer => self.buyer,
            Party::Seller => self.seller,
        }
    }

    fn all_blocked(reason: &'static str) -> Self {
        let blocked = PartyActions {
            release: ActionDecision::Blocked { reason },
            refund: ActionDecision::Blocked { reason },
        };
        Self {
            buyer: blocked,
            seller: blocked,
            unlock_at: None,
        }
    }
}

/// Compute which actions are available on a hold right now.
pub fn compute_actions(
    hold: &Hold,
    offer: &Offer,
    request: &Request,
    now: DateTime<Utc>,
) -> ActionAvailability {
    // Preconditions for any action at all.
    if hold.transfer_id.is_some() || hold.released_at.is_some() {
        return ActionAvailability::all_blocked("transfer_exists");
    }
    if hold.refunded_at.is_some() {
        return ActionAvailability::all_blocked("already_refunded");
    }
    if matches!(
        request.status,
        RequestStatus::Cancelled | RequestStatus::Archived | RequestStatus::Deleted
    ) {
        return ActionAvailability::all_blocked("job_final");
    }
    if offer.status != OfferStatus::Paid {
        return ActionAvailability::all_blocked("not_paid");
    }
    if offer.payout_status != PayoutStatus::Hold {
        return ActionAvailability::all_blocked("transfer_exists");
    }
    if hold.has_partial_refund() {
        return ActionAvailability::all_blocked("partial_refund_block");
    }

    let seller_refund = ActionDecision::Blocked {
        reason: "buyer_only",
    };

    match refund_unlock_instant(deadline_anchor(hold)) {
        // Missing or invalid reference date: fail conservatively. Only the
        // buyer may act; an auto-unlock from a corrupt date would hand the
        // seller a release they have not earned.
        None => ActionAvailability {
            buyer: PartyActions {
                release: ActionDecision::Allowed,
                refund: ActionDecision::Allowed,
            },
            seller: PartyActions {
                release: ActionDecision::Blocked {
                    reason: "invalid_reference_date",
                },
                refund: seller_refund,
            },
            unlock_at: None,
        },
        Some(unlock_at) if now < unlock_at => ActionAvailability {
            buyer: PartyActions {
                release: ActionDecision::Allowed,
                refund: ActionDecision::Allowed,
            },
            seller: PartyActions {
                release: ActionDecision::Blocked {
                    reason: "vendor_too_early",
                },
                refund: seller_refund,
            },
            unlock_at: Some(unlock_at),
        },
        Some(unlock_at) => ActionAvailability {
            buyer: PartyActions {
                release: ActionDecision::Allowed,
                refund: ActionDecision::Blocked {
                    reason: "customer_locked_after_28d",
                },
            },
            seller: PartyActions {
                release: ActionDecision::Allowed,
                refund: seller_refund,
            },
            unlock_at: Some(unlock_at),
        },
    }
}
