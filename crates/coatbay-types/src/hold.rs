//! The Hold: the money-movement record
//!
//! A hold tracks a single payment from authorization through release or
//! refund. It reaches exactly one terminal state: once `transfer_id` is set
//! it can never be refunded, and once it is fully refunded it can never be
//! released.

use crate::{CoatbayError, Currency, HoldId, Money, OfferId, PartyId, RequestId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// What kind of purchase the hold settles; decides which timestamp anchors
/// the 28-day settlement windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldKind {
    /// Direct offer on a request; windows anchor on `reported_at`
    DirectOffer,
    /// Accepted bid on a posted job; windows anchor on `shipped_at`
    JobBid,
    /// Shop article purchase; windows anchor on hold creation
    ShopPurchase,
}

impl HoldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldKind::DirectOffer => "direct_offer",
            HoldKind::JobBid => "job_bid",
            HoldKind::ShopPurchase => "shop_purchase",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "direct_offer" => Ok(HoldKind::DirectOffer),
            "job_bid" => Ok(HoldKind::JobBid),
            "shop_purchase" => Ok(HoldKind::ShopPurchase),
            other => Err(CoatbayError::ledger(format!("unknown hold kind {other}"))),
        }
    }
}

/// Lifecycle of a hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldStatus {
    /// Created, awaiting buyer payment confirmation
    RequiresConfirmation,
    /// Buyer has paid; funds are platform-held
    FundsHeld,
    /// Terminal: funds transferred to the seller
    Released,
    /// Terminal: funds returned to the buyer in full
    Refunded,
}

impl HoldStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HoldStatus::RequiresConfirmation => "requires_confirmation",
            HoldStatus::FundsHeld => "funds_held",
            HoldStatus::Released => "released",
            HoldStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "requires_confirmation" => Ok(HoldStatus::RequiresConfirmation),
            "funds_held" => Ok(HoldStatus::FundsHeld),
            "released" => Ok(HoldStatus::Released),
            "refunded" => Ok(HoldStatus::Refunded),
            other => Err(CoatbayError::ledger(format!("unknown hold status {other}"))),
        }
    }
}

/// The money-movement record for one payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hold {
    pub id: HoldId,
    pub kind: HoldKind,
    pub buyer: PartyId,
    pub supplier: PartyId,
    pub request_id: RequestId,
    pub offer_id: OfferId,
    /// Amount originally authorized, in minor units
    pub amount: Money,
    pub status: HoldStatus,
    /// External payment-intent id, set once provisioning succeeds
    pub intent_id: Option<String>,
    /// External charge id, cached after the first gateway lookup
    pub charge_id: Option<String>,
    /// External transfer id; set exactly once, at release
    pub transfer_id: Option<String>,
    pub auto_release_at: Option<DateTime<Utc>>,
    pub auto_refund_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub reported_at: Option<DateTime<Utc>>,
    pub dispute_opened_at: Option<DateTime<Utc>>,
    /// Total refunded so far, in minor units of `amount.currency`
    pub refunded_cents: i64,
    /// Platform commission computed at creation (7% of amount)
    pub fee_cents: i64,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Hold {
    /// A hold is terminal once it has been released or fully refunded.
    pub fn is_terminal(&self) -> bool {
        self.released_at.is_some() || self.refunded_at.is_some()
    }

    /// Amount still in play: paid minus what was already refunded.
    pub fn net_gross(&self) -> Money {
        Money::new(self.amount.cents - self.refunded_cents, self.amount.currency)
    }

    pub fn currency(&self) -> Currency {
        self.amount.currency
    }

    /// Whether any partial refund has occurred without terminating the hold.
    pub fn has_partial_refund(&self) -> bool {
        self.refunded_cents > 0 && self.refunded_at.is_none()
    }
}
