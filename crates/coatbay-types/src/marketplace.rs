//! Marketplace entities: requests and offers

use crate::{CoatbayError, Money, OfferId, PartyId, RequestId, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a buyer's request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Draft,
    Open,
    Accepted,
    Awarded,
    Paid,
    Cancelled,
    Archived,
    Deleted,
    Mediated,
}

impl RequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Draft => "draft",
            RequestStatus::Open => "open",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Awarded => "awarded",
            RequestStatus::Paid => "paid",
            RequestStatus::Cancelled => "cancelled",
            RequestStatus::Archived => "archived",
            RequestStatus::Deleted => "deleted",
            RequestStatus::Mediated => "mediated",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(RequestStatus::Draft),
            "open" => Ok(RequestStatus::Open),
            "accepted" => Ok(RequestStatus::Accepted),
            "awarded" => Ok(RequestStatus::Awarded),
            "paid" => Ok(RequestStatus::Paid),
            "cancelled" => Ok(RequestStatus::Cancelled),
            "archived" => Ok(RequestStatus::Archived),
            "deleted" => Ok(RequestStatus::Deleted),
            "mediated" => Ok(RequestStatus::Mediated),
            other => Err(CoatbayError::ledger(format!("unknown request status {other}"))),
        }
    }
}

/// A buyer's posted need or listed article
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub id: RequestId,
    pub buyer: PartyId,
    pub status: RequestStatus,
    pub published: bool,
    /// Agreed delivery date, drives offer expiry
    pub delivery_date: Option<NaiveDate>,
    /// The offer this request was awarded to, for bid-based flows
    pub awarded_offer: Option<OfferId>,
    /// Side-channel dispute flag carried on the request payload
    pub dispute_open: bool,
    pub created_at: DateTime<Utc>,
}

impl Request {
    pub fn new(buyer: PartyId, delivery_date: Option<NaiveDate>) -> Self {
        Self {
            id: RequestId::new(),
            buyer,
            status: RequestStatus::Open,
            published: true,
            delivery_date,
            awarded_offer: None,
            dispute_open: false,
            created_at: Utc::now(),
        }
    }
}

/// Lifecycle of a seller's offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfferStatus {
    Active,
    Selected,
    Accepted,
    Declined,
    Expired,
    Paid,
    Released,
    Refunded,
}

impl OfferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OfferStatus::Active => "active",
            OfferStatus::Selected => "selected",
            OfferStatus::Accepted => "accepted",
            OfferStatus::Declined => "declined",
            OfferStatus::Expired => "expired",
            OfferStatus::Paid => "paid",
            OfferStatus::Released => "released",
            OfferStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(OfferStatus::Active),
            "selected" => Ok(OfferStatus::Selected),
            "accepted" => Ok(OfferStatus::Accepted),
            "declined" => Ok(OfferStatus::Declined),
            "expired" => Ok(OfferStatus::Expired),
            "paid" => Ok(OfferStatus::Paid),
            "released" => Ok(OfferStatus::Released),
            "refunded" => Ok(OfferStatus::Refunded),
            other => Err(CoatbayError::ledger(format!("unknown offer status {other}"))),
        }
    }
}

/// Where the paid-out money currently sits for a paid offer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PayoutStatus {
    /// Funds are platform-held
    Hold,
    /// Funds have been transferred to the seller
    Transferred,
}

impl PayoutStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayoutStatus::Hold => "hold",
            PayoutStatus::Transferred => "transferred",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "hold" => Ok(PayoutStatus::Hold),
            "transferred" => Ok(PayoutStatus::Transferred),
            other => Err(CoatbayError::ledger(format!("unknown payout status {other}"))),
        }
    }
}

/// A seller's bid against a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Offer {
    pub id: OfferId,
    pub request_id: RequestId,
    pub supplier: PartyId,
    pub item: Money,
    pub shipping: Money,
    pub total: Money,
    pub status: OfferStatus,
    pub payout_status: PayoutStatus,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl Offer {
    /// Validates the business rules on amounts: total must equal
    /// item + shipping, shipping may not exceed half the item price, and
    /// the item amount must be positive.
    pub fn new(
        request_id: RequestId,
        supplier: PartyId,
        item: Money,
        shipping: Money,
        expires_at: DateTime<Utc>,
    ) -> Result<Self> {
        if !item.is_positive() {
            return Err(CoatbayError::InvalidAmount {
                reason: "offer item amount must be positive".to_string(),
            });
        }
        if shipping.cents < 0 {
            return Err(CoatbayError::InvalidAmount {
                reason: "offer shipping amount may not be negative".to_string(),
            });
        }
        if shipping.cents * 2 > item.cents {
            return Err(CoatbayError::InvalidAmount {
                reason: "shipping may not exceed half the item amount".to_string(),
            });
        }
        let total = item.checked_add(shipping)?;
        Ok(Self {
            id: OfferId::new(),
            request_id,
            supplier,
            item,
            shipping,
            total,
            status: OfferStatus::Active,
            payout_status: PayoutStatus::Hold,
            expires_at,
            created_at: Utc::now(),
        })
    }
}
