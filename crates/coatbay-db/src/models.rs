//! Database models - mapped from PostgreSQL tables
//!
//! Statuses are stored as their canonical snake_case strings; amounts are
//! integer minor units. Conversion into the domain types validates both.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use coatbay_types::{
    Currency, Hold, HoldKind, HoldStatus, Invoice, Money, Offer, OfferStatus, PayoutStatus,
    Request, RequestStatus, Result, SellerProfile, TaxMode,
};

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbRequest {
    pub id: Uuid,
    pub buyer: Uuid,
    pub status: String,
    pub published: bool,
    pub delivery_date: Option<NaiveDate>,
    pub awarded_offer: Option<Uuid>,
    pub dispute_open: bool,
    pub created_at: DateTime<Utc>,
}

impl DbRequest {
    pub fn from_domain(r: &Request) -> Self {
        Self {
            id: r.id.as_uuid(),
            buyer: r.buyer.as_uuid(),
            status: r.status.as_str().to_string(),
            published: r.published,
            delivery_date: r.delivery_date,
            awarded_offer: r.awarded_offer.map(|o| o.as_uuid()),
            dispute_open: r.dispute_open,
            created_at: r.created_at,
        }
    }

    pub fn into_domain(self) -> Result<Request> {
        Ok(Request {
            id: self.id.into(),
            buyer: self.buyer.into(),
            status: RequestStatus::parse(&self.status)?,
            published: self.published,
            delivery_date: self.delivery_date,
            awarded_offer: self.awarded_offer.map(Into::into),
            dispute_open: self.dispute_open,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbOffer {
    pub id: Uuid,
    pub request_id: Uuid,
    pub supplier: Uuid,
    pub item_cents: i64,
    pub shipping_cents: i64,
    pub total_cents: i64,
    pub currency: String,
    pub status: String,
    pub payout_status: String,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl DbOffer {
    pub fn from_domain(o: &Offer) -> Self {
        Self {
            id: o.id.as_uuid(),
            request_id: o.request_id.as_uuid(),
            supplier: o.supplier.as_uuid(),
            item_cents: o.item.cents,
            shipping_cents: o.shipping.cents,
            total_cents: o.total.cents,
            currency: o.total.currency.code().to_string(),
            status: o.status.as_str().to_string(),
            payout_status: o.payout_status.as_str().to_string(),
            expires_at: o.expires_at,
            created_at: o.created_at,
        }
    }

    pub fn into_domain(self) -> Result<Offer> {
        let currency = Currency::parse(&self.currency)?;
        Ok(Offer {
            id: self.id.into(),
            request_id: self.request_id.into(),
            supplier: self.supplier.into(),
            item: Money::new(self.item_cents, currency),
            shipping: Money::new(self.shipping_cents, currency),
            total: Money::new(self.total_cents, currency),
            status: OfferStatus::parse(&self.status)?,
            payout_status: PayoutStatus::parse(&self.payout_status)?,
            expires_at: self.expires_at,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbHold {
    pub id: Uuid,
    pub kind: String,
    pub buyer: Uuid,
    pub supplier: Uuid,
    pub request_id: Uuid,
    pub offer_id: Uuid,
    pub amount_cents: i64,
    pub currency: String,
    pub status: String,
    pub intent_id: Option<String>,
    pub charge_id: Option<String>,
    pub transfer_id: Option<String>,
    pub auto_release_at: Option<DateTime<Utc>>,
    pub auto_refund_at: Option<DateTime<Utc>>,
    pub shipped_at: Option<DateTime<Utc>>,
    pub reported_at: Option<DateTime<Utc>>,
    pub dispute_opened_at: Option<DateTime<Utc>>,
    pub refunded_cents: i64,
    pub fee_cents: i64,
    pub released_at: Option<DateTime<Utc>>,
    pub refunded_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl DbHold {
    pub fn from_domain(h: &Hold) -> Self {
        Self {
            id: h.id.as_uuid(),
            kind: h.kind.as_str().to_string(),
            buyer: h.buyer.as_uuid(),
            supplier: h.supplier.as_uuid(),
            request_id: h.request_id.as_uuid(),
            offer_id: h.offer_id.as_uuid(),
            amount_cents: h.amount.cents,
            currency: h.amount.currency.code().to_string(),
            status: h.status.as_str().to_string(),
            intent_id: h.intent_id.clone(),
            charge_id: h.charge_id.clone(),
            transfer_id: h.transfer_id.clone(),
            auto_release_at: h.auto_release_at,
            auto_refund_at: h.auto_refund_at,
            shipped_at: h.shipped_at,
            reported_at: h.reported_at,
            dispute_opened_at: h.dispute_opened_at,
            refunded_cents: h.refunded_cents,
            fee_cents: h.fee_cents,
            released_at: h.released_at,
            refunded_at: h.refunded_at,
            created_at: h.created_at,
        }
    }

    pub fn into_domain(self) -> Result<Hold> {
        let currency = Currency::parse(&self.currency)?;
        Ok(Hold {
            id: self.id.into(),
            kind: HoldKind::parse(&self.kind)?,
            buyer: self.buyer.into(),
            supplier: self.supplier.into(),
            request_id: self.request_id.into(),
            offer_id: self.offer_id.into(),
            amount: Money::new(self.amount_cents, currency),
            status: HoldStatus::parse(&self.status)?,
            intent_id: self.intent_id,
            charge_id: self.charge_id,
            transfer_id: self.transfer_id,
            auto_release_at: self.auto_release_at,
            auto_refund_at: self.auto_refund_at,
            shipped_at: self.shipped_at,
            reported_at: self.reported_at,
            dispute_opened_at: self.dispute_opened_at,
            refunded_cents: self.refunded_cents,
            fee_cents: self.fee_cents,
            released_at: self.released_at,
            refunded_at: self.refunded_at,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbInvoice {
    pub id: Uuid,
    pub hold_id: Uuid,
    pub seller: Uuid,
    pub buyer: Uuid,
    pub currency: String,
    pub gross_cents: i64,
    pub net_cents: i64,
    pub vat_cents: i64,
    pub fee_rate_bps: i32,
    pub tax_mode: String,
    pub legal_note: Option<String>,
    pub document_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DbInvoice {
    pub fn from_domain(i: &Invoice) -> Self {
        Self {
            id: i.id.as_uuid(),
            hold_id: i.hold_id.as_uuid(),
            seller: i.seller.as_uuid(),
            buyer: i.buyer.as_uuid(),
            currency: i.currency.code().to_string(),
            gross_cents: i.gross_cents,
            net_cents: i.net_cents,
            vat_cents: i.vat_cents,
            fee_rate_bps: i.fee_rate_bps as i32,
            tax_mode: i.tax_mode.as_str().to_string(),
            legal_note: i.legal_note.clone(),
            document_ref: i.document_ref.clone(),
            created_at: i.created_at,
        }
    }

    pub fn into_domain(self) -> Result<Invoice> {
        Ok(Invoice {
            id: self.id.into(),
            hold_id: self.hold_id.into(),
            seller: self.seller.into(),
            buyer: self.buyer.into(),
            currency: Currency::parse(&self.currency)?,
            gross_cents: self.gross_cents,
            net_cents: self.net_cents,
            vat_cents: self.vat_cents,
            fee_rate_bps: self.fee_rate_bps as u32,
            tax_mode: TaxMode::parse(&self.tax_mode)?,
            legal_note: self.legal_note,
            document_ref: self.document_ref,
            created_at: self.created_at,
        })
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct DbSellerProfile {
    pub party: Uuid,
    pub is_business: bool,
    pub vat_id: Option<String>,
    pub country: String,
    pub payout_account_id: Option<String>,
    pub email: Option<String>,
}

impl DbSellerProfile {
    pub fn from_domain(s: &SellerProfile) -> Self {
        Self {
            party: s.party.as_uuid(),
            is_business: s.is_business,
            vat_id: s.vat_id.clone(),
            country: s.country.clone(),
            payout_account_id: s.payout_account_id.clone(),
            email: s.email.clone(),
        }
    }

    pub fn into_domain(self) -> SellerProfile {
        SellerProfile {
            party: self.party.into(),
            is_business: self.is_business,
            vat_id: self.vat_id,
            country: self.country,
            payout_account_id: self.payout_account_id,
            email: self.email,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coatbay_types::PartyId;

    #[test]
    fn test_hold_roundtrip_through_row() {
        let hold = Hold {
            id: coatbay_types::HoldId::new(),
            kind: HoldKind::JobBid,
            buyer: PartyId::new(),
            supplier: PartyId::new(),
            request_id: coatbay_types::RequestId::new(),
            offer_id: coatbay_types::OfferId::new(),
            amount: Money::eur(12_345),
            status: HoldStatus::FundsHeld,
            intent_id: Some("pi_1".to_string()),
            charge_id: Some("ch_1".to_string()),
            transfer_id: None,
            auto_release_at: Some(Utc::now()),
            auto_refund_at: None,
            shipped_at: None,
            reported_at: None,
            dispute_opened_at: None,
            refunded_cents: 500,
            fee_cents: 864,
            released_at: None,
            refunded_at: None,
            created_at: Utc::now(),
        };
        let row = DbHold::from_domain(&hold);
        assert_eq!(row.status, "funds_held");
        assert_eq!(row.kind, "job_bid");
        let back = row.into_domain().unwrap();
        assert_eq!(back.id, hold.id);
        assert_eq!(back.amount, hold.amount);
        assert_eq!(back.refunded_cents, 500);
    }

    #[test]
    fn test_unknown_status_fails_conversion() {
        let mut row = DbRequest {
            id: Uuid::new_v4(),
            buyer: Uuid::new_v4(),
            status: "open".to_string(),
            published: true,
            delivery_date: None,
            awarded_offer: None,
            dispute_open: false,
            created_at: Utc::now(),
        };
        assert!(row.clone().into_domain().is_ok());
        row.status = "launched".to_string();
        assert!(row.into_domain().is_err());
    }
}
