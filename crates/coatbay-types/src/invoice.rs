//! Commission invoices
//!
//! Produced at most once per hold, only after the hold reaches `released`.

use crate::{CoatbayError, Currency, HoldId, InvoiceId, PartyId, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Legal note attached to reverse-charge invoices (EU cross-border B2B).
pub const REVERSE_CHARGE_NOTE: &str =
    "VAT liability transfers to the recipient (reverse charge, Art. 196 EU VAT Directive)";

/// How VAT is handled on the commission
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaxMode {
    /// Domestic seller: gross includes VAT at the configured rate
    VatIncluded,
    /// Other-EU business seller with a VAT id: net = gross, VAT = 0
    ReverseCharge,
    /// Cross-border non-business or non-EU: no VAT applies
    NonTaxable,
}

impl TaxMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaxMode::VatIncluded => "VAT_INCLUDED",
            TaxMode::ReverseCharge => "REVERSE_CHARGE",
            TaxMode::NonTaxable => "NON_TAXABLE",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "VAT_INCLUDED" => Ok(TaxMode::VatIncluded),
            "REVERSE_CHARGE" => Ok(TaxMode::ReverseCharge),
            "NON_TAXABLE" => Ok(TaxMode::NonTaxable),
            other => Err(CoatbayError::ledger(format!("unknown tax mode {other}"))),
        }
    }
}

/// A commission invoice derived from a released hold
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    pub id: InvoiceId,
    pub hold_id: HoldId,
    pub seller: PartyId,
    pub buyer: PartyId,
    pub currency: Currency,
    /// Commission including VAT where applicable, in minor units
    pub gross_cents: i64,
    pub net_cents: i64,
    pub vat_cents: i64,
    /// The fee rate applied, in basis points, for the line item text
    pub fee_rate_bps: u32,
    pub tax_mode: TaxMode,
    /// Legal annotation (reverse-charge note), when required
    pub legal_note: Option<String>,
    /// Reference to the rendered document, once rendering succeeded
    pub document_ref: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Invoice {
    /// Amount checks that must hold for every invoice.
    pub fn reconciles(&self) -> bool {
        match self.tax_mode {
            TaxMode::VatIncluded => self.net_cents + self.vat_cents == self.gross_cents,
            TaxMode::ReverseCharge | TaxMode::NonTaxable => {
                self.vat_cents == 0 && self.net_cents == self.gross_cents
            }
        }
    }
}
