//! Commission invoicing
//!
//! One invoice per released hold, created idempotently after the transfer.
//! Document rendering is best-effort: a rendering failure never blocks the
//! invoice row, it just leaves `document_ref` empty for a later re-render.

use chrono::Utc;
use tracing::{info, warn};

use coatbay_types::{
    CoatbayError, Hold, HoldId, Invoice, InvoiceId, Money, Result, SellerProfile, TaxMode,
    REVERSE_CHARGE_NOTE,
};

use crate::engine::SettlementEngine;

/// Renders an invoice into a stored document and returns its reference.
#[async_trait::async_trait]
pub trait DocumentRenderer: Send + Sync {
    async fn render(&self, invoice: &Invoice, seller: &SellerProfile) -> Result<String>;
}

/// Plain-text renderer for tests and demo mode; the reference it returns is
/// the rendered document itself.
pub struct TextRenderer;

#[async_trait::async_trait]
impl DocumentRenderer for TextRenderer {
    async fn render(&self, invoice: &Invoice, seller: &SellerProfile) -> Result<String> {
        let mut doc = format!(
            "COMMISSION INVOICE {id}\n\
             hold: {hold}\n\
             seller: {seller_id} ({country})\n\
             commission ({rate_pct}.{rate_rem:02}%): {gross}\n\
             net: {net}\n\
             vat: {vat}\n\
             tax mode: {mode}\n",
            id = invoice.id,
            hold = invoice.hold_id,
            seller_id = seller.party,
            country = seller.country,
            rate_pct = invoice.fee_rate_bps / 100,
            rate_rem = invoice.fee_rate_bps % 100,
            gross = Money::new(invoice.gross_cents, invoice.currency),
            net = Money::new(invoice.net_cents, invoice.currency),
            vat = Money::new(invoice.vat_cents, invoice.currency),
            mode = invoice.tax_mode.as_str(),
        );
        if let Some(note) = &invoice.legal_note {
            doc.push_str(note);
            doc.push('\n');
        }
        Ok(doc)
    }
}

impl SettlementEngine {
    /// Create (or return the existing) commission invoice for a released
    /// hold.
    pub async fn ensure_invoice(&self, hold_id: HoldId) -> Result<Invoice> {
        let hold = self
            .ledger
            .hold(hold_id)
            .await?
            .ok_or_else(|| CoatbayError::not_found("hold", hold_id))?;
        if hold.released_at.is_none() {
            return Err(CoatbayError::StateConflict {
                entity: "hold",
                id: hold_id.to_string(),
                detail: "invoice requires a released hold".to_string(),
            });
        }

        if let Some(existing) = self.ledger.invoice_for_hold(hold_id).await? {
            return Ok(existing);
        }

        let seller = self
            .ledger
            .seller_profile(hold.supplier)
            .await?
            .ok_or_else(|| CoatbayError::not_found("seller profile", hold.supplier))?;

        let mut invoice = self.build_invoice(&hold, &seller);
        debug_assert!(invoice.reconciles());

        if let Some(renderer) = &self.renderer {
            match renderer.render(&invoice, &seller).await {
                Ok(doc_ref) => invoice.document_ref = Some(doc_ref),
                Err(err) => {
                    warn!(hold = %hold_id, %err,
                        "invoice document rendering failed, persisting without document");
                }
            }
        }

        self.ledger.insert_invoice(&invoice).await?;
        info!(invoice = %invoice.id, hold = %hold_id, mode = invoice.tax_mode.as_str(),
            gross_cents = invoice.gross_cents, "commission invoice created");
        Ok(invoice)
    }

    fn build_invoice(&self, hold: &Hold, seller: &SellerProfile) -> Invoice {
        // The gross is the fee fixed at release time; holds released before
        // the fee column existed fall back to recomputation.
        let gross_cents = if hold.fee_cents > 0 {
            hold.fee_cents
        } else {
            hold.net_gross().at_bps(self.config.fee_rate_bps).cents
        };
        let gross = Money::new(gross_cents, hold.currency());

        let (tax_mode, net, vat, legal_note) =
            if seller.is_domestic(&self.config.platform_country) {
                let (net, vat) = gross.split_inclusive_vat(self.config.vat_rate_bps);
                (TaxMode::VatIncluded, net, vat, None)
            } else if seller.is_eu() && seller.is_business && seller.vat_id.is_some() {
                (
                    TaxMode::ReverseCharge,
                    gross,
                    Money::zero(gross.currency),
                    Some(REVERSE_CHARGE_NOTE.to_string()),
                )
            } else {
                (TaxMode::NonTaxable, gross, Money::zero(gross.currency), None)
            };

        Invoice {
            id: InvoiceId::new(),
            hold_id: hold.id,
            seller: hold.supplier,
            buyer: hold.buyer,
            currency: hold.currency(),
            gross_cents: gross.cents,
            net_cents: net.cents,
            vat_cents: vat.cents,
            fee_rate_bps: self.config.fee_rate_bps,
            tax_mode,
            legal_note,
            document_ref: None,
            created_at: Utc::now(),
        }
    }
}
