//! Seller tax and payout profile

use crate::PartyId;
use serde::{Deserialize, Serialize};

/// EU member state country codes, used for the tax-mode decision.
const EU_COUNTRIES: &[&str] = &[
    "AT", "BE", "BG", "HR", "CY", "CZ", "DK", "EE", "FI", "FR", "DE", "GR", "HU", "IE", "IT",
    "LV", "LT", "LU", "MT", "NL", "PL", "PT", "RO", "SK", "SI", "ES", "SE",
];

/// What the platform knows about a seller for payouts and invoicing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SellerProfile {
    pub party: PartyId,
    /// Registered business (vs. private individual)
    pub is_business: bool,
    pub vat_id: Option<String>,
    /// ISO 3166-1 alpha-2 country code
    pub country: String,
    /// Connected payout account at the payment gateway, once onboarded
    pub payout_account_id: Option<String>,
    pub email: Option<String>,
}

impl SellerProfile {
    pub fn is_eu(&self) -> bool {
        EU_COUNTRIES.contains(&self.country.as_str())
    }

    pub fn is_domestic(&self, platform_country: &str) -> bool {
        self.country == platform_country
    }
}
