//! Integer minor-unit money
//!
//! All monetary values in the settlement engine are integer cents. Any
//! division (fee splits, inclusive-VAT splits) goes through a single
//! rounding rule, `round_half_up`, so derived amounts always reconcile:
//! `fee + payout == amount` and `net + vat == gross` hold by construction.

use crate::{CoatbayError, Result};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// Supported settlement currencies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Eur,
    Usd,
    Chf,
}

impl Currency {
    /// ISO 4217 code
    pub fn code(&self) -> &'static str {
        match self {
            Currency::Eur => "EUR",
            Currency::Usd => "USD",
            Currency::Chf => "CHF",
        }
    }

    pub fn parse(code: &str) -> Result<Self> {
        match code {
            "EUR" => Ok(Currency::Eur),
            "USD" => Ok(Currency::Usd),
            "CHF" => Ok(Currency::Chf),
            other => Err(CoatbayError::InvalidAmount {
                reason: format!("unknown currency code {other}"),
            }),
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Round-half-up division at the cent.
///
/// `numerator` and `denominator` are widened to i128 internally so fee
/// computations on large amounts cannot overflow. Panics on a zero or
/// negative denominator; callers only pass fixed positive rate bases.
pub fn round_half_up(numerator: i128, denominator: i128) -> i64 {
    assert!(denominator > 0, "denominator must be positive");
    let q = if numerator >= 0 {
        (2 * numerator + denominator) / (2 * denominator)
    } else {
        -((-2 * numerator + denominator) / (2 * denominator))
    };
    q as i64
}

/// An amount of money in integer minor units (cents)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Money {
    /// Value in minor units (cents)
    pub cents: i64,
    /// The currency
    pub currency: Currency,
}

impl Money {
    pub fn new(cents: i64, currency: Currency) -> Self {
        Self { cents, currency }
    }

    pub fn zero(currency: Currency) -> Self {
        Self { cents: 0, currency }
    }

    /// Euro cents, the platform's home currency
    pub fn eur(cents: i64) -> Self {
        Self::new(cents, Currency::Eur)
    }

    pub fn is_zero(&self) -> bool {
        self.cents == 0
    }

    pub fn is_positive(&self) -> bool {
        self.cents > 0
    }

    /// Checked addition (currencies must match)
    pub fn checked_add(self, other: Self) -> Result<Self> {
        self.require_same_currency(other)?;
        let cents = self
            .cents
            .checked_add(other.cents)
            .ok_or(CoatbayError::AmountOverflow)?;
        Ok(Self { cents, ..self })
    }

    /// Checked subtraction (currencies must match)
    pub fn checked_sub(self, other: Self) -> Result<Self> {
        self.require_same_currency(other)?;
        let cents = self
            .cents
            .checked_sub(other.cents)
            .ok_or(CoatbayError::AmountOverflow)?;
        Ok(Self { cents, ..self })
    }

    /// Apply a rate in basis points (100 bps = 1%), round-half-up at the cent
    pub fn at_bps(self, bps: u32) -> Self {
        let cents = round_half_up(self.cents as i128 * bps as i128, 10_000);
        Self { cents, ..self }
    }

    /// Split a gross amount that includes VAT at `vat_rate_bps` into
    /// (net, vat). Invariant: `net + vat == gross`.
    pub fn split_inclusive_vat(self, vat_rate_bps: u32) -> (Self, Self) {
        let net_cents = round_half_up(
            self.cents as i128 * 10_000,
            10_000 + vat_rate_bps as i128,
        );
        let net = Self { cents: net_cents, ..self };
        let vat = Self { cents: self.cents - net_cents, ..self };
        (net, vat)
    }

    fn require_same_currency(&self, other: Self) -> Result<()> {
        if self.currency != other.currency {
            return Err(CoatbayError::CurrencyMismatch {
                expected: self.currency.code().to_string(),
                actual: other.currency.code().to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.cents < 0 { "-" } else { "" };
        let abs = self.cents.unsigned_abs();
        write!(f, "{}{}.{:02} {}", sign, abs / 100, abs % 100, self.currency)
    }
}

impl PartialOrd for Money {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        if self.currency != other.currency {
            return None;
        }
        self.cents.partial_cmp(&other.cents)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_half_up() {
        assert_eq!(round_half_up(15, 10), 2);
        assert_eq!(round_half_up(14, 10), 1);
        assert_eq!(round_half_up(25, 10), 3);
        assert_eq!(round_half_up(0, 10), 0);
        assert_eq!(round_half_up(-15, 10), -1);
    }

    #[test]
    fn test_fee_at_seven_percent() {
        // 7% of 100.00 EUR
        let fee = Money::eur(10_000).at_bps(700);
        assert_eq!(fee.cents, 700);

        // Odd amount rounds half-up at the cent: 7% of 99.99 = 699.93 -> 700
        let fee = Money::eur(9_999).at_bps(700);
        assert_eq!(fee.cents, 700);

        // 7% of 0.07 = 0.49 cents -> 0 cents
        let fee = Money::eur(7).at_bps(700);
        assert_eq!(fee.cents, 0);
    }

    #[test]
    fn test_fee_plus_payout_reconciles() {
        for cents in [1, 99, 100, 12_345, 9_999_999] {
            let amount = Money::eur(cents);
            let fee = amount.at_bps(700);
            let payout = amount.checked_sub(fee).unwrap();
            assert_eq!(fee.cents + payout.cents, amount.cents);
        }
    }

    #[test]
    fn test_inclusive_vat_split_reconciles() {
        for cents in [1, 100, 700, 12_345, 700_001] {
            let gross = Money::eur(cents);
            let (net, vat) = gross.split_inclusive_vat(2_000);
            assert_eq!(net.cents + vat.cents, gross.cents);
        }

        // 120.00 gross at 20% inclusive -> 100.00 net, 20.00 VAT
        let (net, vat) = Money::eur(12_000).split_inclusive_vat(2_000);
        assert_eq!(net.cents, 10_000);
        assert_eq!(vat.cents, 2_000);
    }

    #[test]
    fn test_currency_mismatch() {
        let eur = Money::eur(100);
        let usd = Money::new(100, Currency::Usd);
        assert!(eur.checked_add(usd).is_err());
        assert!(eur.partial_cmp(&usd).is_none());
    }

    #[test]
    fn test_display() {
        assert_eq!(Money::eur(12_345).to_string(), "123.45 EUR");
        assert_eq!(Money::eur(-5).to_string(), "-0.05 EUR");
    }
}
