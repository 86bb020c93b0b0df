//! Type-safe money representation using decimal arithmetic.
//!
//! Amounts are held as [`Decimal`] in the currency's standard unit (dollars,
//! not cents) and only converted to integer minor units at the payment
//! processor boundary via [`Money::to_minor_units`].

use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};

/// Number of decimal places in the minor unit of every supported currency.
const MINOR_UNIT_SCALE: u32 = 2;

/// Errors from money arithmetic and conversion.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MoneyError {
    /// The amount is negative where a charge is expected.
    #[error("amount cannot be negative: {0}")]
    Negative(Decimal),
    /// The amount does not fit in the processor's integer range.
    #[error("amount out of range: {0}")]
    Overflow(Decimal),
    /// Unknown ISO 4217 code.
    #[error("unsupported currency: {0}")]
    UnsupportedCurrency(String),
}

/// ISO 4217 currency codes accepted by the storefront.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CurrencyCode {
    #[default]
    USD,
    EUR,
    GBP,
    CAD,
    AUD,
}

impl CurrencyCode {
    /// Display symbol.
    #[must_use]
    pub const fn symbol(self) -> &'static str {
        match self {
            Self::USD | Self::CAD | Self::AUD => "$",
            Self::EUR => "€",
            Self::GBP => "£",
        }
    }

    /// Upper-case ISO code (`USD`).
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::USD => "USD",
            Self::EUR => "EUR",
            Self::GBP => "GBP",
            Self::CAD => "CAD",
            Self::AUD => "AUD",
        }
    }

    /// Lower-case code as payment processors expect it (`usd`).
    #[must_use]
    pub const fn processor_code(self) -> &'static str {
        match self {
            Self::USD => "usd",
            Self::EUR => "eur",
            Self::GBP => "gbp",
            Self::CAD => "cad",
            Self::AUD => "aud",
        }
    }
}

impl fmt::Display for CurrencyCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for CurrencyCode {
    type Err = MoneyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "USD" => Ok(Self::USD),
            "EUR" => Ok(Self::EUR),
            "GBP" => Ok(Self::GBP),
            "CAD" => Ok(Self::CAD),
            "AUD" => Ok(Self::AUD),
            _ => Err(MoneyError::UnsupportedCurrency(s.to_owned())),
        }
    }
}

/// An amount with its currency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Money {
    /// Amount in the currency's standard unit (e.g., dollars, not cents).
    pub amount: Decimal,
    /// ISO 4217 currency code.
    pub currency: CurrencyCode,
}

impl Money {
    /// Create a new amount.
    #[must_use]
    pub const fn new(amount: Decimal, currency: CurrencyCode) -> Self {
        Self { amount, currency }
    }

    /// Build an amount from integer minor units (cents).
    #[must_use]
    pub fn from_minor_units(minor: i64, currency: CurrencyCode) -> Self {
        Self::new(Decimal::new(minor, MINOR_UNIT_SCALE), currency)
    }

    /// Convert to integer minor units for a payment processor.
    ///
    /// Fractional cents round to the nearest unit, with halves rounding away
    /// from zero (`10.005` becomes `1001`). Amounts are never truncated.
    ///
    /// # Errors
    ///
    /// Returns `MoneyError::Negative` for negative amounts and
    /// `MoneyError::Overflow` when the result does not fit in an `i64`.
    pub fn to_minor_units(&self) -> Result<i64, MoneyError> {
        if self.amount.is_sign_negative() && !self.amount.is_zero() {
            return Err(MoneyError::Negative(self.amount));
        }
        let rounded = self.rounded().amount;
        rounded
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|scaled| scaled.trunc().to_i64())
            .ok_or(MoneyError::Overflow(self.amount))
    }

    /// Round to the currency's minor unit.
    #[must_use]
    pub fn rounded(&self) -> Self {
        Self::new(
            self.amount
                .round_dp_with_strategy(MINOR_UNIT_SCALE, RoundingStrategy::MidpointAwayFromZero),
            self.currency,
        )
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{:.2}", self.currency.symbol(), self.rounded().amount)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::str::FromStr;

    use super::*;

    fn usd(s: &str) -> Money {
        Money::new(Decimal::from_str(s).unwrap(), CurrencyCode::USD)
    }

    #[test]
    fn test_whole_amount_to_minor_units() {
        assert_eq!(usd("100.00").to_minor_units(), Ok(10_000));
        assert_eq!(usd("100").to_minor_units(), Ok(10_000));
        assert_eq!(usd("0").to_minor_units(), Ok(0));
    }

    #[test]
    fn test_fractional_cents_round_to_nearest() {
        assert_eq!(usd("10.004").to_minor_units(), Ok(1000));
        assert_eq!(usd("10.005").to_minor_units(), Ok(1001));
        assert_eq!(usd("10.0099").to_minor_units(), Ok(1001));
        assert_eq!(usd("99.999").to_minor_units(), Ok(10_000));
    }

    #[test]
    fn test_negative_amount_rejected() {
        assert!(matches!(
            usd("-1.00").to_minor_units(),
            Err(MoneyError::Negative(_))
        ));
    }

    #[test]
    fn test_from_minor_units() {
        assert_eq!(Money::from_minor_units(9999, CurrencyCode::USD), usd("99.99"));
    }

    #[test]
    fn test_display() {
        assert_eq!(usd("100").to_string(), "$100.00");
        assert_eq!(Money::new(Decimal::new(1999, 2), CurrencyCode::GBP).to_string(), "£19.99");
    }

    #[test]
    fn test_currency_parse_is_case_insensitive() {
        assert_eq!(CurrencyCode::from_str("usd"), Ok(CurrencyCode::USD));
        assert_eq!(CurrencyCode::from_str("Eur"), Ok(CurrencyCode::EUR));
        assert!(CurrencyCode::from_str("XYZ").is_err());
        assert_eq!(CurrencyCode::CAD.processor_code(), "cad");
    }
}
