use std::fmt;
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::payment::ParseEnumError;
use crate::PaymentError;

/// Supported currencies all use two minor digits.
const MINOR_DIGITS: u32 = 2;

/// Largest accepted amount in minor units.
const MAX_MINOR_UNITS: i64 = 99_999_999_999;

/// A strictly positive monetary amount held as an exact decimal, with at most
/// two significant fractional digits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, PaymentError> {
        if value <= Decimal::ZERO {
            return Err(PaymentError::InvalidAmount(
                "amount must be greater than zero".to_string(),
            ));
        }
        if value.normalize().scale() > MINOR_DIGITS {
            return Err(PaymentError::InvalidAmount(format!(
                "{} has more than {} decimal places",
                value, MINOR_DIGITS
            )));
        }
        let max = Decimal::new(MAX_MINOR_UNITS, MINOR_DIGITS);
        if value > max {
            return Err(PaymentError::InvalidAmount(format!(
                "{} exceeds the maximum of {}",
                value, max
            )));
        }
        Ok(Self(value))
    }

    /// Parses user input such as `"50.00"`. Empty, malformed, zero and negative
    /// values are all rejected.
    pub fn parse(raw: &str) -> Result<Self, PaymentError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PaymentError::InvalidAmount("amount is required".to_string()));
        }
        let value = Decimal::from_str(trimmed).map_err(|_| {
            PaymentError::InvalidAmount(format!("'{}' is not a decimal amount", trimmed))
        })?;
        Self::new(value)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }

    /// Amount in the currency's minor unit (cents for every supported currency).
    pub fn to_minor_units(&self) -> Result<i64, PaymentError> {
        self.0
            .checked_mul(Decimal::ONE_HUNDRED)
            .and_then(|minor| minor.to_i64())
            .ok_or_else(|| PaymentError::InvalidAmount(format!("{} is out of range", self.0)))
    }

    /// Two-decimal rendering used by order-style gateways.
    pub fn to_fixed_2(&self) -> String {
        format!("{:.2}", self.0.round_dp(2))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Amount::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl FromStr for Amount {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Currency {
    Usd,
    Eur,
    Gbp,
    Cad,
    Aud,
}

impl Currency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Currency::Usd => "USD",
            Currency::Eur => "EUR",
            Currency::Gbp => "GBP",
            Currency::Cad => "CAD",
            Currency::Aud => "AUD",
        }
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Currency {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USD" => Ok(Currency::Usd),
            "EUR" => Ok(Currency::Eur),
            "GBP" => Ok(Currency::Gbp),
            "CAD" => Ok(Currency::Cad),
            "AUD" => Ok(Currency::Aud),
            _ => Err(ParseEnumError::new("currency", s)),
        }
    }
}
