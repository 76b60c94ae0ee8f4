use crate::error::PaymentError;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Currency used when a transaction does not specify one.
pub const DEFAULT_CURRENCY: &str = "USD";

/// Represents a positive monetary amount for transactions.
///
/// Ensures that transaction amounts are always positive. Deserialization goes
/// through the same check, so an `Amount` read from a script or a store is
/// never zero or negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "Decimal", into = "Decimal")]
pub struct Amount(Decimal);

impl Amount {
    pub fn new(value: Decimal) -> Result<Self, PaymentError> {
        if value > Decimal::ZERO {
            Ok(Self(value))
        } else {
            Err(PaymentError::InvalidAmount(format!(
                "amount must be positive, got {value}"
            )))
        }
    }

    /// Converts a float coming from an untyped caller, rejecting NaN and infinities.
    pub fn from_f64(value: f64) -> Result<Self, PaymentError> {
        if !value.is_finite() {
            return Err(PaymentError::InvalidAmount(format!(
                "amount must be finite, got {value}"
            )));
        }
        let decimal = Decimal::from_f64(value).ok_or_else(|| {
            PaymentError::InvalidAmount(format!("amount {value} is out of range"))
        })?;
        Self::new(decimal)
    }

    pub fn value(&self) -> Decimal {
        self.0
    }
}

impl TryFrom<Decimal> for Amount {
    type Error = PaymentError;

    fn try_from(value: Decimal) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Amount> for Decimal {
    fn from(amount: Amount) -> Self {
        amount.0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Rounds to whole cents, midpoint away from zero.
pub fn round_cents(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
