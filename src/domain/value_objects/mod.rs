//! Value Objects for the storefront core

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, Sub};

/// Money value object.
///
/// Amounts are kept exact and only rounded where a figure is shown or
/// compared, so summing line totals in any order gives the same result.
/// Serialized as a plain JSON number, which is what the storefront backend speaks.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Money(#[serde(with = "rust_decimal::serde::float")] Decimal);

impl Money {
    pub const ZERO: Money = Money(Decimal::ZERO);

    pub const fn new(amount: Decimal) -> Self { Self(amount) }
    pub fn amount(&self) -> Decimal { self.0 }
    pub fn is_positive(&self) -> bool { self.0 > Decimal::ZERO }
    pub fn multiply(&self, qty: u32) -> Money { Money(self.0 * Decimal::from(qty)) }
    pub fn max_zero(self) -> Money { if self.0 < Decimal::ZERO { Money::ZERO } else { self } }

    /// Rounds to two decimals, half away from zero.
    pub fn rounded(self) -> Money {
        Money(self.0.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero))
    }

    /// True when the two amounts differ by more than `tolerance`.
    pub fn drifted_from(&self, other: &Money, tolerance: Decimal) -> bool {
        (self.0 - other.0).abs() > tolerance
    }
}

impl From<Decimal> for Money {
    fn from(value: Decimal) -> Self { Money(value) }
}

impl Add for Money {
    type Output = Money;
    fn add(self, rhs: Money) -> Money { Money(self.0 + rhs.0) }
}

impl Sub for Money {
    type Output = Money;
    fn sub(self, rhs: Money) -> Money { Money(self.0 - rhs.0) }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money { iter.fold(Money::ZERO, Add::add) }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:.2}", self.0) }
}

/// Quantity of a single cart line, always within `[MIN, MAX]`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct Quantity(u32);

impl Quantity {
    pub const MIN: u32 = 1;
    pub const MAX: u32 = 1000;

    /// `None` for zero or negative requests, which callers treat as "remove".
    pub fn clamped(requested: i64) -> Option<Self> {
        if requested <= 0 { return None; }
        Some(Self(requested.min(Self::MAX as i64) as u32))
    }

    pub fn value(&self) -> u32 { self.0 }

    /// Adds, saturating at `MAX`.
    pub fn add(&self, other: Quantity) -> Self { Self(self.0.saturating_add(other.0).min(Self::MAX)) }
}

impl TryFrom<u32> for Quantity {
    type Error = QuantityError;
    fn try_from(value: u32) -> Result<Self, Self::Error> {
        if (Self::MIN..=Self::MAX).contains(&value) { Ok(Self(value)) } else { Err(QuantityError::OutOfRange(value)) }
    }
}

impl From<Quantity> for u32 {
    fn from(value: Quantity) -> Self { value.0 }
}

#[derive(Debug, Clone)] pub enum QuantityError { OutOfRange(u32) }
impl std::error::Error for QuantityError {}
impl fmt::Display for QuantityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self { Self::OutOfRange(v) => write!(f, "quantity {} outside {}..={}", v, Quantity::MIN, Quantity::MAX) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_money_rounding() {
        assert_eq!(Money::new(dec!(10.005)).rounded().amount(), dec!(10.01));
        assert_eq!(Money::new(dec!(-3)).max_zero(), Money::ZERO);
    }

    #[test]
    fn test_money_serializes_as_number() {
        let json = serde_json::to_string(&Money::new(dec!(499.5))).unwrap();
        assert_eq!(json, "499.5");
        let back: Money = serde_json::from_str("120").unwrap();
        assert_eq!(back.amount(), dec!(120));
    }

    #[test]
    fn test_quantity_clamp() {
        assert!(Quantity::clamped(0).is_none());
        assert!(Quantity::clamped(-4).is_none());
        assert_eq!(Quantity::clamped(5000).unwrap().value(), 1000);
        assert_eq!(Quantity::clamped(990).unwrap().add(Quantity::clamped(20).unwrap()).value(), 1000);
    }

    #[test]
    fn test_quantity_rejects_out_of_range_json() {
        assert!(serde_json::from_str::<Quantity>("0").is_err());
        assert!(serde_json::from_str::<Quantity>("1001").is_err());
        assert_eq!(serde_json::from_str::<Quantity>("3").unwrap().value(), 3);
    }
}
