use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Sub};

/// A single-currency amount. Statement rows carry minor units (`i64`); this
/// wrapper is used wherever amounts are summed or shown to an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Money(Decimal);

impl Money {
    pub fn from_cents(cents: i64) -> Self {
        Money(Decimal::new(cents, 2))
    }

    pub fn zero() -> Self {
        Money(Decimal::ZERO)
    }

    pub fn abs(self) -> Self {
        Money(self.0.abs())
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.2}", self.0)
    }
}

impl Add for Money {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Money(self.0 + rhs.0)
    }
}

impl Sub for Money {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Money(self.0 - rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_has_two_places() {
        assert_eq!(Money::from_cents(500_000).to_string(), "5000.00");
        assert_eq!(Money::from_cents(-7525).to_string(), "-75.25");
    }

    #[test]
    fn arithmetic_and_abs() {
        let total = Money::from_cents(1000) + Money::from_cents(-250) - Money::from_cents(-50);
        assert_eq!(total, Money::from_cents(800));
        assert_eq!(Money::from_cents(-250).abs(), Money::from_cents(250));
        assert!(Money::zero() < Money::from_cents(1));
    }
}
