//! Precision-safe decimal types for trading.
//!
//! Uses `rust_decimal` for exact decimal arithmetic. Quantities sent to the
//! exchange must be exact multiples of the instrument step, which binary
//! floats cannot represent.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, Mul, Sub};
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Price with exact decimal precision.
///
/// Wraps `Decimal` to prevent mixing prices with quantities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Price(pub Decimal);

impl Price {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Percentage difference from another price: `(self - other) / other * 100`.
    #[inline]
    pub fn pct_from(&self, other: Price) -> Option<Decimal> {
        if other.is_zero() {
            return None;
        }
        Some((self.0 - other.0) / other.0 * Decimal::ONE_HUNDRED)
    }
}

impl fmt::Display for Price {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Price {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Price {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Sub for Price {
    type Output = Decimal;

    fn sub(self, rhs: Self) -> Self::Output {
        self.0 - rhs.0
    }
}

/// Quantity in base units with exact decimal precision.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Size(pub Decimal);

impl Size {
    pub const ZERO: Self = Self(Decimal::ZERO);

    #[inline]
    pub fn new(value: Decimal) -> Self {
        Self(value)
    }

    #[inline]
    pub fn inner(&self) -> Decimal {
        self.0
    }

    #[inline]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    #[inline]
    pub fn is_positive(&self) -> bool {
        self.0.is_sign_positive() && !self.0.is_zero()
    }

    /// Notional value: size * price.
    #[inline]
    pub fn notional(&self, price: Price) -> Decimal {
        self.0 * price.0
    }

    /// Truncate down to a multiple of `step`, rejecting results below `min`.
    ///
    /// Idempotent: a value that is already a multiple of `step` is returned
    /// unchanged. A zero step leaves the value untouched.
    pub fn round_to_step(&self, step: Decimal, min: Decimal) -> Result<Self> {
        if step.is_sign_negative() {
            return Err(CoreError::InvalidSize(format!("negative step {step}")));
        }
        let rounded = if step.is_zero() {
            self.0
        } else {
            (self.0 / step).floor() * step
        };
        let rounded = rounded.normalize();
        if rounded < min || rounded.is_zero() {
            return Err(CoreError::BelowMinimum {
                value: self.0,
                rounded,
                min,
            });
        }
        Ok(Self(rounded))
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for Size {
    type Err = rust_decimal::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(s.parse()?))
    }
}

impl From<Decimal> for Size {
    fn from(d: Decimal) -> Self {
        Self(d)
    }
}

impl Add for Size {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl Mul<Price> for Size {
    type Output = Decimal;

    fn mul(self, rhs: Price) -> Self::Output {
        self.0 * rhs.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_price_pct_from() {
        let spot_ask = Price::new(dec!(100));
        let fut_bid = Price::new(dec!(100.5));

        assert_eq!(fut_bid.pct_from(spot_ask), Some(dec!(0.5)));
        assert_eq!(fut_bid.pct_from(Price::ZERO), None);
    }

    #[test]
    fn test_round_to_step_truncates() {
        let size = Size::new(dec!(1.23456));
        let rounded = size.round_to_step(dec!(0.001), dec!(0.001)).unwrap();
        assert_eq!(rounded.inner(), dec!(1.234));
    }

    #[test]
    fn test_round_to_step_is_idempotent() {
        let size = Size::new(dec!(7.77777));
        let once = size.round_to_step(dec!(0.01), dec!(0.01)).unwrap();
        let twice = once.round_to_step(dec!(0.01), dec!(0.01)).unwrap();
        assert_eq!(once, twice);
        assert_eq!(once.inner(), dec!(7.77));
    }

    #[test]
    fn test_round_to_step_never_rounds_up() {
        // 0.2999999 must not become 0.3
        let size = Size::new(dec!(0.2999999));
        let rounded = size.round_to_step(dec!(0.1), dec!(0.1)).unwrap();
        assert_eq!(rounded.inner(), dec!(0.2));
    }

    #[test]
    fn test_round_to_step_below_min_errors() {
        let size = Size::new(dec!(0.0009));
        let err = size.round_to_step(dec!(0.001), dec!(0.001)).unwrap_err();
        assert!(matches!(err, CoreError::BelowMinimum { .. }));
    }

    #[test]
    fn test_round_to_step_coarse_step() {
        let size = Size::new(dec!(1234.5));
        let rounded = size.round_to_step(dec!(10), dec!(10)).unwrap();
        assert_eq!(rounded.inner(), dec!(1230));
    }

    #[test]
    fn test_notional_calculation() {
        let size = Size::new(dec!(0.5));
        let price = Price::new(dec!(50000));
        assert_eq!(size.notional(price), dec!(25000));
        assert_eq!(size * price, dec!(25000));
    }
}
