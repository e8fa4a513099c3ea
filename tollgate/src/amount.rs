//! Monetary amounts for payment requirements, proofs, and balances.
//!
//! All money in the protocol is represented as [`Amount`], a thin wrapper over
//! an arbitrary-precision decimal. Amounts never pass through floating point:
//! they parse from and serialize to decimal strings, and conversions to
//! on-chain base units are exact integer scalings.

use std::fmt::{Display, Formatter};
use std::str::FromStr;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Number of lamports in one unit of the native currency.
pub const LAMPORTS_PER_NATIVE: u64 = 1_000_000_000;

/// Decimal places of the native currency.
pub const NATIVE_DECIMALS: u32 = 9;

/// An arbitrary-precision monetary amount.
///
/// # Serialization
///
/// Serialized as a decimal string (`"0.05"`, `"1000000"`) so that JSON
/// consumers never lose precision to IEEE 754 doubles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Amount(Decimal);

impl Amount {
    /// The zero amount.
    pub const ZERO: Self = Self(Decimal::ZERO);

    /// Wraps a raw decimal value.
    #[must_use]
    pub const fn from_decimal(value: Decimal) -> Self {
        Self(value)
    }

    /// Returns the inner decimal value.
    #[must_use]
    pub const fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Converts a raw base-unit quantity (e.g. lamports, token atoms) into an
    /// amount with the given number of decimal places.
    #[must_use]
    pub fn from_base_units(raw: u64, decimals: u32) -> Self {
        Self(Decimal::from_i128_with_scale(i128::from(raw), decimals))
    }

    /// Converts a signed base-unit delta into an amount. Used for pre/post
    /// balance differences, which can be negative for the paying account.
    #[must_use]
    pub fn from_base_unit_delta(delta: i128, decimals: u32) -> Self {
        Self(Decimal::from_i128_with_scale(delta, decimals))
    }

    /// Converts a lamport quantity into a native-currency amount.
    #[must_use]
    pub fn from_lamports(lamports: u64) -> Self {
        Self::from_base_units(lamports, NATIVE_DECIMALS)
    }

    /// Converts the amount into base units at the given number of decimal
    /// places, rounding the sub-unit remainder half away from zero.
    ///
    /// Returns `None` if the amount is negative or too large for `u64`.
    #[must_use]
    pub fn to_base_units(&self, decimals: u32) -> Option<u64> {
        let factor = Decimal::from(10u64.checked_pow(decimals)?);
        let scaled = self.0.checked_mul(factor)?;
        scaled
            .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
            .to_u64()
    }

    /// Converts the amount into lamports.
    ///
    /// Returns `None` if the amount is negative or too large for `u64`.
    #[must_use]
    pub fn to_lamports(&self) -> Option<u64> {
        self.to_base_units(NATIVE_DECIMALS)
    }

    /// Returns `true` if the amount is exactly zero.
    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns `true` if the amount is strictly greater than zero.
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Returns `true` if the amount is strictly less than zero.
    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Checked addition. Returns `None` on overflow.
    #[must_use]
    pub fn checked_add(&self, other: Self) -> Option<Self> {
        self.0.checked_add(other.0).map(Self)
    }

    /// Checked subtraction. Returns `None` on overflow.
    #[must_use]
    pub fn checked_sub(&self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(Self)
    }

    /// Checked multiplication. Returns `None` on overflow.
    #[must_use]
    pub fn checked_mul(&self, other: Self) -> Option<Self> {
        self.0.checked_mul(other.0).map(Self)
    }

    /// Absolute difference between two amounts. Returns `None` on overflow.
    #[must_use]
    pub fn abs_diff(&self, other: Self) -> Option<Self> {
        self.0.checked_sub(other.0).map(|d| Self(d.abs()))
    }
}

impl From<u64> for Amount {
    fn from(value: u64) -> Self {
        Self(Decimal::from(value))
    }
}

impl From<Decimal> for Amount {
    fn from(value: Decimal) -> Self {
        Self(value)
    }
}

impl From<Amount> for Decimal {
    fn from(value: Amount) -> Self {
        value.0
    }
}

impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Decimal::from_str(s)
            .map(Self)
            .map_err(|_| ParseAmountError(s.to_owned()))
    }
}

impl Display for Amount {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Error returned when a string is not a valid decimal amount.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid decimal amount: {0:?}")]
pub struct ParseAmountError(String);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display_roundtrip() {
        let amount: Amount = "0.05".parse().unwrap();
        assert_eq!(amount.to_string(), "0.05");
        assert!(amount.is_positive());
    }

    #[test]
    fn test_rejects_garbage() {
        assert!("".parse::<Amount>().is_err());
        assert!("12.3.4".parse::<Amount>().is_err());
        assert!("1e5x".parse::<Amount>().is_err());
    }

    #[test]
    fn test_serializes_as_string() {
        let amount: Amount = "10.5".parse().unwrap();
        let json = serde_json::to_string(&amount).unwrap();
        assert_eq!(json, r#""10.5""#);
        let back: Amount = serde_json::from_str(&json).unwrap();
        assert_eq!(back, amount);
    }

    #[test]
    fn test_lamport_conversions() {
        let amount = Amount::from_lamports(1_500_000_000);
        assert_eq!(amount.to_string(), "1.500000000");
        assert_eq!(amount.to_lamports(), Some(1_500_000_000));

        let tenth: Amount = "0.1".parse().unwrap();
        assert_eq!(tenth.to_lamports(), Some(100_000_000));
    }

    #[test]
    fn test_base_units_for_token_decimals() {
        let amount: Amount = "2.5".parse().unwrap();
        assert_eq!(amount.to_base_units(6), Some(2_500_000));
        assert_eq!(Amount::from_base_units(2_500_000, 6), amount);
    }

    #[test]
    fn test_negative_amounts_have_no_base_units() {
        let delta = Amount::from_base_unit_delta(-5, 9);
        assert!(delta.is_negative());
        assert_eq!(delta.to_lamports(), None);
    }

    #[test]
    fn test_abs_diff_symmetry() {
        let a: Amount = "1.000001".parse().unwrap();
        let b: Amount = "1".parse().unwrap();
        let tolerance: Amount = "0.000001".parse().unwrap();
        assert_eq!(a.abs_diff(b), Some(tolerance));
        assert_eq!(b.abs_diff(a), Some(tolerance));
    }

    #[test]
    fn test_checked_arithmetic() {
        let a: Amount = "1.5".parse().unwrap();
        let b: Amount = "0.5".parse().unwrap();
        assert_eq!(a.checked_add(b), Some("2.0".parse().unwrap()));
        assert_eq!(a.checked_sub(b), Some("1.0".parse().unwrap()));
        assert!(a.checked_sub(b).unwrap().is_positive());
    }
}
