//! Fixed-point monetary amount with 4 decimal places precision.
//!
//! Uses `rust_decimal` internally with scale enforcement so balances never
//! accumulate binary floating-point error. Parsing is strict: an input carrying
//! more fractional digits than the ledger's minimum unit is rejected rather
//! than silently rounded.

use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::ops::{Add, Neg, Sub};
use std::str::FromStr;
use thiserror::Error;

/// Why a textual amount could not be turned into an [`Amount`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseAmountError {
    #[error("'{0}' is not a decimal number")]
    Malformed(String),

    #[error("'{0}' has more than {scale} decimal places", scale = Amount::SCALE)]
    TooPrecise(String),
}

/// A monetary amount that maintains exactly 4 decimal places.
///
/// `0.0001` is the minimum unit for every supported currency. Values produced
/// by arithmetic (such as a currency conversion) are brought back to this
/// scale with [`Amount::round_half_even`], which is the only rounding the
/// ledger performs.
///
/// # Examples
///
/// ```
/// use std::str::FromStr;
/// use wallet_ledger::Amount;
///
/// let amount = Amount::from_str("10.5").unwrap();
/// assert_eq!(amount.to_string(), "10.5000");
/// assert!(Amount::from_str("0.00001").is_err());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Amount(Decimal);

impl Amount {
    /// The number of decimal places to maintain.
    pub const SCALE: u32 = 4;

    /// Zero value.
    pub const ZERO: Self = Amount(Decimal::ZERO);

    /// Rounds an arbitrary decimal to the minimum unit, half to even.
    pub fn round_half_even(value: Decimal) -> Self {
        let mut rounded =
            value.round_dp_with_strategy(Self::SCALE, RoundingStrategy::MidpointNearestEven);
        rounded.rescale(Self::SCALE);
        Amount(rounded)
    }

    /// Wraps a decimal that is already representable at 4 decimal places.
    ///
    /// Returns `None` if `value` would need rounding.
    pub fn exact(value: Decimal) -> Option<Self> {
        if value.normalize().scale() > Self::SCALE {
            return None;
        }
        let mut scaled = value;
        scaled.rescale(Self::SCALE);
        Some(Amount(scaled))
    }

    /// The underlying decimal value.
    pub fn as_decimal(&self) -> Decimal {
        self.0
    }

    /// Returns `true` if this value is zero.
    pub fn is_zero(&self) -> bool {
        self.0.is_zero()
    }

    /// Returns `true` if this value is strictly greater than zero.
    pub fn is_positive(&self) -> bool {
        self.0 > Decimal::ZERO
    }

    /// Returns `true` if this value is strictly less than zero.
    pub fn is_negative(&self) -> bool {
        self.0 < Decimal::ZERO
    }

    /// Adds two amounts, returning `None` on overflow.
    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(|sum| {
            let mut sum = sum;
            sum.rescale(Self::SCALE);
            Amount(sum)
        })
    }
}

impl FromStr for Amount {
    type Err = ParseAmountError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let trimmed = s.trim();
        let decimal = Decimal::from_str(trimmed)
            .map_err(|_| ParseAmountError::Malformed(trimmed.to_string()))?;
        Amount::exact(decimal).ok_or_else(|| ParseAmountError::TooPrecise(trimmed.to_string()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.4}", self.0)
    }
}

impl Add for Amount {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Amount::round_half_even(self.0 + rhs.0)
    }
}

impl Sub for Amount {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self::Output {
        Amount::round_half_even(self.0 - rhs.0)
    }
}

impl Neg for Amount {
    type Output = Self;

    fn neg(self) -> Self::Output {
        Amount(-self.0)
    }
}

impl Serialize for Amount {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&format!("{:.4}", self.0))
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        Amount::from_str(&s).map_err(serde::de::Error::custom)
    }
}
