//! RBT transfer amounts.
//!
//! Amounts are kept as the decimal literal the scenario wrote so that the
//! node binary receives exactly those digits. Precision and balance rules
//! are enforced by the binary, not here.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Maximum decimal places the node binary accepts for a transfer.
pub const MAX_DECIMAL_PLACES: usize = 8;

/// A non-negative decimal RBT amount such as `1.499`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RbtAmount(String);

impl RbtAmount {
    /// Parse a decimal literal.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidAmount` unless `literal` is digits with an
    /// optional fractional part.
    pub fn parse(literal: &str) -> Result<Self> {
        let literal = literal.trim();
        let (whole, fraction) = literal.split_once('.').unwrap_or((literal, ""));
        let digits_only = |s: &str| s.bytes().all(|b| b.is_ascii_digit());

        let valid = !whole.is_empty()
            && digits_only(whole)
            && digits_only(fraction)
            && !literal.ends_with('.');
        if valid {
            Ok(Self(literal.to_string()))
        } else {
            Err(Error::InvalidAmount(literal.to_string()))
        }
    }

    /// Number of digits after the decimal point.
    #[must_use]
    pub fn decimal_places(&self) -> usize {
        self.0.split_once('.').map_or(0, |(_, fraction)| fraction.len())
    }

    /// Whether the amount stays within [`MAX_DECIMAL_PLACES`].
    #[must_use]
    pub fn within_precision(&self) -> bool {
        self.decimal_places() <= MAX_DECIMAL_PLACES
    }

    /// The literal as passed to the binary.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RbtAmount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for RbtAmount {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for RbtAmount {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Self::parse(&value)
    }
}

impl From<RbtAmount> for String {
    fn from(amount: RbtAmount) -> Self {
        amount.0
    }
}
