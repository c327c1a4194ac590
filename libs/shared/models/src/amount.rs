use std::fmt;
use std::str::FromStr;

use serde::{de, Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Monetary amount held as integer minor units (paisa).
///
/// Amounts cross the gateway boundary as decimal text. Comparing two amounts
/// compares their normalised two-decimal representation, never floats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AmountError {
    #[error("amount is empty")]
    Empty,

    #[error("amount '{0}' is not a plain non-negative decimal")]
    Malformed(String),

    #[error("amount '{0}' has more precision than minor units allow")]
    TooPrecise(String),

    #[error("amount '{0}' is out of range")]
    Overflow(String),
}

impl Amount {
    pub const ZERO: Amount = Amount(0);

    pub fn from_minor(minor: i64) -> Self {
        Amount(minor)
    }

    pub fn minor(&self) -> i64 {
        self.0
    }

    /// Parses gateway JSON that may carry the amount as a string or a number.
    /// Numbers are read through their literal text.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, AmountError> {
        match value {
            serde_json::Value::String(text) => text.parse(),
            serde_json::Value::Number(number) => number.to_string().parse(),
            other => Err(AmountError::Malformed(other.to_string())),
        }
    }
}

impl FromStr for Amount {
    type Err = AmountError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let text = raw.trim();
        if text.is_empty() {
            return Err(AmountError::Empty);
        }

        let (units, fraction) = match text.split_once('.') {
            Some((units, fraction)) => (units, fraction),
            None => (text, ""),
        };

        let all_digits = |s: &str| s.bytes().all(|b| b.is_ascii_digit());
        if units.is_empty() || !all_digits(units) || !all_digits(fraction) {
            return Err(AmountError::Malformed(raw.to_string()));
        }
        if text.ends_with('.') {
            return Err(AmountError::Malformed(raw.to_string()));
        }

        // Digits past the second decimal are accepted only when they are zeros.
        let (minor_digits, excess) = fraction.split_at(fraction.len().min(2));
        if excess.bytes().any(|b| b != b'0') {
            return Err(AmountError::TooPrecise(raw.to_string()));
        }

        let units: i64 = units
            .parse()
            .map_err(|_| AmountError::Overflow(raw.to_string()))?;
        let minor: i64 = match minor_digits.len() {
            0 => 0,
            1 => minor_digits.parse::<i64>().unwrap_or(0) * 10,
            _ => minor_digits.parse::<i64>().unwrap_or(0),
        };

        units
            .checked_mul(100)
            .and_then(|v| v.checked_add(minor))
            .map(Amount)
            .ok_or_else(|| AmountError::Overflow(raw.to_string()))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:02}", self.0 / 100, self.0 % 100)
    }
}

impl Serialize for Amount {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Amount {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = serde_json::Value::deserialize(deserializer)?;
        Amount::from_json(&value).map_err(de::Error::custom)
    }
}
