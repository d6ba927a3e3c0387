//! # Money Module
//!
//! Integer minor-unit amounts for catalog prices and order totals.
//!
//! ## Why Integer Money?
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  Marketplace JSON:  "listPrice": 129.9                                 │
//! │       │                                                                 │
//! │       ▼  parsed as text, never as f64                                  │
//! │  Money(12990)  ──► products.price_cents                                │
//! │       │                                                                 │
//! │       ▼  rendered only at the API boundary                             │
//! │  "listPrice": 129.9                                                    │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use mercato_core::money::Money;
//!
//! let price = Money::parse_decimal("129.9").unwrap();
//! assert_eq!(price.cents(), 12990);
//! assert_eq!(price.to_string(), "129.90");
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::error::CoreError;

/// A monetary value in the smallest currency unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Money(i64);

impl Money {
    /// Zero.
    pub const ZERO: Money = Money(0);

    /// Creates a Money value from minor units.
    #[inline]
    pub const fn from_cents(cents: i64) -> Self {
        Money(cents)
    }

    /// Returns the value in minor units.
    #[inline]
    pub const fn cents(&self) -> i64 {
        self.0
    }

    /// Parses a decimal string such as `"129.90"`, `"5"` or `"-3.5"`.
    ///
    /// More than two fractional digits are rejected rather than rounded.
    pub fn parse_decimal(text: &str) -> Result<Self, CoreError> {
        let invalid = |reason: &str| CoreError::InvalidAmount {
            value: text.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = text.trim();
        let (negative, digits) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let (major, minor) = match digits.split_once('.') {
            Some((major, minor)) => (major, minor),
            None => (digits, ""),
        };

        if major.is_empty() && minor.is_empty() {
            return Err(invalid("empty amount"));
        }
        if !major.chars().all(|c| c.is_ascii_digit()) || !minor.chars().all(|c| c.is_ascii_digit())
        {
            return Err(invalid("not a decimal number"));
        }
        if minor.len() > 2 {
            // "12.500" is still exact
            if minor[2..].chars().any(|c| c != '0') {
                return Err(invalid("more than two fractional digits"));
            }
        }

        let major_value: i64 = if major.is_empty() {
            0
        } else {
            major.parse().map_err(|_| invalid("amount too large"))?
        };
        let minor_value: i64 = match minor.len() {
            0 => 0,
            1 => minor.parse::<i64>().map_err(|_| invalid("bad fraction"))? * 10,
            _ => minor[..2].parse().map_err(|_| invalid("bad fraction"))?,
        };

        let cents = major_value
            .checked_mul(100)
            .and_then(|v| v.checked_add(minor_value))
            .ok_or_else(|| invalid("amount too large"))?;

        Ok(Money(if negative { -cents } else { cents }))
    }

    /// Reads an amount from a JSON number or numeric string.
    ///
    /// Numbers are converted through their textual form so `129.9` stays
    /// exactly 12990 minor units.
    pub fn from_json(value: &Value) -> Result<Self, CoreError> {
        match value {
            Value::Number(n) => Money::parse_decimal(&n.to_string()),
            Value::String(s) => Money::parse_decimal(s),
            other => Err(CoreError::InvalidAmount {
                value: other.to_string(),
                reason: "expected a number".to_string(),
            }),
        }
    }

    /// Renders the amount as a JSON number for marketplace request bodies.
    pub fn to_json_number(&self) -> Value {
        serde_json::Number::from_f64(self.0 as f64 / 100.0)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{}{}.{:02}", sign, abs / 100, abs % 100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_decimal() {
        assert_eq!(Money::parse_decimal("129.90").unwrap().cents(), 12990);
        assert_eq!(Money::parse_decimal("129.9").unwrap().cents(), 12990);
        assert_eq!(Money::parse_decimal("5").unwrap().cents(), 500);
        assert_eq!(Money::parse_decimal(".5").unwrap().cents(), 50);
        assert_eq!(Money::parse_decimal("-3.25").unwrap().cents(), -325);
        assert_eq!(Money::parse_decimal("12.500").unwrap().cents(), 1250);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(Money::parse_decimal("").is_err());
        assert!(Money::parse_decimal("abc").is_err());
        assert!(Money::parse_decimal("1.234").is_err());
        assert!(Money::parse_decimal("1,50").is_err());
    }

    #[test]
    fn test_from_json_number_is_exact() {
        assert_eq!(Money::from_json(&json!(129.9)).unwrap().cents(), 12990);
        assert_eq!(Money::from_json(&json!(0.1)).unwrap().cents(), 10);
        assert_eq!(Money::from_json(&json!("99.99")).unwrap().cents(), 9999);
        assert!(Money::from_json(&json!(null)).is_err());
    }

    #[test]
    fn test_display_and_json_number() {
        assert_eq!(Money::from_cents(1099).to_string(), "10.99");
        assert_eq!(Money::from_cents(-550).to_string(), "-5.50");
        assert_eq!(Money::from_cents(12990).to_json_number(), json!(129.9));
    }
}
