//! Kubernetes resource quantities for storage sizes.
//!
//! Sizes are handled as whole bytes. Fractional results round up, which
//! matches how the API server resolves a quantity to an integer value.

use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub const KIB: u64 = 1 << 10;
pub const MIB: u64 = 1 << 20;
pub const GIB: u64 = 1 << 30;
pub const TIB: u64 = 1 << 40;

const BINARY_SUFFIXES: [(&str, u32); 6] = [
    ("Ki", 10),
    ("Mi", 20),
    ("Gi", 30),
    ("Ti", 40),
    ("Pi", 50),
    ("Ei", 60),
];

const DECIMAL_SUFFIXES: [(&str, u32); 6] = [
    ("k", 3),
    ("M", 6),
    ("G", 9),
    ("T", 12),
    ("P", 15),
    ("E", 18),
];

/// Errors from parsing quantities and expansion steps
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuantityError {
    #[error("quantity is empty")]
    Empty,

    #[error("invalid quantity {0:?}")]
    Invalid(String),

    #[error("quantity {0:?} must not be negative")]
    Negative(String),

    #[error("quantity {0:?} is too large")]
    Overflow(String),

    #[error("invalid step {value:?}: {reason}")]
    InvalidStep { value: String, reason: &'static str },
}

/// Parse a quantity such as "10Gi", "2.5Gi", "500M" or "1e9" into bytes
pub fn parse_quantity(input: &str) -> Result<u64, QuantityError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(QuantityError::Empty);
    }

    let split = s
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == '+' || c == '-'))
        .unwrap_or(s.len());
    let (number, suffix) = s.split_at(split);

    let number = match number.strip_prefix('-') {
        Some(_) => return Err(QuantityError::Negative(input.to_string())),
        None => number.strip_prefix('+').unwrap_or(number),
    };

    let (int_part, frac_part) = match number.split_once('.') {
        Some((i, f)) => (i, f),
        None => (number, ""),
    };
    if (int_part.is_empty() && frac_part.is_empty())
        || !int_part.chars().all(|c| c.is_ascii_digit())
        || !frac_part.chars().all(|c| c.is_ascii_digit())
    {
        return Err(QuantityError::Invalid(input.to_string()));
    }

    let overflow = || QuantityError::Overflow(input.to_string());
    let (numerator_scale, denominator_scale) = suffix_scale(suffix, input)?;

    let digits = format!("{int_part}{frac_part}");
    let mantissa: u128 = digits.parse().map_err(|_| overflow())?;
    let frac_len = u32::try_from(frac_part.len()).map_err(|_| overflow())?;

    let numerator = mantissa.checked_mul(numerator_scale).ok_or_else(overflow)?;
    let denominator = 10u128
        .checked_pow(frac_len)
        .and_then(|p| p.checked_mul(denominator_scale))
        .ok_or_else(overflow)?;

    let bytes = numerator.div_ceil(denominator);
    u64::try_from(bytes).map_err(|_| overflow())
}

/// Multiplier as (numerator, denominator) for a quantity suffix
fn suffix_scale(suffix: &str, input: &str) -> Result<(u128, u128), QuantityError> {
    if suffix.is_empty() {
        return Ok((1, 1));
    }
    if suffix == "m" {
        return Ok((1, 1000));
    }
    if let Some((_, shift)) = BINARY_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Ok((1u128 << shift, 1));
    }
    if let Some((_, exp)) = DECIMAL_SUFFIXES.iter().find(|(s, _)| *s == suffix) {
        return Ok((10u128.pow(*exp), 1));
    }

    // Decimal exponent form: "1e9", "5E3", "1e-3"
    let invalid = || QuantityError::Invalid(input.to_string());
    let exponent = suffix
        .strip_prefix('e')
        .or_else(|| suffix.strip_prefix('E'))
        .ok_or_else(invalid)?;
    let exponent: i32 = exponent.parse().map_err(|_| invalid())?;
    let scale = 10u128
        .checked_pow(exponent.unsigned_abs())
        .ok_or_else(|| QuantityError::Overflow(input.to_string()))?;
    if exponent >= 0 {
        Ok((scale, 1))
    } else {
        Ok((1, scale))
    }
}

/// Format bytes using the largest binary suffix that divides them exactly
pub fn format_quantity(bytes: u64) -> String {
    if bytes == 0 {
        return "0".to_string();
    }
    for (suffix, shift) in BINARY_SUFFIXES.iter().rev() {
        let unit = 1u64 << shift;
        if bytes % unit == 0 {
            return format!("{}{}", bytes / unit, suffix);
        }
    }
    bytes.to_string()
}

/// Growth per expansion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Percentage of the current size, 1-100
    Percent(u32),
    /// Absolute number of bytes
    Absolute(u64),
}

impl Step {
    pub fn is_percent(&self) -> bool {
        matches!(self, Step::Percent(_))
    }
}

impl FromStr for Step {
    type Err = QuantityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let invalid = |reason| QuantityError::InvalidStep {
            value: s.to_string(),
            reason,
        };

        if let Some(pct) = trimmed.strip_suffix('%') {
            let pct: u32 = pct
                .trim()
                .parse()
                .map_err(|_| invalid("percentage must be a whole number"))?;
            return match pct {
                0 => Err(invalid("percentage must be greater than 0")),
                1..=100 => Ok(Step::Percent(pct)),
                _ => Err(invalid("percentage must not exceed 100")),
            };
        }

        match parse_quantity(trimmed) {
            Ok(0) => Err(invalid("absolute step must be greater than 0")),
            Ok(bytes) => Ok(Step::Absolute(bytes)),
            Err(_) => Err(invalid("must be a percentage or a quantity")),
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Percent(p) => write!(f, "{}%", p),
            Step::Absolute(b) => f.write_str(&format_quantity(*b)),
        }
    }
}
