//! Fixed-point money amounts.
//!
//! ## Amount convention
//!
//! All amounts are stored as `i64` in **micro-units** (1e-6 of the currency unit).
//! For example, $100.00 USD = 100_000_000 micro-units.
//!
//! Network statements report revenue with anywhere from 2 to 10 decimals, often
//! with thousands separators or a currency symbol. Parsing rounds to 6 decimals
//! (half away from zero) so that summing thousands of rows never drifts the way
//! binary floating point does.
//!
//! Display always renders exactly 6 decimal places: `100_000_000` → `"100.000000"`.

use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Sub};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Scale factor: 1 currency unit = 1_000_000 micro-units.
pub const MICRO_UNIT_SCALE: i64 = 1_000_000;

const FRACTION_DIGITS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AmountError {
    #[error("invalid amount '{0}'")]
    Invalid(String),
    #[error("amount '{0}' is out of range")]
    Overflow(String),
}

/// A signed amount in micro-units.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Micros(pub i64);

impl Micros {
    pub const ZERO: Micros = Micros(0);

    pub fn from_units(units: i64) -> Self {
        Micros(units.saturating_mul(MICRO_UNIT_SCALE))
    }

    /// Round a floating-point unit amount to micro-units. Non-finite input is zero.
    pub fn from_f64(units: f64) -> Self {
        if !units.is_finite() {
            return Micros::ZERO;
        }
        // `as` saturates at the i64 bounds.
        Micros((units * MICRO_UNIT_SCALE as f64).round() as i64)
    }

    pub fn raw(self) -> i64 {
        self.0
    }

    pub fn as_f64(self) -> f64 {
        self.0 as f64 / MICRO_UNIT_SCALE as f64
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Clamp negative amounts to zero.
    pub fn non_negative(self) -> Self {
        Micros(self.0.max(0))
    }

    /// Multiply by a floating-point factor, rounding to the nearest micro-unit.
    pub fn scale(self, factor: f64) -> Self {
        if !factor.is_finite() {
            return Micros::ZERO;
        }
        Micros((self.0 as f64 * factor).round() as i64)
    }

    /// `self / other` as a float, `None` when `other` is zero.
    pub fn ratio(self, other: Micros) -> Option<f64> {
        if other.0 == 0 {
            None
        } else {
            Some(self.0 as f64 / other.0 as f64)
        }
    }

    /// Parse a statement cell into micro-units.
    ///
    /// Accepts an optional sign or accounting parentheses, a leading currency
    /// symbol, thousands separators, and any number of decimals. Empty cells
    /// parse to zero.
    pub fn parse(input: &str) -> Result<Self, AmountError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Ok(Micros::ZERO);
        }

        let (negative, body) = if let Some(inner) =
            trimmed.strip_prefix('(').and_then(|s| s.strip_suffix(')'))
        {
            (true, inner.trim())
        } else if let Some(rest) = trimmed.strip_prefix('-') {
            (true, rest.trim())
        } else if let Some(rest) = trimmed.strip_prefix('+') {
            (false, rest.trim())
        } else {
            (false, trimmed)
        };

        let body = body.trim_start_matches(['$', '€', '£']).trim();
        let cleaned: String = body.chars().filter(|c| *c != ',' && *c != '_').collect();
        if cleaned.is_empty() {
            return Err(AmountError::Invalid(input.to_string()));
        }

        // Some exports emit scientific notation for tiny eCPM-derived values.
        if cleaned.contains(['e', 'E']) {
            let value: f64 = cleaned
                .parse()
                .map_err(|_| AmountError::Invalid(input.to_string()))?;
            let micros = Micros::from_f64(value);
            return Ok(if negative { Micros(-micros.0) } else { micros });
        }

        let (whole_str, frac_str) = cleaned.split_once('.').unwrap_or((cleaned.as_str(), ""));
        if whole_str.is_empty() && frac_str.is_empty() {
            return Err(AmountError::Invalid(input.to_string()));
        }
        if !whole_str.chars().all(|c| c.is_ascii_digit())
            || !frac_str.chars().all(|c| c.is_ascii_digit())
        {
            return Err(AmountError::Invalid(input.to_string()));
        }

        let whole: i64 = if whole_str.is_empty() {
            0
        } else {
            whole_str
                .parse()
                .map_err(|_| AmountError::Overflow(input.to_string()))?
        };

        let kept = &frac_str[..frac_str.len().min(FRACTION_DIGITS)];
        let padded = format!("{kept:0<FRACTION_DIGITS$}");
        let mut frac: i64 = padded
            .parse()
            .map_err(|_| AmountError::Invalid(input.to_string()))?;
        if let Some(next) = frac_str.as_bytes().get(FRACTION_DIGITS) {
            if *next >= b'5' {
                frac += 1;
            }
        }

        let magnitude = whole
            .checked_mul(MICRO_UNIT_SCALE)
            .and_then(|w| w.checked_add(frac))
            .ok_or_else(|| AmountError::Overflow(input.to_string()))?;

        Ok(Micros(if negative { -magnitude } else { magnitude }))
    }
}

impl fmt::Display for Micros {
    /// Example: 150_420_000 → "150.420000", -1_000 → "-0.001000".
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let abs = self.0.unsigned_abs();
        let whole = abs / MICRO_UNIT_SCALE as u64;
        let frac = abs % MICRO_UNIT_SCALE as u64;
        if self.0 < 0 {
            write!(f, "-{whole}.{frac:06}")
        } else {
            write!(f, "{whole}.{frac:06}")
        }
    }
}

impl Add for Micros {
    type Output = Micros;

    fn add(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Micros {
    fn add_assign(&mut self, rhs: Micros) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Micros {
    type Output = Micros;

    fn sub(self, rhs: Micros) -> Micros {
        Micros(self.0.saturating_sub(rhs.0))
    }
}

impl Sum for Micros {
    fn sum<I: Iterator<Item = Micros>>(iter: I) -> Micros {
        iter.fold(Micros::ZERO, |acc, m| acc + m)
    }
}

impl<'a> Sum<&'a Micros> for Micros {
    fn sum<I: Iterator<Item = &'a Micros>>(iter: I) -> Micros {
        iter.fold(Micros::ZERO, |acc, m| acc + *m)
    }
}
