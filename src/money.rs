//! Fixed-point money values.
//!
//! A [`Money`] is `quantity / 10^scale`, so decimal amounts survive a round
//! trip through the database without float rounding.

use std::fmt;
use std::str::FromStr;

use crate::error::{DbError, DbResult};

/// Largest supported scale; 10^18 still fits in an `i64`.
pub const MAX_SCALE: u8 = 18;

#[derive(Debug, Clone, Copy, Default)]
pub struct Money {
    quantity: i64,
    scale: u8,
}

impl Money {
    pub fn new(quantity: i64, scale: u8) -> DbResult<Self> {
        if scale > MAX_SCALE {
            return Err(DbError::Conversion(format!(
                "money scale {scale} exceeds {MAX_SCALE}"
            )));
        }
        Ok(Self { quantity, scale })
    }

    /// Round a float to `scale` decimal places.
    pub fn from_f64(value: f64, scale: u8) -> DbResult<Self> {
        if !value.is_finite() {
            return Err(DbError::Conversion(format!("cannot represent {value} as money")));
        }
        let scaled = (value * 10f64.powi(i32::from(scale))).round();
        if scaled > i64::MAX as f64 || scaled < i64::MIN as f64 {
            return Err(DbError::Conversion(format!("{value} overflows money")));
        }
        Self::new(scaled as i64, scale)
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn scale(&self) -> u8 {
        self.scale
    }

    pub fn to_f64(&self) -> f64 {
        self.quantity as f64 / 10f64.powi(i32::from(self.scale))
    }

    /// Integer part, truncated toward zero.
    pub fn to_i64(&self) -> i64 {
        self.quantity / 10i64.pow(u32::from(self.scale))
    }

    /// Change the scale. Reducing it rounds half away from zero.
    pub fn rescale(&self, scale: u8) -> DbResult<Self> {
        if scale > MAX_SCALE {
            return Err(DbError::Conversion(format!(
                "money scale {scale} exceeds {MAX_SCALE}"
            )));
        }
        let quantity = if scale >= self.scale {
            let factor = 10i64.pow(u32::from(scale - self.scale));
            self.quantity.checked_mul(factor).ok_or_else(|| {
                DbError::Conversion(format!("{self} overflows at scale {scale}"))
            })?
        } else {
            let factor = 10i64.pow(u32::from(self.scale - scale));
            let half = factor / 2;
            let rem = self.quantity % factor;
            let base = self.quantity / factor;
            if rem.abs() >= half {
                base + self.quantity.signum()
            } else {
                base
            }
        };
        Ok(Self { quantity, scale })
    }

    fn widened(&self, scale: u8) -> i128 {
        i128::from(self.quantity) * 10i128.pow(u32::from(scale - self.scale))
    }
}

impl PartialEq for Money {
    fn eq(&self, other: &Self) -> bool {
        let scale = self.scale.max(other.scale);
        self.widened(scale) == other.widened(scale)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.quantity);
        }
        let factor = 10u64.pow(u32::from(self.scale));
        let abs = self.quantity.unsigned_abs();
        let sign = if self.quantity < 0 { "-" } else { "" };
        write!(
            f,
            "{sign}{}.{:0width$}",
            abs / factor,
            abs % factor,
            width = usize::from(self.scale)
        )
    }
}

impl FromStr for Money {
    type Err = DbError;

    /// Parse decimal text exactly: the scale is the number of digits after
    /// the decimal point.
    fn from_str(s: &str) -> DbResult<Self> {
        let text = s.trim();
        let invalid = || DbError::Conversion(format!("invalid money value '{s}'"));
        let (negative, digits) = match text.as_bytes().first() {
            Some(b'-') => (true, &text[1..]),
            Some(b'+') => (false, &text[1..]),
            _ => (false, text),
        };
        let (int_part, frac_part) = match digits.split_once('.') {
            Some((i, f)) => (i, f),
            None => (digits, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(invalid());
        }
        if !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }
        let scale = u8::try_from(frac_part.len()).map_err(|_| invalid())?;
        if scale > MAX_SCALE {
            return Err(invalid());
        }
        let mut quantity: i64 = 0;
        for b in int_part.bytes().chain(frac_part.bytes()) {
            quantity = quantity
                .checked_mul(10)
                .and_then(|q| q.checked_add(i64::from(b - b'0')))
                .ok_or_else(invalid)?;
        }
        Self::new(if negative { -quantity } else { quantity }, scale)
    }
}
