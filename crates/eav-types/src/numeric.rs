//! Fixed-point decimal used for the `numeric` storage column.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TypeError;

/// Largest supported number of fractional digits.
pub const MAX_SCALE: u32 = 28;

/// A normalized fixed-point decimal: `units * 10^-scale`.
///
/// Trailing fractional zeros are stripped on construction, so `1.50` and `1.5`
/// compare (and hash) equal.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Numeric {
    units: i128,
    scale: u32,
}

impl Numeric {
    /// Build from raw units and scale.
    pub fn new(units: i128, scale: u32) -> Result<Self, TypeError> {
        if scale > MAX_SCALE {
            return Err(TypeError::InvalidNumeric(format!(
                "scale {scale} exceeds {MAX_SCALE}"
            )));
        }
        Ok(Self::normalized(units, scale))
    }

    /// An integral value.
    pub fn from_i64(value: i64) -> Self {
        Self {
            units: value as i128,
            scale: 0,
        }
    }

    fn normalized(mut units: i128, mut scale: u32) -> Self {
        while scale > 0 && units % 10 == 0 {
            units /= 10;
            scale -= 1;
        }
        if units == 0 {
            scale = 0;
        }
        Self { units, scale }
    }

    /// Unscaled integer units.
    pub fn units(&self) -> i128 {
        self.units
    }

    /// Number of fractional digits.
    pub fn scale(&self) -> u32 {
        self.scale
    }

    /// Lossy conversion to `f64`.
    pub fn to_f64(&self) -> f64 {
        self.units as f64 / 10f64.powi(self.scale as i32)
    }
}

impl fmt::Debug for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Numeric({self})")
    }
}

impl fmt::Display for Numeric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.scale == 0 {
            return write!(f, "{}", self.units);
        }
        let sign = if self.units < 0 { "-" } else { "" };
        let digits = self.units.unsigned_abs().to_string();
        let scale = self.scale as usize;
        let padded = if digits.len() <= scale {
            format!("{}{}", "0".repeat(scale - digits.len() + 1), digits)
        } else {
            digits
        };
        let (int, frac) = padded.split_at(padded.len() - scale);
        write!(f, "{sign}{int}.{frac}")
    }
}

impl FromStr for Numeric {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (negative, body) = match trimmed.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, trimmed.strip_prefix('+').unwrap_or(trimmed)),
        };
        let (int, frac) = body.split_once('.').unwrap_or((body, ""));
        let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
        if (int.is_empty() && frac.is_empty()) || !all_digits(int) || !all_digits(frac) {
            return Err(TypeError::InvalidNumeric(s.to_string()));
        }
        let scale = frac.len() as u32;
        if scale > MAX_SCALE {
            return Err(TypeError::InvalidNumeric(s.to_string()));
        }
        let mut units: i128 = 0;
        for b in int.bytes().chain(frac.bytes()) {
            units = units
                .checked_mul(10)
                .and_then(|u| u.checked_add((b - b'0') as i128))
                .ok_or(TypeError::NumericOverflow)?;
        }
        if negative {
            units = -units;
        }
        Ok(Self::normalized(units, scale))
    }
}

impl Serialize for Numeric {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Numeric {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trailing_zeros_are_normalized() {
        let a: Numeric = "1.50".parse().unwrap();
        let b: Numeric = "1.5".parse().unwrap();
        assert_eq!(a, b);
        assert_eq!(a.scale(), 1);
    }

    #[test]
    fn display_pads_small_fractions() {
        assert_eq!(Numeric::new(5, 3).unwrap().to_string(), "0.005");
        assert_eq!(Numeric::new(-1234, 2).unwrap().to_string(), "-12.34");
        assert_eq!(Numeric::from_i64(42).to_string(), "42");
    }

    #[test]
    fn parse_rejects_garbage() {
        assert!("1.2.3".parse::<Numeric>().is_err());
        assert!("abc".parse::<Numeric>().is_err());
        assert!(".".parse::<Numeric>().is_err());
    }

    #[test]
    fn zero_has_zero_scale() {
        let zero: Numeric = "0.000".parse().unwrap();
        assert_eq!(zero, Numeric::default());
    }

    #[test]
    fn excessive_scale_rejected() {
        assert!(Numeric::new(1, MAX_SCALE + 1).is_err());
    }

    #[test]
    fn serde_as_string() {
        let n: Numeric = "99.95".parse().unwrap();
        let json = serde_json::to_string(&n).unwrap();
        assert_eq!(json, "\"99.95\"");
        assert_eq!(serde_json::from_str::<Numeric>(&json).unwrap(), n);
    }
}
