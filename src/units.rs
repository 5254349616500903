//! Size-string parsing.
//!
//! Share sizes are written as `<number><unit>` ("100MB", "2GB"). Units are
//! binary multiples: 1 KB is 1/1024 MB, 1 GB is 1024 MB, and so on up to PB.

use crate::error::{Error, Result};
use std::str::FromStr;

/// Units accepted in size strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SizeUnit {
    B,
    KB,
    MB,
    GB,
    TB,
    PB,
}

impl SizeUnit {
    /// Multiplier from this unit to megabytes.
    pub fn to_mb(self) -> f64 {
        match self {
            SizeUnit::B => 1.0 / (1024.0 * 1024.0),
            SizeUnit::KB => 1.0 / 1024.0,
            SizeUnit::MB => 1.0,
            SizeUnit::GB => 1024.0,
            SizeUnit::TB => 1024.0 * 1024.0,
            SizeUnit::PB => 1024.0 * 1024.0 * 1024.0,
        }
    }
}

impl FromStr for SizeUnit {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "B" => Ok(SizeUnit::B),
            "KB" => Ok(SizeUnit::KB),
            "MB" => Ok(SizeUnit::MB),
            "GB" => Ok(SizeUnit::GB),
            "TB" => Ok(SizeUnit::TB),
            "PB" => Ok(SizeUnit::PB),
            other => Err(format!(
                "unsupported unit: {} (supported: B, KB, MB, GB, TB, PB)",
                other
            )),
        }
    }
}

/// Parse a size string like "500KB" or "2GB" into megabytes.
pub fn parse_size_mb(input: &str) -> Result<f64> {
    let trimmed = input.trim();

    let unit_start = trimmed
        .find(|c: char| c.is_ascii_alphabetic())
        .ok_or_else(|| Error::invalid_size(input, "missing unit"))?;

    let (number, unit) = trimmed.split_at(unit_start);
    let number = number.trim();
    if number.is_empty() {
        return Err(Error::invalid_size(input, "missing number"));
    }

    let value: f64 = number
        .parse()
        .map_err(|_| Error::invalid_size(input, format!("invalid number: {}", number)))?;
    if value < 0.0 {
        return Err(Error::invalid_size(input, "size cannot be negative"));
    }

    let unit: SizeUnit = unit
        .trim()
        .parse()
        .map_err(|reason: String| Error::invalid_size(input, reason))?;

    Ok(value * unit.to_mb())
}

/// Parse a size string into whole megabytes, truncating any fraction.
pub fn parse_size_mb_u64(input: &str) -> Result<u64> {
    Ok(parse_size_mb(input)? as u64)
}
