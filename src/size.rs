// Human readable swap file sizes
// SPDX-License-Identifier: GPL-3.0-or-later

use std::fmt;

use crate::defaults::{MIB, SIZE_DEFAULT_UNIT};
use crate::error::{Result, SwapError};

/// A user supplied size, normalised to a whole number of MiB.
///
/// Grammar: `<number>[<unit>]` where the number may be fractional and the unit
/// is one of `B K M G T P E Z Y` (powers of 1024), optionally followed by `B`
/// or `iB`. `1M`, `1MB` and `1MiB` all mean one mebibyte. A lowercase `b` is
/// only accepted as the whole unit (bytes). Without a unit the size is in GiB.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeSpec {
    raw: String,
    mib: u64,
}

impl SizeSpec {
    pub fn parse(s: &str) -> Result<Self> {
        let raw = s.trim();
        let split = raw
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(raw.len());
        let (number, unit) = raw.split_at(split);
        let unit = unit.trim();

        let invalid = || SwapError::Validation(format!("invalid size '{}'", s));

        if number.is_empty() {
            return Err(invalid());
        }
        let number: f64 = number.parse().map_err(|_| invalid())?;
        let multiplier = unit_multiplier(unit).ok_or_else(|| {
            SwapError::Validation(format!(
                "invalid size unit '{}' in '{}' (use B, K, M, G, T, P, E, Z or Y)",
                unit, s
            ))
        })?;

        let bytes = number * multiplier;
        // Round half to even, as the size is snapped to a whole MiB
        let mib = (bytes / MIB as f64).round_ties_even();
        if !mib.is_finite() || mib > (u64::MAX / MIB) as f64 {
            return Err(SwapError::Validation(format!("size '{}' is too large", s)));
        }

        Ok(Self {
            raw: raw.to_string(),
            mib: mib as u64,
        })
    }

    /// Size in MiB after rounding
    pub fn mib(&self) -> u64 {
        self.mib
    }

    /// Size in bytes, always a multiple of 1 MiB
    pub fn bytes(&self) -> u64 {
        self.mib * MIB
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for SizeSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} MiB)", self.raw, self.mib)
    }
}

fn unit_multiplier(unit: &str) -> Option<f64> {
    if unit == "b" {
        return Some(1.0);
    }

    let mut chars = unit.chars();
    let prefix = match chars.next() {
        Some(c) => c.to_ascii_uppercase(),
        None => SIZE_DEFAULT_UNIT,
    };
    if !matches!(chars.as_str(), "" | "B" | "iB") {
        return None;
    }

    let power = match prefix {
        'B' if chars.as_str().is_empty() => 0,
        'K' => 1,
        'M' => 2,
        'G' => 3,
        'T' => 4,
        'P' => 5,
        'E' => 6,
        'Z' => 7,
        'Y' => 8,
        _ => return None,
    };
    Some(1024f64.powi(power))
}
