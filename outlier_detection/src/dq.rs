//! Data-quality bit definitions and `good_bits` expressions.
//!
//! A DQ plane holds one `u32` per pixel; each set bit names a defect or a
//! flag. A [`DqBits`] value is a set of bits, parsed either from an integer
//! or from an expression of flag names such as `"~DO_NOT_USE+NON_SCIENCE"`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

pub const GOOD: u32 = 0;
pub const DO_NOT_USE: u32 = 1 << 0;
pub const SATURATED: u32 = 1 << 1;
pub const JUMP_DET: u32 = 1 << 2;
pub const DROPOUT: u32 = 1 << 3;
pub const OUTLIER: u32 = 1 << 4;
pub const PERSISTENCE: u32 = 1 << 5;
pub const AD_FLOOR: u32 = 1 << 6;
pub const UNRELIABLE_ERROR: u32 = 1 << 8;
pub const NON_SCIENCE: u32 = 1 << 9;
pub const DEAD: u32 = 1 << 10;
pub const HOT: u32 = 1 << 11;
pub const WARM: u32 = 1 << 12;
pub const LOW_QE: u32 = 1 << 13;

const NAMED: &[(&str, u32)] = &[
    ("GOOD", GOOD),
    ("DO_NOT_USE", DO_NOT_USE),
    ("SATURATED", SATURATED),
    ("JUMP_DET", JUMP_DET),
    ("DROPOUT", DROPOUT),
    ("OUTLIER", OUTLIER),
    ("PERSISTENCE", PERSISTENCE),
    ("AD_FLOOR", AD_FLOOR),
    ("UNRELIABLE_ERROR", UNRELIABLE_ERROR),
    ("NON_SCIENCE", NON_SCIENCE),
    ("DEAD", DEAD),
    ("HOT", HOT),
    ("WARM", WARM),
    ("LOW_QE", LOW_QE),
];

/// Look up a flag by name (case-insensitive).
pub fn flag_by_name(name: &str) -> Option<u32> {
    NAMED
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|&(_, bits)| bits)
}

/// A set of DQ bits.
///
/// Used both for `good_bits` (bits tolerated when building resampling
/// weights) and for `flag_bits` (bits written for detected outliers).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct DqBits(pub u32);

impl DqBits {
    /// Every bit tolerated; no pixel is rejected.
    pub const ALL: DqBits = DqBits(u32::MAX);

    #[inline]
    pub fn bits(self) -> u32 {
        self.0
    }

    /// A pixel is good when it carries no bit outside `self`.
    #[inline]
    pub fn is_good(self, dq: u32) -> bool {
        dq & !self.0 == 0
    }
}

impl Serialize for DqBits {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.0)
    }
}

impl<'de> Deserialize<'de> for DqBits {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Int(u32),
            Expr(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Int(bits) => Ok(DqBits(bits)),
            Raw::Expr(expr) => expr.parse().map_err(serde::de::Error::custom),
        }
    }
}

/// Error from parsing a DQ bit expression.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseDqBitsError {
    #[error("unknown DQ flag '{0}'")]
    UnknownFlag(String),
    #[error("empty DQ flag term in '{0}'")]
    EmptyTerm(String),
}

impl FromStr for DqBits {
    type Err = ParseDqBitsError;

    /// Parse an integer or a `+`/`,`/`|` separated list of flag names or
    /// integers. A leading `~` inverts the whole set. `"None"` (or an empty
    /// string) tolerates every bit.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("none") {
            return Ok(DqBits::ALL);
        }

        let (invert, body) = match trimmed.strip_prefix('~') {
            Some(rest) => (true, rest.trim()),
            None => (false, trimmed),
        };

        let mut bits = 0u32;
        for term in body.split(['+', ',', '|']) {
            let term = term.trim();
            if term.is_empty() {
                return Err(ParseDqBitsError::EmptyTerm(s.to_string()));
            }
            bits |= match term.parse::<u32>() {
                Ok(value) => value,
                Err(_) => flag_by_name(term)
                    .ok_or_else(|| ParseDqBitsError::UnknownFlag(term.to_string()))?,
            };
        }

        Ok(DqBits(if invert { !bits } else { bits }))
    }
}

impl fmt::Display for DqBits {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}
