//! Survey tile identifiers.

use std::fmt;
use std::str::FromStr;

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("invalid tile id '{0}': expected XXX.YYY or a survey tile name such as CFIS_LSB.XXX.YYY.r")]
pub struct TileIdError(pub String);

/// Coordinate key of a survey tile, always of the form `XXX.YYY`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileId(String);

fn is_key(s: &str) -> bool {
    let bytes = s.as_bytes();
    bytes.len() == 7
        && bytes[3] == b'.'
        && bytes[..3].iter().all(u8::is_ascii_digit)
        && bytes[4..].iter().all(u8::is_ascii_digit)
}

impl TileId {
    /// Parse a bare key (`123.456`) or a survey tile name (`CFIS_LSB.123.456.r`).
    ///
    /// For tile names the key is the seven characters before the `.band` suffix.
    pub fn parse(input: &str) -> Result<Self, TileIdError> {
        let s = input.trim();
        if is_key(s) {
            return Ok(Self(s.to_string()));
        }

        let bytes = s.as_bytes();
        if s.is_ascii()
            && bytes.len() >= 10
            && bytes[bytes.len() - 2] == b'.'
            && bytes[bytes.len() - 10] == b'.'
        {
            let key = &s[s.len() - 9..s.len() - 2];
            if is_key(key) {
                return Ok(Self(key.to_string()));
            }
        }

        Err(TileIdError(input.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Low-surface-brightness stack name of this tile in the r band.
    pub fn survey_name(&self) -> String {
        format!("CFIS_LSB.{}.r", self.0)
    }
}

impl FromStr for TileId {
    type Err = TileIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TileId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
