//! Post ids as arbitrary-precision decimal strings.
//!
//! Ids are snowflakes that already sit close to the edge of what a double can
//! represent exactly, so they are never parsed into a numeric type. Ordering is
//! numeric: shorter strings are smaller, equal lengths compare lexicographically.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::TallyError;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TweetId(String);

impl TweetId {
    /// Parse a decimal id. Leading zeros are stripped so that equal numbers
    /// compare equal; `"000"` becomes `"0"`.
    pub fn parse(raw: &str) -> Result<Self, TallyError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TallyError::InvalidId(raw.to_string()));
        }
        let canonical = trimmed.trim_start_matches('0');
        if canonical.is_empty() {
            return Ok(Self("0".to_string()));
        }
        Ok(Self(canonical.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The larger of two ids under numeric ordering.
    pub fn max_of(a: &TweetId, b: &TweetId) -> TweetId {
        if b > a {
            b.clone()
        } else {
            a.clone()
        }
    }
}

impl Ord for TweetId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0
            .len()
            .cmp(&other.0.len())
            .then_with(|| self.0.cmp(&other.0))
    }
}

impl PartialOrd for TweetId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for TweetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TweetId {
    type Err = TallyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for TweetId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for TweetId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        TweetId::parse(&raw).map_err(serde::de::Error::custom)
    }
}
