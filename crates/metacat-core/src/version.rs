//! Entity version numbers
//!
//! Versions are `major.minor` numbers serialized as JSON doubles (`0.1`, `1.0`,
//! `2.3`). They are held as a count of tenths so that comparisons and version
//! history keys are exact.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A semantically versioned entity revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "f64", try_from = "f64")]
pub struct EntityVersion(u64);

impl EntityVersion {
    /// Version assigned to every newly created entity
    pub const INITIAL: EntityVersion = EntityVersion(1);

    pub fn from_tenths(tenths: u64) -> Self {
        Self(tenths)
    }

    pub fn tenths(&self) -> u64 {
        self.0
    }

    pub fn major(&self) -> u64 {
        self.0 / 10
    }

    pub fn minor(&self) -> u64 {
        self.0 % 10
    }

    /// Backward-compatible change: bump the fractional part
    pub fn next_minor(&self) -> Self {
        Self(self.0 + 1)
    }

    /// Backward-incompatible change: next integer, fraction reset
    pub fn next_major(&self) -> Self {
        Self((self.major() + 1) * 10)
    }

    pub fn as_f64(&self) -> f64 {
        self.0 as f64 / 10.0
    }
}

impl Default for EntityVersion {
    fn default() -> Self {
        Self::INITIAL
    }
}

impl fmt::Display for EntityVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major(), self.minor())
    }
}

impl From<EntityVersion> for f64 {
    fn from(v: EntityVersion) -> f64 {
        v.as_f64()
    }
}

impl TryFrom<f64> for EntityVersion {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        if !value.is_finite() || value < 0.0 {
            return Err(format!("Invalid entity version: {}", value));
        }
        Ok(Self((value * 10.0).round() as u64))
    }
}

impl FromStr for EntityVersion {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: f64 = s
            .trim()
            .parse()
            .map_err(|_| format!("Invalid entity version: {}", s))?;
        Self::try_from(value)
    }
}
