// src/model/version.rs

//! Semantic versions attached to algorithms, state vectors and values.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Immutable (bugfix, design, implementation) triple.
///
/// Only `design` and `implementation` take part in staleness decisions; a
/// bugfix bump never forces recomputation. The textual form is
/// `"design.implementation.bugfix"`, which is also the serialized form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    pub bugfix: u32,
    pub design: u32,
    pub implementation: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid version '{input}': expected \"design.implementation.bugfix\"")]
pub struct VersionParseError {
    pub input: String,
}

impl Version {
    pub const fn new(design: u32, implementation: u32, bugfix: u32) -> Self {
        Self {
            bugfix,
            design,
            implementation,
        }
    }

    /// Two versions are compatible when neither design nor implementation
    /// changed.
    pub fn is_compatible(&self, other: &Version) -> bool {
        self.design == other.design && self.implementation == other.implementation
    }
}

/// Whether a persisted result must be recomputed for the declared version.
///
/// An absent record is always stale.
pub fn is_stale(persisted: Option<Version>, declared: Version) -> bool {
    match persisted {
        None => true,
        Some(v) => !v.is_compatible(&declared),
    }
}

impl Ord for Version {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.design, self.implementation, self.bugfix).cmp(&(
            other.design,
            other.implementation,
            other.bugfix,
        ))
    }
}

impl PartialOrd for Version {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.design, self.implementation, self.bugfix)
    }
}

impl FromStr for Version {
    type Err = VersionParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || VersionParseError {
            input: s.to_string(),
        };
        let parts: Vec<&str> = s.trim().split('.').collect();
        if parts.len() != 3 {
            return Err(err());
        }
        let mut nums = [0u32; 3];
        for (slot, part) in nums.iter_mut().zip(parts) {
            *slot = part.parse().map_err(|_| err())?;
        }
        Ok(Version::new(nums[0], nums[1], nums[2]))
    }
}

impl TryFrom<String> for Version {
    type Error = VersionParseError;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<Version> for String {
    fn from(v: Version) -> Self {
        v.to_string()
    }
}
