//! Version model for the versioned dialect.
//!
//! A `Version` identifies a point in the evolution of the wire schema; a
//! `VersionRange` is the inclusive window in which a construct's wire shape
//! is guaranteed stable. The range's upper bound may be `Current`, which
//! tracks the live toolchain version and compares greater than any fixed
//! version.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::Error;

/// A point in the evolution of the versioned dialect.
///
/// Ordering is lexicographic on `(major, minor, patch)`, which the derived
/// `Ord` provides given the field declaration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version {
    pub major: u64,
    pub minor: u64,
    pub patch: u64,
}

impl Version {
    pub const fn new(major: u64, minor: u64, patch: u64) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a dotted triple such as `1.3.0`.
    pub fn parse(text: &str) -> Result<Self, Error> {
        let malformed = |reason: &str| Error::MalformedVersion {
            text: text.to_string(),
            reason: reason.to_string(),
        };

        let parts: Vec<&str> = text.split('.').collect();
        if parts.len() != 3 {
            return Err(malformed("expected three dot-separated components"));
        }

        let mut nums = [0u64; 3];
        for (slot, part) in nums.iter_mut().zip(&parts) {
            if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
                return Err(malformed("components must be non-empty decimal numbers"));
            }
            *slot = part
                .parse()
                .map_err(|_| malformed("component out of range"))?;
        }

        Ok(Self::new(nums[0], nums[1], nums[2]))
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

/// Upper bound of a `VersionRange`.
///
/// `Current` is resolved against the toolchain's build version and treated
/// as +infinity for containment; it is never stored literally on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VersionBound {
    Fixed(Version),
    Current,
}

impl VersionBound {
    /// True if `v` is at or below this bound.
    pub fn admits(&self, v: &Version) -> bool {
        match self {
            VersionBound::Fixed(max) => v <= max,
            VersionBound::Current => true,
        }
    }
}

impl fmt::Display for VersionBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionBound::Fixed(v) => write!(f, "{}", v),
            VersionBound::Current => write!(f, "current"),
        }
    }
}

/// Inclusive `[min, max]` window of schema versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct VersionRange {
    pub min: Version,
    pub max: VersionBound,
}

impl VersionRange {
    pub const fn new(min: Version, max: VersionBound) -> Self {
        Self { min, max }
    }

    /// A range open at the top: `[min, current]`.
    pub const fn since(min: Version) -> Self {
        Self {
            min,
            max: VersionBound::Current,
        }
    }

    /// A range frozen at a fixed upper bound: `[min, max]`.
    pub const fn between(min: Version, max: Version) -> Self {
        Self {
            min,
            max: VersionBound::Fixed(max),
        }
    }

    /// True if `v` lies inside the window.
    pub fn contains(&self, v: &Version) -> bool {
        *v >= self.min && self.max.admits(v)
    }

    /// True if `min <= max`, with `Current` treated as +infinity.
    pub fn is_well_formed(&self) -> bool {
        self.max.admits(&self.min)
    }

    /// True if the two windows share at least one version.
    pub fn overlaps(&self, other: &VersionRange) -> bool {
        self.max.admits(&other.min) && other.max.admits(&self.min)
    }
}

impl fmt::Display for VersionRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {}]", self.min, self.max)
    }
}

/// The three kinds of versioned construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ConstructKind {
    Op,
    Attr,
    Type,
}

impl fmt::Display for ConstructKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConstructKind::Op => "op",
            ConstructKind::Attr => "attr",
            ConstructKind::Type => "type",
        };
        write!(f, "{}", name)
    }
}
