use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Position of a write in a repository's global write order.
///
/// A repository hands out one sequence per write from a single monotonic
/// counter, so sequences are unique across every key in the store, not per
/// key. `Sequence(0)` means "nothing written yet"; the first write gets 1.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Sequence(u64);

impl Sequence {
    /// The sequence before any write.
    pub const ZERO: Self = Self(0);

    pub const fn new(value: u64) -> Self {
        Self(value)
    }

    pub const fn get(self) -> u64 {
        self.0
    }

    /// The sequence following this one, or `None` on overflow.
    pub fn checked_next(self) -> Option<Self> {
        self.0.checked_add(1).map(Self)
    }
}

impl fmt::Debug for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sequence({})", self.0)
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for Sequence {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

/// Opaque revision token stamped onto stored objects.
///
/// Callers may only compare resource versions for equality and ordering.
/// The textual form is the decimal sequence of the write that produced the
/// revision, and ordering follows the numeric value rather than the string.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ResourceVersion(Sequence);

impl ResourceVersion {
    /// The sequence this version was derived from.
    pub fn sequence(&self) -> Sequence {
        self.0
    }
}

impl From<Sequence> for ResourceVersion {
    fn from(sequence: Sequence) -> Self {
        Self(sequence)
    }
}

impl FromStr for ResourceVersion {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return Err(TypeError::InvalidResourceVersion(s.to_string()));
        }
        s.parse::<u64>()
            .map(|v| Self(Sequence(v)))
            .map_err(|_| TypeError::InvalidResourceVersion(s.to_string()))
    }
}

impl TryFrom<String> for ResourceVersion {
    type Error = TypeError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceVersion> for String {
    fn from(version: ResourceVersion) -> Self {
        version.to_string()
    }
}

impl fmt::Debug for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResourceVersion({:?})", self.to_string())
    }
}

impl fmt::Display for ResourceVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
