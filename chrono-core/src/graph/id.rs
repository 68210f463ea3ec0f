//! Identities and Version Stamps
//!
//! Both identities and versions are drawn from one process-wide monotonic
//! clock. A graph's version stamp and a freestanding stamp minted for an
//! ownerless node are therefore always comparable.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// The shared clock. Starts at 1 so that 0 is never a valid stamp.
static CLOCK: AtomicU64 = AtomicU64::new(1);

fn tick() -> u64 {
    CLOCK.fetch_add(1, Ordering::Relaxed)
}

/// Stable identity shared by every version of the same logical node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ChronoId(u64);

impl ChronoId {
    /// Mint a new unique identity.
    pub fn new() -> Self {
        Self(tick())
    }

    /// Get the raw value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for ChronoId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChronoId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A totally ordered version stamp.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version(u64);

impl Version {
    /// Mint a stamp newer than every stamp minted so far.
    pub fn fresh() -> Self {
        Self(tick())
    }

    /// Get the raw value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl From<u64> for Version {
    fn from(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_unique() {
        let a = ChronoId::new();
        let b = ChronoId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn fresh_versions_increase() {
        let v1 = Version::fresh();
        let _id = ChronoId::new();
        let v2 = Version::fresh();
        assert!(v2 > v1);
    }

    #[test]
    fn stamps_serialize_as_plain_numbers() {
        let version = Version::from(42);
        assert_eq!(serde_json::to_string(&version).unwrap(), "42");
        let back: Version = serde_json::from_str("42").unwrap();
        assert_eq!(back, version);
    }
}
