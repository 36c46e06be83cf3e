//! Vector clocks: the causal history a replica keeps per version.
//!
//! Actors are writer identities (hex client ids). Clients never see a
//! `VClock` directly; it travels as opaque context bytes.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A vector clock: maps actors to monotonic counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VClock {
    entries: BTreeMap<String, u64>,
}

#[derive(Debug, PartialEq, Eq)]
pub enum VClockOrder {
    Equal,
    Dominates,
    DominatedBy,
    Concurrent,
}

impl VClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, u64)>,
        S: Into<String>,
    {
        Self {
            entries: entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }

    /// Counter for an actor (0 if absent).
    pub fn get(&self, actor: &str) -> u64 {
        self.entries.get(actor).copied().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Return a copy with `actor`'s counter bumped by one.
    pub fn increment(&self, actor: &str) -> Self {
        let mut next = self.clone();
        *next.entries.entry(actor.to_string()).or_insert(0) += 1;
        next
    }

    /// Element-wise max.
    pub fn merge(&self, other: &Self) -> Self {
        let mut merged = self.entries.clone();
        for (actor, &count) in &other.entries {
            let slot = merged.entry(actor.clone()).or_insert(0);
            *slot = (*slot).max(count);
        }
        Self { entries: merged }
    }

    pub fn compare(&self, other: &Self) -> VClockOrder {
        let mut self_gte = true;
        let mut other_gte = true;

        let actors = self.entries.keys().chain(other.entries.keys());
        for actor in actors {
            let (mine, theirs) = (self.get(actor), other.get(actor));
            if mine < theirs {
                self_gte = false;
            }
            if theirs < mine {
                other_gte = false;
            }
        }

        match (self_gte, other_gte) {
            (true, true) => VClockOrder::Equal,
            (true, false) => VClockOrder::Dominates,
            (false, true) => VClockOrder::DominatedBy,
            (false, false) => VClockOrder::Concurrent,
        }
    }

    pub fn dominates(&self, other: &Self) -> bool {
        self.compare(other) == VClockOrder::Dominates
    }

    pub fn is_concurrent(&self, other: &Self) -> bool {
        self.compare(other) == VClockOrder::Concurrent
    }

    /// Serialize for use as an opaque causal context.
    pub fn to_bytes(&self) -> Vec<u8> {
        if self.entries.is_empty() {
            return Vec::new();
        }
        // A BTreeMap<String, u64> always serializes.
        serde_json::to_vec(self).unwrap_or_default()
    }

    /// Inverse of `to_bytes`. Empty input is the empty clock.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        if bytes.is_empty() {
            return Ok(Self::new());
        }
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vc(entries: &[(&str, u64)]) -> VClock {
        VClock::from_entries(entries.iter().map(|(k, v)| (*k, *v)))
    }

    #[test]
    fn test_increment() {
        let c1 = VClock::new().increment("a");
        assert_eq!(c1.get("a"), 1);
        let c2 = c1.increment("a").increment("b");
        assert_eq!(c2.get("a"), 2);
        assert_eq!(c2.get("b"), 1);
        // original untouched
        assert_eq!(c1.get("b"), 0);
    }

    #[test]
    fn test_merge() {
        let merged = vc(&[("a", 3), ("b", 1)]).merge(&vc(&[("a", 1), ("b", 5), ("c", 2)]));
        assert_eq!(merged, vc(&[("a", 3), ("b", 5), ("c", 2)]));
    }

    #[test]
    fn test_compare() {
        assert_eq!(vc(&[("a", 1)]).compare(&vc(&[("a", 1)])), VClockOrder::Equal);
        assert_eq!(
            vc(&[("a", 2), ("b", 2)]).compare(&vc(&[("a", 1), ("b", 2)])),
            VClockOrder::Dominates
        );
        assert_eq!(
            vc(&[("a", 1)]).compare(&vc(&[("a", 2)])),
            VClockOrder::DominatedBy
        );
        assert!(vc(&[("a", 1)]).is_concurrent(&vc(&[("b", 1)])));
        assert!(vc(&[("a", 1), ("b", 1)]).dominates(&vc(&[("a", 1)])));
        assert!(vc(&[("a", 1)]).dominates(&VClock::new()));
    }

    #[test]
    fn test_bytes_roundtrip() {
        let clock = vc(&[("0a0b0c0d", 4), ("deadbeef", 1)]);
        let bytes = clock.to_bytes();
        assert_eq!(VClock::from_bytes(&bytes).unwrap(), clock);
    }

    #[test]
    fn test_empty_bytes_is_empty_clock() {
        assert!(VClock::new().to_bytes().is_empty());
        assert!(VClock::from_bytes(&[]).unwrap().is_empty());
        assert!(VClock::from_bytes(b"not json").is_err());
    }
}
