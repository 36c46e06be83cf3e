//! In-memory table of versions, grouped by bucket then key.
//!
//! Every key holds one or more versions. A write that is concurrent with the
//! versions already present becomes a sibling; a write that descends from
//! them replaces them; a write they descend from is dropped. Tombstones are
//! versions too, so a delete keeps superseding older writes that a lagging
//! replica hands back later.

use crate::record::StorageRecord;
use crate::vclock::VClockOrder;
use std::collections::HashMap;

/// What a `put` did to the key's version list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutEffect {
    /// The record was already superseded and was dropped.
    Discarded,
    /// The record was kept; `versions` counts the key's live (non-tombstone)
    /// versions afterwards.
    Stored { versions: usize },
}

#[derive(Debug, Default)]
pub struct Memtable {
    /// bucket -> key -> versions (siblings when more than one).
    data: HashMap<String, HashMap<String, Vec<StorageRecord>>>,
}

impl Memtable {
    pub fn new() -> Self {
        Self::default()
    }

    /// All versions of a key, tombstones included; empty if absent.
    pub fn get(&self, bucket: &str, key: &str) -> Vec<StorageRecord> {
        self.data
            .get(bucket)
            .and_then(|keys| keys.get(key))
            .cloned()
            .unwrap_or_default()
    }

    /// Apply a version under vector-clock rules.
    pub fn put(&mut self, record: StorageRecord) -> PutEffect {
        let versions = self
            .data
            .entry(record.bucket.clone())
            .or_default()
            .entry(record.key.clone())
            .or_default();

        let mut superseded = Vec::new();
        for (i, existing) in versions.iter().enumerate() {
            match record.vclock.compare(&existing.vclock) {
                VClockOrder::DominatedBy => return PutEffect::Discarded,
                // Same history: idempotent rewrite
                VClockOrder::Equal | VClockOrder::Dominates => superseded.push(i),
                VClockOrder::Concurrent => {}
            }
        }

        for i in superseded.into_iter().rev() {
            versions.remove(i);
        }
        versions.push(record);
        PutEffect::Stored {
            versions: versions.iter().filter(|v| !v.tombstone).count(),
        }
    }

    /// Re-apply a WAL entry during recovery.
    pub fn replay(&mut self, record: StorageRecord) {
        self.put(record);
    }

    /// Number of distinct keys across all buckets.
    pub fn len(&self) -> usize {
        self.data.values().map(HashMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Total number of versions across all keys.
    pub fn total_versions(&self) -> usize {
        self.data
            .values()
            .flat_map(HashMap::values)
            .map(Vec::len)
            .sum()
    }

    /// Keys of one bucket with at least one live version, unordered.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.data
            .get(bucket)
            .map(|keys| {
                keys.iter()
                    .filter(|(_, versions)| versions.iter().any(|v| !v.tombstone))
                    .map(|(key, _)| key.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn buckets(&self) -> Vec<String> {
        self.data.keys().cloned().collect()
    }
}
