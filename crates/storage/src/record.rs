//! Storage record format.

use crate::vclock::VClock;
use serde::{Deserialize, Serialize};
use siblingkv_common::now_millis;

/// One version of a key, as held in memory and logged to the WAL.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageRecord {
    pub bucket: String,
    pub key: String,
    /// Causal history of this version.
    pub vclock: VClock,
    /// Value bytes (empty if tombstone).
    pub value: Vec<u8>,
    /// Whether this is a delete tombstone.
    pub tombstone: bool,
    /// Opaque per-version tag, unique per write.
    pub vtag: String,
    /// Wall-clock timestamp (millis since epoch).
    pub timestamp_ms: u64,
}

impl StorageRecord {
    /// Create a live version.
    pub fn new(
        bucket: impl Into<String>,
        key: impl Into<String>,
        value: Vec<u8>,
        vclock: VClock,
        vtag: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            vclock,
            value,
            tombstone: false,
            vtag: vtag.into(),
            timestamp_ms: now_millis(),
        }
    }

    /// Create a tombstone. It supersedes every version its clock descends
    /// from, and is never shown to readers.
    pub fn tombstone(
        bucket: impl Into<String>,
        key: impl Into<String>,
        vclock: VClock,
        vtag: impl Into<String>,
    ) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
            vclock,
            value: Vec::new(),
            tombstone: true,
            vtag: vtag.into(),
            timestamp_ms: now_millis(),
        }
    }
}
