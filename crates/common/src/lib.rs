//! siblingkv-common: shared types for the siblingkv workspace.
//!
//! Provides the writer identity (`ClientId`) stamped into causal history by
//! an engine, and the `Location` (bucket + key) every operation targets.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use std::fmt;

/// Number of bytes in a client identifier.
pub const CLIENT_ID_BYTES: usize = 4;

// ---------------------------------------------------------------------------
// ClientId
// ---------------------------------------------------------------------------

/// Identity of a writer. Engines use it as the actor in vector clocks, so two
/// clients writing concurrently must not share one.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClientId([u8; CLIENT_ID_BYTES]);

impl ClientId {
    /// Create a `ClientId` from raw bytes.
    pub fn from_bytes(bytes: [u8; CLIENT_ID_BYTES]) -> Self {
        Self(bytes)
    }

    /// Return the raw bytes.
    pub fn as_bytes(&self) -> &[u8; CLIENT_ID_BYTES] {
        &self.0
    }

    /// Generate a random `ClientId`.
    pub fn random() -> Self {
        let mut bytes = [0u8; CLIENT_ID_BYTES];
        rand::thread_rng().fill(&mut bytes);
        Self(bytes)
    }

    /// Derive a stable `ClientId` from a seed (e.g. a host or process name).
    pub fn from_seed(seed: &[u8]) -> Self {
        let hash = Sha1::digest(seed);
        let mut bytes = [0u8; CLIENT_ID_BYTES];
        bytes.copy_from_slice(&hash[..CLIENT_ID_BYTES]);
        Self(bytes)
    }

    /// Parse the hex form produced by `to_hex`.
    pub fn from_hex(s: &str) -> Result<Self, ClientIdError> {
        let raw = hex::decode(s).map_err(|e| ClientIdError::InvalidHex(e.to_string()))?;
        let bytes: [u8; CLIENT_ID_BYTES] = raw
            .as_slice()
            .try_into()
            .map_err(|_| ClientIdError::WrongLength(raw.len()))?;
        Ok(Self(bytes))
    }

    /// Lowercase hex form, used as the vector-clock actor name.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ClientId({})", self)
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ClientIdError {
    #[error("client id is not valid hex: {0}")]
    InvalidHex(String),
    #[error("client id must be {CLIENT_ID_BYTES} bytes, got {0}")]
    WrongLength(usize),
}

// ---------------------------------------------------------------------------
// Location
// ---------------------------------------------------------------------------

/// A key within a bucket. Buckets are namespaces managed by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Location {
    pub bucket: String,
    pub key: String,
}

impl Location {
    pub fn new(bucket: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            key: key.into(),
        }
    }
}

impl fmt::Display for Location {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.bucket, self.key)
    }
}

/// Wall-clock milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
