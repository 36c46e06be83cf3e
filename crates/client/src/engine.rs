//! The storage/replication engine boundary.
//!
//! The client only ever talks to an engine through this trait. The embedded
//! implementation is [`LocalCluster`](crate::cluster::LocalCluster); tests
//! wrap engines in [`ChaosEngine`](crate::chaos::ChaosEngine).

use crate::operation::Quorum;
use crate::value::CausalContext;
use siblingkv_common::{ClientId, Location};
use std::time::Duration;

/// One stored version as the engine returns it, still encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawVersion {
    pub value: Vec<u8>,
    pub last_modified_ms: u64,
    pub vtag: String,
}

/// Result of an engine read: zero, one or many versions plus the causal
/// context covering all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchReply {
    pub versions: Vec<RawVersion>,
    pub context: CausalContext,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutRequest {
    pub location: Location,
    pub value: Vec<u8>,
    /// Context from a previous read; empty for a blind write.
    pub context: CausalContext,
    pub writer: ClientId,
    pub quorum: Quorum,
    pub return_body: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutStatus {
    /// The write superseded every version it was based on.
    Stored,
    /// The write was kept alongside concurrent versions (siblings exist).
    Conflict,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PutReply {
    pub status: PutStatus,
    /// Post-write versions, present only when requested.
    pub body: Option<FetchReply>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EngineError {
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),
    #[error("quorum not met: need {needed}, got {got}")]
    QuorumNotMet { needed: usize, got: usize },
    #[error("engine unavailable: {0}")]
    Unavailable(String),
    #[error("malformed request: {0}")]
    Malformed(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl EngineError {
    /// Whether another attempt may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::QuorumNotMet { .. } | Self::Unavailable(_)
        )
    }

    /// Label for metrics.
    pub fn class(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::QuorumNotMet { .. } => "quorum",
            Self::Unavailable(_) => "unavailable",
            Self::Malformed(_) => "malformed",
            Self::Unsupported(_) => "unsupported",
            Self::Storage(_) => "storage",
        }
    }
}

/// Which engine call an attempt made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EngineOp {
    Get,
    Put,
    Delete,
    ListKeys,
}

impl EngineOp {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "get",
            Self::Put => "put",
            Self::Delete => "delete",
            Self::ListKeys => "list_keys",
        }
    }
}

impl std::fmt::Display for EngineOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[async_trait::async_trait]
pub trait Engine: Send + Sync + 'static {
    /// Read every current version of a key.
    async fn get(&self, location: &Location, quorum: Quorum) -> Result<FetchReply, EngineError>;

    /// Write a version, descending from `request.context`.
    async fn put(&self, request: PutRequest) -> Result<PutReply, EngineError>;

    /// Remove every version of a key. Absent keys succeed.
    async fn delete(&self, location: &Location, quorum: Quorum) -> Result<(), EngineError>;

    /// Keys currently held in a bucket, unordered.
    async fn list_keys(&self, bucket: &str) -> Result<Vec<String>, EngineError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        assert!(EngineError::Timeout(Duration::from_millis(5)).is_transient());
        assert!(EngineError::QuorumNotMet { needed: 2, got: 1 }.is_transient());
        assert!(EngineError::Unavailable("down".into()).is_transient());
        assert!(!EngineError::Malformed("empty key".into()).is_transient());
        assert!(!EngineError::Unsupported("mapreduce".into()).is_transient());
        assert!(!EngineError::Storage("disk".into()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let e = EngineError::QuorumNotMet { needed: 3, got: 1 };
        assert_eq!(e.to_string(), "quorum not met: need 3, got 1");
        assert_eq!(e.class(), "quorum");
    }
}
