use crate::convert::ConversionError;
use crate::engine::{EngineError, EngineOp};
use crate::resolver::UnresolvedConflict;
use siblingkv_common::Location;

/// Where an operation was aimed: one key, or a whole bucket for listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Key(Location),
    Bucket(String),
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Key(location) => write!(f, "{location}"),
            Self::Bucket(bucket) => write!(f, "{bucket}/*"),
        }
    }
}

impl From<Location> for Target {
    fn from(location: Location) -> Self {
        Self::Key(location)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum KvError {
    #[error("no key specified for {type_name} in bucket {bucket}")]
    NoKeySpecified {
        bucket: String,
        type_name: &'static str,
    },
    #[error(transparent)]
    UnresolvedConflict(#[from] UnresolvedConflict),
    #[error("{op} on {target} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        op: EngineOp,
        target: Target,
        attempts: u32,
        last: EngineError,
    },
    #[error("{op} on {target} failed permanently: {source}")]
    Permanent {
        op: EngineOp,
        target: Target,
        attempts: u32,
        source: EngineError,
    },
    #[error("conversion failed for {target}: {source}")]
    Conversion {
        target: Location,
        source: ConversionError,
    },
    #[error("client is closed")]
    ClientClosed,
}

impl KvError {
    /// Engine attempts made before the error, when the error came from the
    /// engine at all.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            Self::RetriesExhausted { attempts, .. } | Self::Permanent { attempts, .. } => {
                Some(*attempts)
            }
            _ => None,
        }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::UnresolvedConflict(_))
    }

    /// The engine error behind a failed operation.
    pub fn engine_error(&self) -> Option<&EngineError> {
        match self {
            Self::RetriesExhausted { last, .. } => Some(last),
            Self::Permanent { source, .. } => Some(source),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_display() {
        let err = KvError::RetriesExhausted {
            op: EngineOp::Put,
            target: Location::new("carts", "ann").into(),
            attempts: 4,
            last: EngineError::Timeout(Duration::from_millis(10)),
        };
        assert_eq!(
            err.to_string(),
            "put on carts/ann failed after 4 attempts: attempt timed out after 10ms"
        );
        assert_eq!(err.attempts(), Some(4));

        let err = KvError::NoKeySpecified {
            bucket: "carts".into(),
            type_name: "LegacyCart",
        };
        assert_eq!(err.to_string(), "no key specified for LegacyCart in bucket carts");
        assert_eq!(err.attempts(), None);
    }

    #[test]
    fn test_bucket_target() {
        let err = KvError::Permanent {
            op: EngineOp::ListKeys,
            target: Target::Bucket("carts".into()),
            attempts: 1,
            source: EngineError::Unsupported("listing".into()),
        };
        assert!(err.to_string().starts_with("list_keys on carts/* failed permanently"));
        assert!(matches!(err.engine_error(), Some(EngineError::Unsupported(_))));
    }
}
