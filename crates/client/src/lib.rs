//! Sibling-aware client for an eventually consistent, replicated KV store.
//!
//! Provides: typed buckets over a pluggable [`Engine`], quorum/retry/timeout
//! per operation, and conflict resolvers that collapse concurrent versions
//! (siblings) into one value. [`LocalCluster`] is an embedded N-replica
//! engine for tests and single-process use.

pub mod bucket;
pub mod chaos;
pub mod client;
pub mod cluster;
pub mod convert;
pub mod engine;
pub mod error;
pub mod operation;
pub mod pool;
pub mod resolver;
pub mod retry;
pub mod value;

pub use bucket::Bucket;
pub use chaos::{ChaosConfig, ChaosEngine};
pub use client::KvClient;
pub use cluster::{ClusterConfig, LocalCluster};
pub use convert::{
    BytesConverter, ConversionError, Converter, JsonConverter, KeyedObject, StringConverter,
};
pub use engine::{
    Engine, EngineError, EngineOp, FetchReply, PutReply, PutRequest, PutStatus, RawVersion,
};
pub use error::{KvError, Target};
pub use operation::{Backoff, OperationConfig, Quorum};
pub use pool::ConnectionPool;
pub use resolver::{
    ConflictResolver, LastWriterWins, Manual, ResolverStrategy, SetLike, SetStrategy,
    UnionMerge, UnresolvedConflict,
};
pub use retry::OpState;
pub use value::{CausalContext, Fetched, Sibling, SiblingSet};

pub use siblingkv_common::{ClientId, Location};
