//! Replica storage for the siblingkv reference engine: WAL + memtable.
//!
//! Records are `{bucket, key, vclock, value, tombstone, vtag, timestamp}`.
//! Concurrent versions of a key are kept side by side as siblings.

pub mod engine;
pub mod memtable;
pub mod record;
pub mod vclock;
pub mod wal;

pub use engine::{StorageEngine, StorageError};
pub use memtable::PutEffect;
pub use record::StorageRecord;
pub use vclock::{VClock, VClockOrder};
pub use wal::FsyncPolicy;
