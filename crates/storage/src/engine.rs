//! Replica storage engine: WAL for durability, memtable for reads.
//!
//! All operations are synchronous. The async boundary is the caller's.

use crate::memtable::{Memtable, PutEffect};
use crate::record::StorageRecord;
use crate::wal::{FsyncPolicy, Wal, WalError};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("WAL error: {0}")]
    Wal(#[from] WalError),
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug)]
pub struct StorageEngine {
    memtable: Memtable,
    wal: Wal,
}

impl StorageEngine {
    /// Open or create an engine in `data_dir`, replaying its WAL.
    pub fn open(data_dir: &Path, fsync: FsyncPolicy) -> Result<Self, StorageError> {
        std::fs::create_dir_all(data_dir)?;
        let wal_path = data_dir.join("wal.log");

        let mut memtable = Memtable::new();
        for record in Wal::replay(&wal_path)? {
            memtable.replay(record);
        }
        let wal = Wal::open(&wal_path, fsync)?;

        tracing::info!(
            "storage engine opened: {} keys, {} versions recovered from {:?}",
            memtable.len(),
            memtable.total_versions(),
            wal_path
        );

        Ok(Self { memtable, wal })
    }

    /// All versions of a key.
    pub fn get(&self, bucket: &str, key: &str) -> Vec<StorageRecord> {
        self.memtable.get(bucket, key)
    }

    /// Log then apply a version or tombstone.
    pub fn put(&mut self, record: StorageRecord) -> Result<PutEffect, StorageError> {
        self.wal.append(&record)?;
        Ok(self.memtable.put(record))
    }

    /// Keys with at least one live version.
    pub fn keys(&self, bucket: &str) -> Vec<String> {
        self.memtable.keys(bucket)
    }

    pub fn buckets(&self) -> Vec<String> {
        self.memtable.buckets()
    }

    pub fn key_count(&self) -> usize {
        self.memtable.len()
    }

    pub fn version_count(&self) -> usize {
        self.memtable.total_versions()
    }

    /// Flush the WAL to disk (for batch fsync mode).
    pub fn sync(&mut self) -> Result<(), StorageError> {
        self.wal.sync()?;
        Ok(())
    }
}
