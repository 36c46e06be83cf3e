//! Write-ahead log.
//!
//! Entry layout: `[crc32 le][len u32 le][json payload]\n`. Replay stops at
//! the first truncated or corrupt entry; everything before it is kept.

use crate::record::StorageRecord;
use crc32fast::Hasher;
use std::fs::{File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum WalError {
    #[error("WAL I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("WAL serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// Fsync after every append.
    Always,
    /// Fsync only when `sync` is called.
    Batch,
    /// Leave it to the OS.
    None,
}

impl FsyncPolicy {
    pub fn from_str_config(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "always" => Self::Always,
            "none" => Self::None,
            _ => Self::Batch,
        }
    }
}

#[derive(Debug)]
pub struct Wal {
    writer: BufWriter<File>,
    fsync: FsyncPolicy,
    entries_written: u64,
}

fn checksum(payload: &[u8]) -> u32 {
    let mut hasher = Hasher::new();
    hasher.update(payload);
    hasher.finalize()
}

/// Fill `buf`, or report a clean/short end of file as `Ok(false)`.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<bool> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
        Err(e) => Err(e),
    }
}

impl Wal {
    pub fn open(path: &Path, fsync: FsyncPolicy) -> Result<Self, WalError> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            writer: BufWriter::new(file),
            fsync,
            entries_written: 0,
        })
    }

    pub fn append(&mut self, record: &StorageRecord) -> Result<(), WalError> {
        let payload = serde_json::to_vec(record)?;
        let len = payload.len() as u32;

        self.writer.write_all(&checksum(&payload).to_le_bytes())?;
        self.writer.write_all(&len.to_le_bytes())?;
        self.writer.write_all(&payload)?;
        self.writer.write_all(b"\n")?;
        self.writer.flush()?;

        if self.fsync == FsyncPolicy::Always {
            self.writer.get_ref().sync_all()?;
        }

        self.entries_written += 1;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<(), WalError> {
        self.writer.flush()?;
        self.writer.get_ref().sync_all()?;
        Ok(())
    }

    /// Entries appended since open.
    pub fn entries_written(&self) -> u64 {
        self.entries_written
    }

    /// Read back every intact entry in append order.
    pub fn replay(path: &Path) -> Result<Vec<StorageRecord>, WalError> {
        let file = match File::open(path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut reader = BufReader::new(file);
        let mut records = Vec::new();

        loop {
            let mut header = [0u8; 8];
            if !read_full(&mut reader, &mut header)? {
                break;
            }
            let expected = u32::from_le_bytes([header[0], header[1], header[2], header[3]]);
            let len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as usize;

            // payload plus trailing newline
            let mut body = vec![0u8; len + 1];
            if !read_full(&mut reader, &mut body)? {
                tracing::warn!(
                    "WAL truncated inside entry {}; stopping replay",
                    records.len()
                );
                break;
            }
            let payload = &body[..len];

            let actual = checksum(payload);
            if actual != expected {
                tracing::warn!(
                    "WAL CRC mismatch at entry {}: expected {:#010x}, got {:#010x}; stopping replay",
                    records.len(),
                    expected,
                    actual
                );
                break;
            }

            records.push(serde_json::from_slice(payload)?);
        }

        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vclock::VClock;
    use tempfile::TempDir;

    fn record(key: &str, value: &str) -> StorageRecord {
        StorageRecord::new("b", key, value.as_bytes().to_vec(), VClock::new().increment("a"), "t")
    }

    #[test]
    fn test_append_and_replay() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.wal");

        {
            let mut wal = Wal::open(&path, FsyncPolicy::Always).unwrap();
            for i in 0..3 {
                wal.append(&record(&format!("k{}", i), "v")).unwrap();
            }
            assert_eq!(wal.entries_written(), 3);
        }

        let records = Wal::replay(&path).unwrap();
        let keys: Vec<&str> = records.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["k0", "k1", "k2"]);
        assert_eq!(records[0].vclock.get("a"), 1);
    }

    #[test]
    fn test_replay_missing_file() {
        let dir = TempDir::new().unwrap();
        assert!(Wal::replay(&dir.path().join("absent.wal")).unwrap().is_empty());
    }

    #[test]
    fn test_replay_stops_at_truncated_tail() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trunc.wal");

        {
            let mut wal = Wal::open(&path, FsyncPolicy::Always).unwrap();
            wal.append(&record("k1", "v1")).unwrap();
            wal.append(&record("k2", "v2")).unwrap();
            wal.append(&record("k3", "v3")).unwrap();
        }
        {
            let file = OpenOptions::new().write(true).open(&path).unwrap();
            let len = file.metadata().unwrap().len();
            file.set_len(len - 5).unwrap();
        }

        let records = Wal::replay(&path).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].key, "k2");
    }

    #[test]
    fn test_replay_stops_at_corrupt_checksum() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("crc.wal");

        {
            let mut wal = Wal::open(&path, FsyncPolicy::Always).unwrap();
            wal.append(&record("k1", "v1")).unwrap();
            wal.append(&record("k2", "v2")).unwrap();
        }
        {
            // Flip the first byte of the second entry's CRC
            let mut bytes = std::fs::read(&path).unwrap();
            let first_len = u32::from_le_bytes(bytes[4..8].try_into().unwrap()) as usize;
            let second = 8 + first_len + 1;
            bytes[second] ^= 0xff;
            std::fs::write(&path, bytes).unwrap();
        }

        let records = Wal::replay(&path).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "k1");
    }

    #[test]
    fn test_tombstone_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("tomb.wal");

        {
            let mut wal = Wal::open(&path, FsyncPolicy::None).unwrap();
            let clock = VClock::new().increment("a").increment("a");
            wal.append(&StorageRecord::tombstone("b", "k1", clock, "t")).unwrap();
        }

        let records = Wal::replay(&path).unwrap();
        assert!(records[0].tombstone);
        assert!(records[0].value.is_empty());
        assert_eq!(records[0].vclock.get("a"), 2);
    }
}
