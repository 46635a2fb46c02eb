//! Content-addressed chunk storage, keyed by lowercase hex BLAKE3 digest.

use crate::hash::{digests_equal, to_hex, DIGEST_LEN};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Default chunk size used by the fixed-size chunker.
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// A content-addressed chunk identified by its BLAKE3 hash, hex-encoded.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChunkHash(pub String);

impl ChunkHash {
    pub fn new(hash: String) -> Self {
        Self(hash)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_bytes(data: &[u8]) -> Self {
        Self(hex::encode(blake3::hash(data).as_bytes()))
    }
}

impl std::fmt::Display for ChunkHash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata about a chunk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkInfo {
    pub hash: ChunkHash,
    pub size: u64,
}

/// Outcome of a `put`: whether the blob was newly written or already present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    Inserted,
    Existed,
}

/// Aggregate statistics over the chunk store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ChunkStoreStats {
    pub count: u64,
    pub total_size: u64,
}

/// Durable, content-addressed blob storage. Layout is
/// `<root>/chunks/<aa>/<bb>/<hex>` where `<aa><bb>` are the first four hex
/// chars of the hash, giving O(1) lookup without one giant flat directory.
#[derive(Debug)]
pub struct ChunkStore {
    chunks_path: PathBuf,
}

impl ChunkStore {
    pub fn new<P: AsRef<Path>>(root_path: P) -> Result<Self> {
        let chunks_path = root_path.as_ref().join("chunks");
        fs::create_dir_all(&chunks_path)?;
        Ok(Self { chunks_path })
    }

    /// Idempotent put. If a blob already exists at `hash`, its content is
    /// re-hashed and compared; a mismatch fails with `IntegrityError` rather
    /// than overwriting (last-writer-wins requires bit-for-bit equality).
    pub fn put(&self, hash: &ChunkHash, bytes: &[u8]) -> Result<PutOutcome> {
        let chunk_path = self.chunk_path(hash);
        if chunk_path.exists() {
            let existing = fs::read(&chunk_path)?;
            if existing != bytes {
                return Err(Error::IntegrityError {
                    reason: format!("chunk {hash} already exists with different content"),
                });
            }
            return Ok(PutOutcome::Existed);
        }

        let computed = ChunkHash::from_bytes(bytes);
        if computed != *hash {
            return Err(Error::IntegrityError {
                reason: format!("content does not hash to {hash} (got {computed})"),
            });
        }

        if let Some(parent) = chunk_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp_path = chunk_path.with_extension("tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &chunk_path)?;
        if let Some(parent) = chunk_path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(PutOutcome::Inserted)
    }

    /// Retrieve a chunk by hash, re-verifying integrity on read.
    pub fn get(&self, hash: &ChunkHash) -> Result<Vec<u8>> {
        let chunk_path = self.chunk_path(hash);
        if !chunk_path.exists() {
            return Err(Error::ChunkNotFound {
                hash: hash.to_string(),
            });
        }

        let mut file = File::open(&chunk_path)?;
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let computed = ChunkHash::from_bytes(&data);
        if computed != *hash {
            return Err(Error::IntegrityError {
                reason: format!("chunk hash mismatch: expected {hash}, got {computed}"),
            });
        }

        Ok(data)
    }

    pub fn exists(&self, hash: &ChunkHash) -> bool {
        self.chunk_path(hash).exists()
    }

    /// Remove a chunk, returning whether it was actually present. Callers
    /// must ensure reference_count==0 before calling this.
    pub fn delete(&self, hash: &ChunkHash) -> Result<bool> {
        let chunk_path = self.chunk_path(hash);
        if chunk_path.exists() {
            fs::remove_file(&chunk_path)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn stats(&self) -> Result<ChunkStoreStats> {
        let mut stats = ChunkStoreStats::default();
        self.walk_stats(&self.chunks_path, &mut stats)?;
        Ok(stats)
    }

    fn walk_stats(&self, dir: &Path, stats: &mut ChunkStoreStats) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            if path.is_dir() {
                self.walk_stats(&path, stats)?;
            } else if path.is_file() && path.extension().map_or(true, |e| e != "tmp") {
                stats.count += 1;
                stats.total_size += entry.metadata()?.len();
            }
        }
        Ok(())
    }

    fn chunk_path(&self, hash: &ChunkHash) -> PathBuf {
        let hash_str = hash.as_str();
        let dir1 = &hash_str[..2];
        let dir2 = &hash_str[2..4];
        self.chunks_path.join(dir1).join(dir2).join(hash_str)
    }
}

/// External chunking policy, treated as a boundary in this crate (see spec
/// §1: chunking policy is explicitly out of scope). `FixedSizeChunker` is the
/// one concrete default the engine can depend on when nothing smarter
/// (Rabin/FastCDC) is plugged in.
pub trait Chunker {
    fn chunk(&self, reader: &mut dyn Read) -> Result<Vec<Vec<u8>>>;
}

/// Splits input into fixed-size chunks of `chunk_size` bytes (last chunk may
/// be shorter).
pub struct FixedSizeChunker {
    pub chunk_size: usize,
}

impl Default for FixedSizeChunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }
}

impl Chunker for FixedSizeChunker {
    fn chunk(&self, reader: &mut dyn Read) -> Result<Vec<Vec<u8>>> {
        let mut chunks = Vec::new();
        let mut buffer = vec![0u8; self.chunk_size];
        loop {
            let n = reader.read(&mut buffer)?;
            if n == 0 {
                break;
            }
            chunks.push(buffer[..n].to_vec());
        }
        Ok(chunks)
    }
}

/// Constant-time content comparison helper, exposed for callers that need to
/// compare raw digest bytes rather than `ChunkHash` strings.
pub fn chunk_bytes_match(expected: &[u8; DIGEST_LEN], actual: &[u8]) -> bool {
    digests_equal(expected, actual)
}

pub fn hash_bytes_hex(data: &[u8]) -> String {
    to_hex(blake3::hash(data).as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn from_bytes_is_correct_blake3() {
        let data = b"hello world";
        let hash = ChunkHash::from_bytes(data);
        assert_eq!(
            hash.as_str(),
            "d74981efa70a0c880b8d8c1985d075dbcbf679b99a5f9914e5aaf96b831a9e24"
        );
    }

    #[test]
    fn put_get_round_trip() -> Result<()> {
        let dir = TempDir::new()?;
        let store = ChunkStore::new(dir.path())?;

        let data = b"test chunk data";
        let hash = ChunkHash::from_bytes(data);
        let outcome = store.put(&hash, data)?;
        assert_eq!(outcome, PutOutcome::Inserted);
        assert!(store.exists(&hash));

        let retrieved = store.get(&hash)?;
        assert_eq!(retrieved, data);
        Ok(())
    }

    #[test]
    fn put_is_idempotent() -> Result<()> {
        let dir = TempDir::new()?;
        let store = ChunkStore::new(dir.path())?;
        let data = b"idempotent";
        let hash = ChunkHash::from_bytes(data);

        assert_eq!(store.put(&hash, data)?, PutOutcome::Inserted);
        assert_eq!(store.put(&hash, data)?, PutOutcome::Existed);
        assert_eq!(store.get(&hash)?, data);
        Ok(())
    }

    #[test]
    fn put_rejects_content_not_matching_hash() -> Result<()> {
        let dir = TempDir::new()?;
        let store = ChunkStore::new(dir.path())?;
        let wrong_hash = ChunkHash::from_bytes(b"something else");
        let result = store.put(&wrong_hash, b"actual content");
        assert!(matches!(result, Err(Error::IntegrityError { .. })));
        Ok(())
    }

    #[test]
    fn get_detects_on_disk_corruption() -> Result<()> {
        let dir = TempDir::new()?;
        let store = ChunkStore::new(dir.path())?;
        let data = b"test data for integrity";
        let hash = ChunkHash::from_bytes(data);
        store.put(&hash, data)?;

        let chunk_path = store.chunk_path(&hash);
        fs::write(&chunk_path, b"corrupted data")?;

        let result = store.get(&hash);
        assert!(matches!(result, Err(Error::IntegrityError { .. })));
        Ok(())
    }

    #[test]
    fn delete_reports_whether_present() -> Result<()> {
        let dir = TempDir::new()?;
        let store = ChunkStore::new(dir.path())?;
        let data = b"to be deleted";
        let hash = ChunkHash::from_bytes(data);
        store.put(&hash, data)?;

        assert!(store.delete(&hash)?);
        assert!(!store.exists(&hash));
        assert!(!store.delete(&hash)?);
        Ok(())
    }

    #[test]
    fn stats_counts_and_sums() -> Result<()> {
        let dir = TempDir::new()?;
        let store = ChunkStore::new(dir.path())?;
        store.put(&ChunkHash::from_bytes(b"a"), b"a")?;
        store.put(&ChunkHash::from_bytes(b"bb"), b"bb")?;

        let stats = store.stats()?;
        assert_eq!(stats.count, 2);
        assert_eq!(stats.total_size, 3);
        Ok(())
    }

    #[test]
    fn fixed_size_chunker_splits_on_boundary() -> Result<()> {
        let chunker = FixedSizeChunker { chunk_size: 4 };
        let data = b"abcdefghij".to_vec();
        let chunks = chunker.chunk(&mut &data[..])?;
        assert_eq!(chunks, vec![b"abcd".to_vec(), b"efgh".to_vec(), b"ij".to_vec()]);
        Ok(())
    }
}
