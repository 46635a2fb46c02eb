//! Incremental and one-shot cryptographic hashing (BLAKE3, 32-byte digests).
//!
//! Collapses the usual Buffer/Stream/File/Incremental hasher hierarchy into a
//! single `Hasher` capability with three entry points, since only one
//! algorithm is in use (see design notes on polymorphism being unnecessary
//! here).

use crate::{Error, Result};
use std::io::Read;
use std::time::{Duration, Instant};

/// Length in bytes of a digest produced by this module.
pub const DIGEST_LEN: usize = 32;

/// Lowercase hex-encode a digest.
pub fn to_hex(digest: &[u8; DIGEST_LEN]) -> String {
    hex::encode(digest)
}

/// Parse a lowercase hex digest, rejecting anything not exactly
/// `2 * DIGEST_LEN` lower-hex characters.
pub fn from_hex(s: &str) -> Result<[u8; DIGEST_LEN]> {
    if s.len() != DIGEST_LEN * 2 || !s.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()) {
        return Err(Error::InvalidInput {
            reason: format!("malformed hex hash: {s}"),
        });
    }
    let bytes = hex::decode(s).map_err(|e| Error::InvalidInput {
        reason: format!("malformed hex hash: {e}"),
    })?;
    bytes.try_into().map_err(|_| Error::InvalidInput {
        reason: format!("hash {s} is not {DIGEST_LEN} bytes"),
    })
}

/// Constant-time equality check for digest verification paths.
pub fn digests_equal(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

/// Thread-safe digest factory. BLAKE3 is re-entrant, so `thread_safe` is
/// always `true` for this implementation, but the flag is still exposed so
/// callers that might swap the algorithm don't need to special-case it.
#[derive(Debug, Clone, Copy, Default)]
pub struct Hasher {
    thread_safe: bool,
}

impl Hasher {
    pub fn new() -> Self {
        Self { thread_safe: true }
    }

    pub fn thread_safe(&self) -> bool {
        self.thread_safe
    }

    /// One-shot digest over an in-memory byte slice.
    pub fn hash_bytes(&self, data: &[u8]) -> [u8; DIGEST_LEN] {
        *blake3::hash(data).as_bytes()
    }

    /// Digest a reader fully, without closing it, bounded by `max_bytes` and
    /// `timeout`. Fails with `LimitExceeded` if the stream exceeds
    /// `max_bytes`, or `Timeout` if wall-clock exceeds `timeout`.
    pub fn hash_stream<R: Read>(
        &self,
        mut reader: R,
        max_bytes: u64,
        timeout: Duration,
    ) -> Result<[u8; DIGEST_LEN]> {
        let started = Instant::now();
        let mut hasher = blake3::Hasher::new();
        let mut buf = [0u8; 64 * 1024];
        let mut total: u64 = 0;
        loop {
            if started.elapsed() > timeout {
                return Err(Error::Timeout {
                    elapsed_ms: started.elapsed().as_millis() as u64,
                });
            }
            let n = reader.read(&mut buf)?;
            if n == 0 {
                break;
            }
            total += n as u64;
            if total > max_bytes {
                return Err(Error::LimitExceeded {
                    reason: format!("stream exceeded max_bytes={max_bytes}"),
                });
            }
            hasher.update(&buf[..n]);
        }
        Ok(*hasher.finalize().as_bytes())
    }

    /// Start an incremental digest builder.
    pub fn incremental(&self) -> IncrementalHasher {
        IncrementalHasher::new()
    }
}

/// Builder for incremental digests. `digest()` is single-shot: once called,
/// further `update`s fail with `Error::Internal` ("finalized") unless
/// `reset()` is called first.
pub struct IncrementalHasher {
    inner: blake3::Hasher,
    finalized: bool,
}

impl IncrementalHasher {
    fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
            finalized: false,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) -> Result<()> {
        if self.finalized {
            return Err(Error::Internal(
                "incremental hasher is finalized; call reset() before further updates".into(),
            ));
        }
        self.inner.update(bytes);
        Ok(())
    }

    pub fn update_slice(&mut self, bytes: &[u8], off: usize, len: usize) -> Result<()> {
        let slice = bytes.get(off..off + len).ok_or_else(|| Error::InvalidInput {
            reason: format!("slice out of range: off={off} len={len} buf_len={}", bytes.len()),
        })?;
        self.update(slice)
    }

    /// Finalize and return the digest. Idempotent: calling it again without
    /// `reset()` returns the same digest but marks the hasher finalized for
    /// `update`.
    pub fn digest(&mut self) -> [u8; DIGEST_LEN] {
        self.finalized = true;
        *self.inner.finalize().as_bytes()
    }

    pub fn reset(&mut self) {
        self.inner.reset();
        self.finalized = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hash_bytes_is_deterministic() {
        let h = Hasher::new();
        assert_eq!(h.hash_bytes(b"hello"), h.hash_bytes(b"hello"));
        assert_ne!(h.hash_bytes(b"hello"), h.hash_bytes(b"world"));
    }

    #[test]
    fn hex_round_trip() {
        let h = Hasher::new();
        let digest = h.hash_bytes(b"hello");
        let hex = to_hex(&digest);
        assert_eq!(hex.len(), 64);
        assert_eq!(hex, hex.to_lowercase());
        assert_eq!(from_hex(&hex).unwrap(), digest);
    }

    #[test]
    fn from_hex_rejects_malformed() {
        assert!(from_hex("not-hex").is_err());
        assert!(from_hex("abcd").is_err());
        assert!(from_hex(&"A".repeat(64)).is_err());
    }

    #[test]
    fn hash_stream_matches_hash_bytes() {
        let h = Hasher::new();
        let data = b"streamed content".repeat(100);
        let digest = h
            .hash_stream(&data[..], 1 << 20, Duration::from_secs(5))
            .unwrap();
        assert_eq!(digest, h.hash_bytes(&data));
    }

    #[test]
    fn hash_stream_enforces_limit() {
        let h = Hasher::new();
        let data = vec![0u8; 1024];
        let err = h
            .hash_stream(&data[..], 100, Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, Error::LimitExceeded { .. }));
    }

    #[test]
    fn incremental_matches_one_shot() {
        let h = Hasher::new();
        let mut inc = h.incremental();
        inc.update(b"hel").unwrap();
        inc.update(b"lo").unwrap();
        assert_eq!(inc.digest(), h.hash_bytes(b"hello"));
    }

    #[test]
    fn incremental_rejects_update_after_digest_without_reset() {
        let h = Hasher::new();
        let mut inc = h.incremental();
        inc.update(b"a").unwrap();
        let _ = inc.digest();
        assert!(inc.update(b"b").is_err());
        inc.reset();
        inc.update(b"b").unwrap();
        assert_eq!(inc.digest(), h.hash_bytes(b"b"));
    }

    #[test]
    fn digests_equal_handles_mismatched_lengths() {
        assert!(!digests_equal(&[1, 2, 3], &[1, 2]));
        assert!(digests_equal(&[1, 2, 3], &[1, 2, 3]));
    }
}
