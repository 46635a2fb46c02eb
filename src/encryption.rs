//! Deterministic path encryption and blind-index keyword search (spec §4.7).
//!
//! Both primitives are keyed by the same 32-byte repository key and build on
//! BLAKE3 (already the project's hash primitive) rather than pulling in a
//! separate HMAC/SHA2 pair: `blake3::keyed_hash` is a drop-in PRF.

use crate::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Nonce};
use std::collections::HashSet;
use zeroize::Zeroizing;

/// Deterministic ChaCha20-Poly1305 path cipher. The nonce is derived from the
/// plaintext path itself (via a keyed hash), which makes encryption
/// deterministic: the same path under the same key always yields the same
/// ciphertext, which `files.path`'s `(snapshot_id, path)` uniqueness
/// constraint depends on.
pub struct PathCipher {
    key: Zeroizing<[u8; 32]>,
}

impl PathCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    fn nonce_for(&self, path: &str) -> Nonce {
        let derived = blake3::keyed_hash(&self.key, path.as_bytes());
        let mut nonce_bytes = [0u8; 12];
        nonce_bytes.copy_from_slice(&derived.as_bytes()[..12]);
        *Nonce::from_slice(&nonce_bytes)
    }

    /// Encrypt `path`, returning a base64-encoded `nonce || ciphertext` blob
    /// suitable for storage in `files.path`. The nonce is derived from the
    /// plaintext itself, so the same path under the same key always produces
    /// the same blob (the determinism the unique constraint depends on), but
    /// it still travels with the ciphertext so decryption never needs the
    /// plaintext as an input.
    pub fn encrypt(&self, path: &str) -> Result<String> {
        let cipher = ChaCha20Poly1305::new(self.key.as_slice().into());
        let nonce = self.nonce_for(path);
        let ciphertext = cipher
            .encrypt(&nonce, path.as_bytes())
            .map_err(|e| Error::EncryptionError {
                reason: format!("path encryption failed: {e}"),
            })?;
        let mut blob = Vec::with_capacity(nonce.len() + ciphertext.len());
        blob.extend_from_slice(nonce.as_slice());
        blob.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(blob))
    }

    /// Decrypt a stored `nonce || ciphertext` blob. On failure, callers
    /// should surface the path with a `(Decryption Failed)` suffix rather
    /// than dropping the row (spec §4.7): this returns the typed error so the
    /// caller can decide.
    pub fn decrypt(&self, stored_b64: &str) -> Result<String> {
        let blob = BASE64.decode(stored_b64).map_err(|e| Error::EncryptionError {
            reason: format!("invalid ciphertext encoding: {e}"),
        })?;
        if blob.len() < 12 {
            return Err(Error::EncryptionError {
                reason: "stored path blob shorter than a nonce".to_string(),
            });
        }
        let (nonce_bytes, ciphertext) = blob.split_at(12);
        let nonce = Nonce::from_slice(nonce_bytes);
        let cipher = ChaCha20Poly1305::new(self.key.as_slice().into());
        let plaintext = cipher
            .decrypt(nonce, ciphertext)
            .map_err(|e| Error::EncryptionError {
                reason: format!("path decryption failed: {e}"),
            })?;
        String::from_utf8(plaintext).map_err(|e| Error::EncryptionError {
            reason: format!("decrypted path is not valid utf-8: {e}"),
        })
    }

    /// `decrypt`, falling back to a logged `(Decryption Failed)` marker
    /// instead of propagating the error, per spec §4.7: a row that fails to
    /// decrypt is surfaced, not dropped.
    pub fn decrypt_or_marker(&self, stored_b64: &str) -> String {
        match self.decrypt(stored_b64) {
            Ok(plaintext) => plaintext,
            Err(e) => {
                tracing::error!(error = %e, "path decryption failed");
                format!("{stored_b64} (Decryption Failed)")
            }
        }
    }
}

/// Tokenized, HMAC-keyed keyword index allowing equality search over
/// encrypted paths without revealing plaintext (spec §4.7 blind index).
pub struct BlindIndex {
    key: Zeroizing<[u8; 32]>,
}

impl BlindIndex {
    pub fn new(key: [u8; 32]) -> Self {
        Self {
            key: Zeroizing::new(key),
        }
    }

    /// Case-folded, `/`-and-`.`-and-`_`-delimited word tokens. Deduplicated
    /// per path since a repeated token contributes nothing extra to the
    /// index.
    pub fn tokenize(path: &str) -> HashSet<String> {
        path.to_lowercase()
            .split(|c: char| c == '/' || c == '.' || c == '_' || c == '-' || c.is_whitespace())
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
            .collect()
    }

    pub fn keyword_hash(&self, token: &str) -> String {
        hex::encode(blake3::keyed_hash(&self.key, token.as_bytes()).as_bytes())
    }

    /// Hashes of every token in `path`, for writing `file_keywords` rows.
    pub fn hashes_for_path(&self, path: &str) -> Vec<String> {
        Self::tokenize(path)
            .into_iter()
            .map(|token| self.keyword_hash(&token))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> [u8; 32] {
        [42u8; 32]
    }

    #[test]
    fn encryption_is_deterministic() {
        let cipher = PathCipher::new(test_key());
        let a = cipher.encrypt("reports/2024/q1.pdf").unwrap();
        let b = cipher.encrypt("reports/2024/q1.pdf").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_paths_encrypt_differently() {
        let cipher = PathCipher::new(test_key());
        let a = cipher.encrypt("a.txt").unwrap();
        let b = cipher.encrypt("b.txt").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn decrypt_round_trips() {
        let cipher = PathCipher::new(test_key());
        let path = "reports/2024/q1.pdf";
        let ciphertext = cipher.encrypt(path).unwrap();
        let decrypted = cipher.decrypt(&ciphertext).unwrap();
        assert_eq!(decrypted, path);
    }

    #[test]
    fn decrypt_with_wrong_key_fails_gracefully() {
        let cipher_a = PathCipher::new([1u8; 32]);
        let cipher_b = PathCipher::new([2u8; 32]);
        let ciphertext = cipher_a.encrypt("secret.txt").unwrap();
        let marker = cipher_b.decrypt_or_marker(&ciphertext);
        assert!(marker.ends_with("(Decryption Failed)"));
    }

    #[test]
    fn blind_index_tokenizes_path_segments() {
        let tokens = BlindIndex::tokenize("Reports/2024/Q1.pdf");
        assert!(tokens.contains("reports"));
        assert!(tokens.contains("2024"));
        assert!(tokens.contains("q1"));
        assert!(tokens.contains("pdf"));
    }

    #[test]
    fn keyword_hash_is_deterministic() {
        let index = BlindIndex::new(test_key());
        assert_eq!(index.keyword_hash("q1"), index.keyword_hash("q1"));
        assert_ne!(index.keyword_hash("q1"), index.keyword_hash("q2"));
    }
}
