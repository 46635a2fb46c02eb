//! Row types shared across the catalog submodules.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncryptionMode {
    None,
    Aes,
}

impl EncryptionMode {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            EncryptionMode::None => "NONE",
            EncryptionMode::Aes => "AES",
        }
    }

    pub fn from_db_str(s: &str) -> Self {
        match s {
            "AES" => EncryptionMode::Aes,
            _ => EncryptionMode::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRow {
    pub id: String,
    pub name: String,
    pub created_at: i64,
    pub description: Option<String>,
    pub parent_id: Option<String>,
    pub total_files: i64,
    pub total_size: i64,
    pub merkle_root: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    pub id: String,
    pub snapshot_id: String,
    pub path: String,
    pub size: i64,
    pub modified_time: i64,
    pub file_hash: String,
    pub encryption_mode: EncryptionMode,
    /// Ordered `(chunk_hash, chunk_size)` pairs; index is the chunk order.
    pub chunks: Vec<(String, i64)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    pub size: i64,
    pub first_seen: i64,
    pub reference_count: i64,
    pub last_accessed: i64,
}
