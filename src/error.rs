//! Error types for the backup engine core.

use thiserror::Error;

/// Main error type for snapshot/catalog/chunk-store operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Chunk not found: {hash}")]
    ChunkNotFound { hash: String },

    #[error("Invalid input: {reason}")]
    InvalidInput { reason: String },

    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Conflict: {reason}")]
    Conflict { reason: String },

    #[error("Integrity verification failed: {reason}")]
    IntegrityError { reason: String },

    #[error("Stored schema version {stored} is newer than this build's target {target}")]
    SchemaNewerThanCode { stored: i64, target: i64 },

    #[error("Schema migration failed at version {version}: {reason}")]
    MigrationFailed { version: i64, reason: String },

    #[error("Catalog busy: lock not acquired within {timeout_ms}ms")]
    Busy { timeout_ms: u64 },

    #[error("Operation timed out after {elapsed_ms}ms")]
    Timeout { elapsed_ms: u64 },

    #[error("Limit exceeded: {reason}")]
    LimitExceeded { reason: String },

    #[error("Encryption error: {reason}")]
    EncryptionError { reason: String },

    #[error("Invalid configuration: {reason}")]
    Configuration { reason: String },

    #[error("Operation cancelled by user")]
    Cancelled,

    #[error("Feature not available: {feature}")]
    FeatureNotAvailable { feature: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        if let rusqlite::Error::SqliteFailure(sqlite_err, ref msg) = err {
            use rusqlite::ErrorCode;
            match sqlite_err.code {
                ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                    return Error::Busy { timeout_ms: 5000 };
                }
                ErrorCode::ConstraintViolation => {
                    return Error::Conflict {
                        reason: msg.clone().unwrap_or_else(|| err.to_string()),
                    };
                }
                _ => {}
            }
        }
        Error::Internal(err.to_string())
    }
}

impl From<r2d2::Error> for Error {
    fn from(err: r2d2::Error) -> Self {
        let _ = &err;
        Error::Busy { timeout_ms: 5000 }
    }
}

/// Result type alias for backup engine operations.
pub type Result<T> = std::result::Result<T, Error>;
