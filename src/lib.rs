//! # nova_pc_suite
//!
//! A content-addressed, deduplicating, snapshot-based backup engine core.
//!
//! ## Components
//!
//! - **Hasher** (`hash`): one-shot, streaming, and incremental BLAKE3 digests.
//! - **Chunk store** (`chunk`): durable content-addressed blob storage.
//! - **Metadata catalog** (`catalog`): transactional SQLite catalog of
//!   snapshots, files, chunk references, Merkle nodes, and search indexes.
//! - **Merkle engine** (`merkle`): per-snapshot file-namespace tree, used for
//!   O(Delta) diffing between snapshots.
//! - **Path encryption** (`encryption`): deterministic path cipher and a
//!   blind-index keyword search for encrypted repositories.
//! - **Snapshot service** (`snapshot_service`): the orchestrator tying the
//!   above together for ingest, restore, diff, GC, and validation.
//! - **Retention** (`retention`): pure snapshot-pruning policy.

pub mod catalog;
pub mod chunk;
pub mod cli;
pub mod config;
pub mod encryption;
pub mod error;
pub mod hash;
pub mod merkle;
pub mod retention;
pub mod snapshot_service;

pub use error::{Error, Result};
pub use snapshot_service::SnapshotService;
