//! Thin command-line front end. Every subcommand parses arguments, opens a
//! `SnapshotService` against `--root`, delegates to it, and prints a result —
//! no backup logic lives in this module (spec §1: the CLI is a pass-through
//! surface over the library).

use crate::config::RepoConfig;
use crate::snapshot_service::SnapshotService;
use clap::{Parser, Subcommand};
use std::path::Path;

pub mod gc;
pub mod init;
pub mod restore;
pub mod search;
pub mod snapshot;

/// nova-pc-suite — content-addressed, deduplicating, snapshot-based backup engine
#[derive(Parser)]
#[command(name = "nova-pc-suite")]
#[command(about = "Content-addressed, deduplicating, snapshot-based backup engine")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new repository
    Init(init::InitArgs),
    /// Create or list snapshots
    #[command(subcommand)]
    Snapshot(snapshot::SnapshotCommand),
    /// Restore a snapshot or single file
    Restore(restore::RestoreArgs),
    /// Search file paths in a repository
    Search(search::SearchArgs),
    /// Reclaim orphaned chunks and unreachable Merkle nodes
    Gc(gc::GcArgs),
}

/// Opens the repository at `root`, loading `config.toml` if present
/// (falling back to defaults for a not-yet-initialized path so read-only
/// commands still work against a freshly created directory).
pub(crate) fn open_service(root: &Path) -> anyhow::Result<SnapshotService> {
    let config_path = root.join("config.toml");
    let config = if config_path.exists() {
        RepoConfig::load(&config_path)?
    } else {
        RepoConfig::default()
    };
    Ok(SnapshotService::open(root, config)?)
}
