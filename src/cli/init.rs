//! `nova-pc-suite init` — create a new repository at `--root`.

use crate::config::RepoConfig;
use crate::snapshot_service::SnapshotService;
use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct InitArgs {
    /// Repository root directory (created if absent)
    #[arg(long, default_value = ".")]
    pub root: PathBuf,

    /// Enable deterministic path encryption + blind-index search, generating
    /// a fresh 32-byte key and writing it (hex-encoded) to config.toml
    #[arg(long)]
    pub encrypt: bool,
}

pub fn run(args: InitArgs) -> anyhow::Result<()> {
    std::fs::create_dir_all(&args.root)?;
    let config_path = args.root.join("config.toml");
    if config_path.exists() {
        anyhow::bail!("repository already initialized at {}", args.root.display());
    }

    let mut config = RepoConfig::default();
    if args.encrypt {
        config.encryption_key_hex = Some(hex::encode(random_key()));
    }
    config.save(&config_path)?;

    // Opening the service creates metadata.db and the chunks/ directory.
    let _service = SnapshotService::open(&args.root, config)?;
    println!("initialized repository at {}", args.root.display());
    if args.encrypt {
        println!("path encryption enabled; key stored in {}", config_path.display());
    }
    Ok(())
}

/// A fresh 32-byte key, drawn from two `Uuid::new_v4`s rather than pulling in
/// a standalone `rand` dependency (`uuid/v4` already carries `getrandom`
/// transitively and is used the same way for snapshot ids).
fn random_key() -> [u8; 32] {
    let mut key = [0u8; 32];
    key[..16].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    key[16..].copy_from_slice(uuid::Uuid::new_v4().as_bytes());
    key
}
