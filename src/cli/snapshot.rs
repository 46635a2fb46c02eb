//! `nova-pc-suite snapshot <create|list|diff|delete>`.

use crate::chunk::{Chunker, FixedSizeChunker};
use clap::{Args, Subcommand};
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum SnapshotCommand {
    /// Ingest a directory as a new snapshot (full, or incremental with `--parent`)
    Create(CreateArgs),
    /// List snapshots, newest first
    List(ListArgs),
    /// Diff two snapshots' file namespaces
    Diff(DiffArgs),
    /// Delete a snapshot (does not reclaim chunks; run `gc` afterwards)
    Delete(DeleteArgs),
}

#[derive(Args)]
pub struct CreateArgs {
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
    /// Unique name for the new snapshot
    pub name: String,
    /// Directory to ingest
    pub source: PathBuf,
    /// Optional human-readable description
    #[arg(long)]
    pub description: Option<String>,
    /// Name of the parent snapshot for an incremental ingest
    #[arg(long)]
    pub parent: Option<String>,
}

#[derive(Args)]
pub struct ListArgs {
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
}

#[derive(Args)]
pub struct DiffArgs {
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
    pub snapshot_a: String,
    pub snapshot_b: String,
}

#[derive(Args)]
pub struct DeleteArgs {
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
    pub name: String,
}

pub fn run(cmd: SnapshotCommand) -> anyhow::Result<()> {
    match cmd {
        SnapshotCommand::Create(args) => create(args),
        SnapshotCommand::List(args) => list(args),
        SnapshotCommand::Diff(args) => diff(args),
        SnapshotCommand::Delete(args) => delete(args),
    }
}

fn create(args: CreateArgs) -> anyhow::Result<()> {
    let service = super::open_service(&args.root)?;
    let chunker: Box<dyn Chunker + Sync> = Box::new(FixedSizeChunker::default());

    let snapshot = match &args.parent {
        Some(parent) => service.ingest_incremental(
            &args.name,
            parent,
            args.description.as_deref(),
            &args.source,
            chunker.as_ref(),
        )?,
        None => service.ingest_full(&args.name, args.description.as_deref(), &args.source, chunker.as_ref())?,
    };

    println!(
        "created snapshot {} ({}): {} files, {} bytes, root {}",
        snapshot.name,
        snapshot.id,
        snapshot.total_files,
        snapshot.total_size,
        snapshot.merkle_root.as_deref().unwrap_or("<none>")
    );
    Ok(())
}

fn list(args: ListArgs) -> anyhow::Result<()> {
    let service = super::open_service(&args.root)?;
    for snapshot in service.list_snapshots()? {
        println!(
            "{}\t{}\t{} files\t{} bytes\t{}",
            snapshot.name,
            format_created_at(snapshot.created_at),
            snapshot.total_files,
            snapshot.total_size,
            snapshot.parent_id.as_deref().unwrap_or("-")
        );
    }
    Ok(())
}

/// Renders a `created_at` epoch-millisecond timestamp as RFC 3339, falling
/// back to the raw millis if they're out of `chrono`'s representable range.
fn format_created_at(created_at_ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(created_at_ms)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| created_at_ms.to_string())
}

fn diff(args: DiffArgs) -> anyhow::Result<()> {
    let service = super::open_service(&args.root)?;
    let a = service.catalog().get_snapshot_by_name(&args.snapshot_a)?;
    let b = service.catalog().get_snapshot_by_name(&args.snapshot_b)?;
    for entry in service.diff_snapshots(&a.id, &b.id)? {
        println!("{:?}\t{}", entry.kind, entry.path);
    }
    Ok(())
}

fn delete(args: DeleteArgs) -> anyhow::Result<()> {
    let service = super::open_service(&args.root)?;
    let snapshot = service.catalog().get_snapshot_by_name(&args.name)?;
    service.delete_snapshot(&snapshot.id)?;
    println!("deleted snapshot {}", args.name);
    Ok(())
}
