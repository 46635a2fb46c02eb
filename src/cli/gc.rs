//! `nova-pc-suite gc` — reclaim orphaned chunks and unreachable Merkle
//! nodes, and optionally drop snapshots that never finished ingest.

use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct GcArgs {
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
    /// Also delete snapshots left with a NULL merkle_root by an interrupted
    /// ingest (spec §9 `validate_snapshot_chain`)
    #[arg(long)]
    pub validate: bool,
}

pub fn run(args: GcArgs) -> anyhow::Result<()> {
    let service = super::open_service(&args.root)?;

    if args.validate {
        let removed = service.validate_snapshot_chain()?;
        for snapshot in &removed {
            println!("dropped incomplete snapshot {}", snapshot.name);
        }
    }

    let report = service.gc_sweep()?;
    println!(
        "gc: removed {} chunks, {} merkle nodes",
        report.chunks_removed, report.merkle_nodes_removed
    );
    Ok(())
}
