//! `nova-pc-suite restore` — restore a whole snapshot or a single file.

use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct RestoreArgs {
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
    /// Snapshot name to restore
    pub snapshot: String,
    /// Destination directory
    pub target: PathBuf,
    /// Restore only this single file id instead of the whole snapshot
    #[arg(long)]
    pub file_id: Option<String>,
}

pub fn run(args: RestoreArgs) -> anyhow::Result<()> {
    let service = super::open_service(&args.root)?;
    let snapshot = service.catalog().get_snapshot_by_name(&args.snapshot)?;

    match &args.file_id {
        Some(file_id) => {
            service.restore_file(file_id, &args.target)?;
            println!("restored file {file_id} to {}", args.target.display());
        }
        None => {
            let report = service.restore_snapshot(&snapshot.id, &args.target)?;
            println!(
                "restored {} files ({} bytes) to {}",
                report.files_restored,
                report.bytes_restored,
                args.target.display()
            );
        }
    }
    Ok(())
}
