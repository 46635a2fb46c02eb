//! `nova-pc-suite search` — path keyword search (FTS5 plaintext, or blind
//! index when the repository is encrypted).

use clap::Args;
use std::path::PathBuf;

#[derive(Args)]
pub struct SearchArgs {
    #[arg(long, default_value = ".")]
    pub root: PathBuf,
    pub query: String,
}

pub fn run(args: SearchArgs) -> anyhow::Result<()> {
    let service = super::open_service(&args.root)?;
    let results = service.search(&args.query)?;
    if results.is_empty() {
        println!("no matches for {:?}", args.query);
        return Ok(());
    }
    for (path, meta) in results {
        println!("{}\t{}\t{} bytes", meta.snapshot_id, path, meta.size);
    }
    Ok(())
}
