//! nova-pc-suite — command-line front end for the content-addressed,
//! deduplicating, snapshot-based backup engine.

use clap::Parser;
use nova_pc_suite::cli::{gc, init, restore, search, snapshot, Cli, Commands};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Init(args) => init::run(args),
        Commands::Snapshot(cmd) => snapshot::run(cmd),
        Commands::Restore(args) => restore::run(args),
        Commands::Search(args) => search::run(args),
        Commands::Gc(args) => gc::run(args),
    }
}