//! confsync: render templates from key/value data and sync config files.
//!
//! # Usage
//!
//! ```text
//! confsync sync [--confdir <dir>] [--backend env|file] [--file <yaml>...] [--prefix <p>]
//!               [--noop] [--sync-only] [--keep-stage-file]
//! confsync diff [--confdir <dir>] [--backend env|file] [--file <yaml>...] [--prefix <p>]
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{diff::DiffArgs, sync::SyncArgs};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "confsync",
    version,
    about = "Render templates from a key/value store and sync the results to config files",
    long_about = None,
)]
struct Cli {
    /// Log filter, e.g. `debug` or `confsync_sync=debug` (overrides RUST_LOG).
    #[arg(long, global = true, value_name = "FILTER")]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run one stage-and-commit cycle for every template resource.
    Sync(SyncArgs),

    /// Show unified diffs of what sync would write.
    Diff(DiffArgs),
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_level.as_deref());
    match cli.command {
        Commands::Sync(args) => args.run(),
        Commands::Diff(args) => args.run(),
    }
}

fn init_tracing(level: Option<&str>) {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = level
        .and_then(|l| EnvFilter::try_new(l).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    let _ = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
