//! `confsync sync`: stage, check, commit and reload every resource.

use anyhow::{bail, Context, Result};
use clap::Args;
use colored::Colorize;

use confsync_core::{OsFs, SyncFlags, SystemIdentity};
use confsync_sync::{process_all, SyncOutcome};

use super::SourceArgs;

/// Arguments for `confsync sync`.
#[derive(Args, Debug)]
pub struct SyncArgs {
    #[command(flatten)]
    pub source: SourceArgs,

    /// Report what would change without touching any destination.
    #[arg(long)]
    pub noop: bool,

    /// Replace destinations but skip check and reload commands.
    #[arg(long)]
    pub sync_only: bool,

    /// Leave staged candidates next to their destinations.
    #[arg(long)]
    pub keep_stage_file: bool,
}

impl SyncArgs {
    pub fn run(self) -> Result<()> {
        let flags = SyncFlags {
            keep_stage_file: self.keep_stage_file,
            noop: self.noop,
            sync_only: self.sync_only,
        };
        let config = self.source.process_config(flags);
        let client = self.source.client()?;

        let report = process_all(&config, &*client, &OsFs, &SystemIdentity)
            .with_context(|| format!("sync failed for {}", config.resource_dir.display()))?;

        if report.resources.is_empty() {
            println!(
                "No template resources in {}.",
                config.resource_dir.display()
            );
            return Ok(());
        }

        let prefix = if self.noop { "[noop] " } else { "" };
        let mut failed = 0;
        for r in &report.resources {
            match &r.result {
                Ok(SyncOutcome::Written { path }) => {
                    println!("{prefix}{}  {}", "✎".green(), path.display())
                }
                Ok(SyncOutcome::WouldWrite { path }) => {
                    println!("{prefix}{}  {}", "~".yellow(), path.display())
                }
                Ok(SyncOutcome::Unchanged { path }) => {
                    println!("{prefix}{}  {}", "·".dimmed(), path.display())
                }
                Err(e) => {
                    failed += 1;
                    let note = if e.is_committed() { " (committed)" } else { "" };
                    eprintln!(
                        "{}  {}: {e}{note}",
                        "✗".red(),
                        r.descriptor.display()
                    );
                }
            }
        }

        if failed > 0 {
            bail!("{failed} of {} resource(s) failed", report.resources.len());
        }
        Ok(())
    }
}
