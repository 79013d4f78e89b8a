//! `confsync diff`: show unified diffs for what sync would write.

use anyhow::{bail, Context, Result};
use clap::Args;

use confsync_core::{OsFs, SyncFlags, SystemIdentity};
use confsync_sync::diff_all;

use super::SourceArgs;

/// Arguments for `confsync diff`.
#[derive(Args, Debug)]
pub struct DiffArgs {
    #[command(flatten)]
    pub source: SourceArgs,
}

impl DiffArgs {
    pub fn run(self) -> Result<()> {
        let config = self.source.process_config(SyncFlags::default());
        let client = self.source.client()?;

        let report = diff_all(&config, &*client, &OsFs, &SystemIdentity)
            .with_context(|| format!("diff failed for {}", config.resource_dir.display()))?;

        let mut failed = 0;
        let mut pending = 0;
        for r in &report.resources {
            match &r.result {
                Ok(diff) if diff.is_empty() => {}
                Ok(diff) => {
                    pending += 1;
                    print!("{}", diff.unified_diff);
                    if !diff.unified_diff.ends_with('\n') {
                        println!();
                    }
                }
                Err(e) => {
                    failed += 1;
                    eprintln!("{}: {e}", r.descriptor.display());
                }
            }
        }

        if failed > 0 {
            bail!("{failed} of {} resource(s) failed", report.resources.len());
        }
        if pending == 0 {
            println!("No differences.");
        }
        Ok(())
    }
}
