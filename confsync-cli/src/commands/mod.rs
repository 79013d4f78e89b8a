//! Subcommands and the options they share.

pub mod diff;
pub mod sync;

use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::{Args, ValueEnum};

use confsync_core::{
    EnvClient, FileClient, ProcessConfig, ProcessIdentity, StoreClient, SyncFlags,
};

/// Backend store to fetch keys from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum BackendKind {
    /// Process environment: `/foo/bar` is read from `FOO_BAR`.
    Env,
    /// One or more YAML files given with `--file`.
    File,
}

/// Where resources come from and which store feeds them.
#[derive(Args, Debug)]
pub struct SourceArgs {
    /// Configuration directory holding `conf.d/` and `templates/`.
    #[arg(long, default_value = "/etc/confsync", value_name = "DIR")]
    pub confdir: PathBuf,

    #[arg(long, value_enum, default_value_t = BackendKind::Env)]
    pub backend: BackendKind,

    /// YAML source for the file backend (repeatable).
    #[arg(long = "file", value_name = "PATH")]
    pub files: Vec<PathBuf>,

    /// Key prefix for resources that set none.
    #[arg(long, default_value = "")]
    pub prefix: String,
}

impl SourceArgs {
    pub fn process_config(&self, flags: SyncFlags) -> ProcessConfig {
        let mut config = ProcessConfig::from_conf_dir(&self.confdir, ProcessIdentity::current());
        config.prefix = self.prefix.clone();
        config.flags = flags;
        config
    }

    pub fn client(&self) -> Result<Box<dyn StoreClient>> {
        match self.backend {
            BackendKind::Env => Ok(Box::new(EnvClient)),
            BackendKind::File => {
                if self.files.is_empty() {
                    bail!("the file backend needs at least one --file");
                }
                Ok(Box::new(FileClient::new(self.files.clone())))
            }
        }
    }
}
