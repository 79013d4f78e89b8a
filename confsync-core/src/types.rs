//! Domain types for template resources.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.

use std::fmt;
use std::path::{Path, PathBuf};

use crate::identity::ProcessIdentity;
use crate::store::StagingStore;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Permission bits of a file (`0o7777` at most).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileMode(pub u32);

/// Mode for a destination that does not exist yet and has no explicit mode.
pub const DEFAULT_FILE_MODE: FileMode = FileMode(0o644);

impl FileMode {
    /// Parse an integer the way a base-0 parser would: `0x` hex, `0o`/`0b`
    /// prefixes, a leading `0` for octal, anything else decimal.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let (digits, radix) = if let Some(r) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            (r, 16)
        } else if let Some(r) = s.strip_prefix("0o").or_else(|| s.strip_prefix("0O")) {
            (r, 8)
        } else if let Some(r) = s.strip_prefix("0b").or_else(|| s.strip_prefix("0B")) {
            (r, 2)
        } else if s.len() > 1 && s.starts_with('0') {
            (&s[1..], 8)
        } else {
            (s, 10)
        };
        if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        u32::from_str_radix(digits, radix)
            .ok()
            .filter(|m| *m <= 0o7777)
            .map(FileMode)
    }
}

impl fmt::Display for FileMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04o}", self.0)
    }
}

impl From<u32> for FileMode {
    fn from(m: u32) -> Self {
        Self(m & 0o7777)
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// How the candidate file's mode is chosen.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModePolicy {
    /// Use this mode regardless of the destination.
    Explicit(FileMode),
    /// Copy the destination's current mode, or [`DEFAULT_FILE_MODE`] if absent.
    #[default]
    Inherit,
}

// ---------------------------------------------------------------------------
// Configuration structs
// ---------------------------------------------------------------------------

/// Behaviour switches shared by every resource in a run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncFlags {
    /// Leave the staged candidate on disk after the cycle.
    pub keep_stage_file: bool,
    /// Report changes without touching the destination or running commands.
    pub noop: bool,
    /// Commit changes but skip the check and reload commands.
    pub sync_only: bool,
}

/// Settings applied when loading descriptors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    /// Directory holding `*.toml` resource descriptors.
    pub resource_dir: PathBuf,
    /// Directory every `src` is joined under, absolute or not.
    pub template_dir: PathBuf,
    /// Key prefix for descriptors that set none.
    ///
    /// A descriptor's own `prefix` wins over this one. confd applies the
    /// opposite precedence (a non-empty process prefix overrides the
    /// descriptor); here the process value is only a default.
    pub prefix: String,
    pub flags: SyncFlags,
    /// Owner/group for descriptors that set neither ids nor names.
    pub identity: ProcessIdentity,
}

impl ProcessConfig {
    /// Conventional layout: `<conf_dir>/conf.d` and `<conf_dir>/templates`.
    pub fn from_conf_dir(conf_dir: &Path, identity: ProcessIdentity) -> Self {
        Self {
            resource_dir: conf_dir.join("conf.d"),
            template_dir: conf_dir.join("templates"),
            prefix: String::new(),
            flags: SyncFlags::default(),
            identity,
        }
    }
}

/// A fully resolved template resource. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceConfig {
    /// Descriptor this resource was loaded from.
    pub descriptor: PathBuf,
    /// Template path, already joined with the template directory.
    pub src: PathBuf,
    pub dest: PathBuf,
    /// Requested keys in descriptor order, relative to `prefix`.
    pub keys: Vec<String>,
    /// Always starts with `/`.
    pub prefix: String,
    pub mode: ModePolicy,
    pub uid: u32,
    pub gid: u32,
    /// May reference the staged file as `{{src}}`.
    pub check_cmd: Option<String>,
    pub reload_cmd: Option<String>,
    pub flags: SyncFlags,
}

impl ResourceConfig {
    /// Short display name: the descriptor's file name.
    pub fn name(&self) -> String {
        self.descriptor
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.descriptor.display().to_string())
    }

    /// Directory the candidate is staged in (same filesystem as `dest`).
    pub fn dest_dir(&self) -> PathBuf {
        match self.dest.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
            _ => PathBuf::from("."),
        }
    }

    /// Name prefix for staged candidates: `.<dest file name>`.
    pub fn stage_prefix(&self) -> String {
        let base = self
            .dest
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!(".{base}")
    }
}

/// A loaded resource: its configuration plus its own staging store.
#[derive(Debug, Clone)]
pub struct Resource {
    pub config: ResourceConfig,
    pub store: StagingStore,
}

impl Resource {
    pub fn new(config: ResourceConfig) -> Self {
        Self {
            config,
            store: StagingStore::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
