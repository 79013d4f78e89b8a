//! Stage-and-commit writer: one processing cycle for one resource.
//!
//! ## `process`: 9-step protocol
//!
//! 1. Resolve the candidate's mode (explicit, else the destination's, else 0644).
//! 2. Refresh the resource's staging store from the backend.
//! 3. Render into a uniquely named file beside the destination; set mode and owner.
//! 4. Compare candidate and destination by SHA-256.
//! 5. No-op mode: report and stop.
//! 6. Unchanged: stop.
//! 7. Run the check command against the staged file.
//! 8. Rename the staged file onto the destination (busy targets are rewritten in place).
//! 9. Run the reload command.
//!
//! The staged file is removed on every exit path unless the resource keeps
//! staged files; it never outlives a failed cycle.

use std::io::Write;
use std::path::{Path, PathBuf};

use confsync_core::vfs::is_resource_busy;
use confsync_core::{
    Filesystem, FileMode, ModePolicy, Resource, ResourceConfig, StagingStore, StoreClient,
    DEFAULT_FILE_MODE,
};
use confsync_renderer::{TemplateContext, TemplateEngine};

use crate::command::{check_command, run_shell};
use crate::error::{fs_err, SyncError};
use crate::fingerprint;

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// Result of a successful cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    /// The destination was replaced.
    Written { path: PathBuf },
    /// The destination already matched the candidate.
    Unchanged { path: PathBuf },
    /// No-op mode: the destination differs and would have been replaced.
    WouldWrite { path: PathBuf },
}

impl SyncOutcome {
    pub fn path(&self) -> &Path {
        match self {
            SyncOutcome::Written { path }
            | SyncOutcome::Unchanged { path }
            | SyncOutcome::WouldWrite { path } => path,
        }
    }

    /// Whether the candidate differed from the destination.
    pub fn is_changed(&self) -> bool {
        !matches!(self, SyncOutcome::Unchanged { .. })
    }
}

// ---------------------------------------------------------------------------
// Per-cycle state
// ---------------------------------------------------------------------------

/// A staged candidate on disk. Removed on drop unless kept or committed.
struct StagedFile<'a> {
    fs: &'a dyn Filesystem,
    path: PathBuf,
    keep: bool,
}

impl<'a> StagedFile<'a> {
    fn path(&self) -> &Path {
        &self.path
    }

    /// The file has been renamed onto the destination; nothing to clean up.
    fn committed(mut self) {
        self.keep = true;
    }
}

impl Drop for StagedFile<'_> {
    fn drop(&mut self) {
        if self.keep {
            return;
        }
        if let Err(e) = self.fs.remove(&self.path) {
            tracing::warn!("could not remove staged file {}: {e}", self.path.display());
        }
    }
}

/// State recomputed at the start of every cycle.
struct CycleState<'a> {
    file_mode: FileMode,
    staged: StagedFile<'a>,
}

// ---------------------------------------------------------------------------
// process
// ---------------------------------------------------------------------------

/// Run one full cycle for `resource`.
///
/// Every error except [`SyncError::Reload`] leaves the destination exactly
/// as it was before the call.
pub fn process(
    resource: &mut Resource,
    client: &dyn StoreClient,
    fs: &dyn Filesystem,
) -> Result<SyncOutcome, SyncError> {
    let config = &resource.config;

    // Step 1
    let file_mode = resolve_mode(fs, config)?;

    // Step 2
    resource
        .store
        .refresh(client, &config.prefix, &config.keys)?;

    // Step 3
    let state = stage(fs, config, &resource.store, file_mode)?;
    sync(fs, config, state)
}

/// Mode the candidate gets this cycle.
pub fn resolve_mode(fs: &dyn Filesystem, config: &ResourceConfig) -> Result<FileMode, SyncError> {
    match config.mode {
        ModePolicy::Explicit(mode) => Ok(mode),
        ModePolicy::Inherit => match fs.stat(&config.dest) {
            Ok(stat) => Ok(FileMode::from(stat.mode)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(DEFAULT_FILE_MODE),
            Err(e) => Err(fs_err("stat", &config.dest, e)),
        },
    }
}

fn stage<'a>(
    fs: &'a dyn Filesystem,
    config: &ResourceConfig,
    store: &StagingStore,
    file_mode: FileMode,
) -> Result<CycleState<'a>, SyncError> {
    let engine = TemplateEngine::compile(fs, &config.src, store)?;
    let ctx = TemplateContext::for_resource(config, store);

    let dir = config.dest_dir();
    let (path, mut writer) = fs
        .create_temp(&dir, &config.stage_prefix())
        .map_err(|e| fs_err("create staged file", &dir, e))?;
    let staged = StagedFile {
        fs,
        path,
        keep: config.flags.keep_stage_file,
    };

    let rendered = engine.render_to(&ctx, &mut writer);
    let flushed = writer.flush();
    drop(writer);
    if let Err(e) = rendered {
        discard(staged);
        return Err(e.into());
    }
    if let Err(e) = flushed {
        let path = staged.path.clone();
        discard(staged);
        return Err(fs_err("write", path, e));
    }

    let path = staged.path().to_path_buf();
    let attrs = fs
        .chmod(&path, file_mode.0)
        .map_err(|e| fs_err("chmod", &path, e))
        .and_then(|()| {
            fs.chown(&path, config.uid, config.gid)
                .map_err(|e| fs_err("chown", &path, e))
        });
    if let Err(e) = attrs {
        discard(staged);
        return Err(e);
    }
    tracing::debug!("staged {} with mode {file_mode}", path.display());

    Ok(CycleState { file_mode, staged })
}

/// A partial candidate is never kept, whatever the keep policy says.
fn discard(mut staged: StagedFile<'_>) {
    staged.keep = false;
}

fn sync(
    fs: &dyn Filesystem,
    config: &ResourceConfig,
    state: CycleState<'_>,
) -> Result<SyncOutcome, SyncError> {
    let dest = &config.dest;
    let staged = state.staged;
    if config.flags.keep_stage_file {
        tracing::info!("keeping staged file: {}", staged.path().display());
    }

    // Step 4
    tracing::debug!("comparing candidate config to {}", dest.display());
    let changed = fingerprint::is_changed(fs, staged.path(), dest)?;

    // Step 5
    if config.flags.noop {
        tracing::warn!("noop mode enabled. {} will not be modified", dest.display());
        return Ok(if changed {
            SyncOutcome::WouldWrite { path: dest.clone() }
        } else {
            SyncOutcome::Unchanged { path: dest.clone() }
        });
    }

    // Step 6
    if !changed {
        tracing::debug!("target config {} in sync", dest.display());
        return Ok(SyncOutcome::Unchanged { path: dest.clone() });
    }
    tracing::info!("target config {} out of sync", dest.display());

    // Step 7
    if !config.flags.sync_only {
        if let Some(template) = &config.check_cmd {
            let command = check_command(template, staged.path());
            run_shell(&command).map_err(SyncError::Validation)?;
        }
    }

    // Step 8
    commit(fs, config, staged, state.file_mode)?;

    // Step 9
    if !config.flags.sync_only {
        if let Some(command) = &config.reload_cmd {
            run_shell(command).map_err(|source| SyncError::Reload {
                dest: dest.clone(),
                source,
            })?;
        }
    }

    tracing::info!("target config {} has been updated", dest.display());
    Ok(SyncOutcome::Written { path: dest.clone() })
}

fn commit(
    fs: &dyn Filesystem,
    config: &ResourceConfig,
    staged: StagedFile<'_>,
    file_mode: FileMode,
) -> Result<(), SyncError> {
    let dest = &config.dest;
    tracing::debug!("overwriting target config {}", dest.display());
    match fs.rename(staged.path(), dest) {
        Ok(()) => {
            staged.committed();
            Ok(())
        }
        Err(e) if is_resource_busy(&e) => {
            tracing::debug!("rename failed - target is likely a mount. Trying to write instead");
            let contents = fs
                .read(staged.path())
                .map_err(|e| fs_err("read", staged.path(), e))?;
            fs.write(dest, &contents, file_mode.0)
                .map_err(|e| fs_err("write", dest, e))?;
            fs.chown(dest, config.uid, config.gid)
                .map_err(|e| fs_err("chown", dest, e))?;
            Ok(())
        }
        Err(e) => Err(fs_err("rename", dest, e)),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use confsync_core::{MemoryClient, MemoryFs, SyncFlags};

    const DEST: &str = "/etc/app/app.conf";

    fn setup(template: &str) -> (MemoryFs, Resource) {
        let fs = MemoryFs::new();
        fs.mkdir_all(Path::new("/etc/confsync/templates"), 0o755).unwrap();
        fs.mkdir_all(Path::new("/etc/app"), 0o755).unwrap();
        fs.write(
            Path::new("/etc/confsync/templates/app.tmpl"),
            template.as_bytes(),
            0o644,
        )
        .unwrap();
        let resource = Resource::new(ResourceConfig {
            descriptor: PathBuf::from("/etc/confsync/conf.d/app.toml"),
            src: PathBuf::from("/etc/confsync/templates/app.tmpl"),
            dest: PathBuf::from(DEST),
            keys: vec!["/".into()],
            prefix: "/".into(),
            mode: ModePolicy::Inherit,
            uid: 0,
            gid: 0,
            check_cmd: None,
            reload_cmd: None,
            flags: SyncFlags::default(),
        });
        (fs, resource)
    }

    fn staged_files(fs: &MemoryFs) -> Vec<PathBuf> {
        fs.read_dir(Path::new("/etc/app"))
            .unwrap()
            .into_iter()
            .filter(|p| p.file_name().unwrap().to_string_lossy().starts_with(".app.conf"))
            .collect()
    }

    #[test]
    fn first_cycle_writes_destination() {
        let (fs, mut resource) = setup("v={{ getv(key=\"/v\") }}");
        let client = MemoryClient::from_pairs([("/v", "1")]);
        let outcome = process(&mut resource, &client, &fs).unwrap();
        assert_eq!(outcome, SyncOutcome::Written { path: DEST.into() });
        assert_eq!(fs.read_to_string(Path::new(DEST)).unwrap(), "v=1");
        assert!(staged_files(&fs).is_empty());
    }

    #[test]
    fn second_cycle_is_unchanged() {
        let (fs, mut resource) = setup("v={{ getv(key=\"/v\") }}");
        let client = MemoryClient::from_pairs([("/v", "1")]);
        process(&mut resource, &client, &fs).unwrap();
        let outcome = process(&mut resource, &client, &fs).unwrap();
        assert!(!outcome.is_changed());
        assert!(staged_files(&fs).is_empty());
    }

    #[test]
    fn render_failure_removes_partial_candidate_even_when_keeping() {
        let (fs, mut resource) = setup("head\n{{ getv(key=\"/missing\") }}");
        resource.config.flags.keep_stage_file = true;
        let err = process(&mut resource, &MemoryClient::new(), &fs).unwrap_err();
        assert!(matches!(err, SyncError::Render(_)), "got: {err}");
        assert!(staged_files(&fs).is_empty());
        assert!(!fs.exists(Path::new(DEST)).unwrap());
    }

    #[test]
    fn keep_stage_file_leaves_candidate_when_unchanged() {
        let (fs, mut resource) = setup("static");
        fs.write(Path::new(DEST), b"static", 0o644).unwrap();
        resource.config.flags.keep_stage_file = true;
        process(&mut resource, &MemoryClient::new(), &fs).unwrap();
        let kept = staged_files(&fs);
        assert_eq!(kept.len(), 1);
        assert_eq!(fs.read_to_string(&kept[0]).unwrap(), "static");
    }

    #[test]
    fn explicit_mode_and_owner_applied_to_destination() {
        let (fs, mut resource) = setup("x");
        resource.config.mode = ModePolicy::Explicit(FileMode(0o600));
        resource.config.uid = 33;
        resource.config.gid = 34;
        process(&mut resource, &MemoryClient::new(), &fs).unwrap();
        let stat = fs.stat(Path::new(DEST)).unwrap();
        assert_eq!((stat.mode, stat.uid, stat.gid), (0o600, 33, 34));
    }

    #[test]
    fn missing_destination_directory_is_filesystem_error() {
        let (fs, mut resource) = setup("x");
        resource.config.dest = PathBuf::from("/nowhere/app.conf");
        let err = process(&mut resource, &MemoryClient::new(), &fs).unwrap_err();
        assert!(matches!(err, SyncError::Filesystem { .. }), "got: {err}");
        assert!(!err.is_committed());
    }
}
