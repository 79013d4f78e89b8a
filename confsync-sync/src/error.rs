//! Error types for confsync-sync.

use std::path::PathBuf;

use thiserror::Error;

use confsync_core::{BackendError, ResourceError};
use confsync_renderer::RenderError;

/// All errors that can end a processing cycle.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The resource descriptor could not be loaded.
    #[error(transparent)]
    Resource(#[from] ResourceError),

    /// The backend fetch failed; nothing was rendered.
    #[error("store fetch failed: {0}")]
    Backend(#[from] BackendError),

    #[error(transparent)]
    Render(#[from] RenderError),

    /// Any staging or commit I/O failure other than the busy-target fallback.
    #[error("{op} failed for {path}: {source}")]
    Filesystem {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The check command rejected the staged candidate.
    #[error("config check failed: {0}")]
    Validation(#[source] CommandError),

    /// The reload command failed after the destination was replaced.
    #[error("reload failed for {dest}: {source}")]
    Reload {
        dest: PathBuf,
        #[source]
        source: CommandError,
    },
}

impl SyncError {
    /// Whether the destination had already been replaced when this error
    /// surfaced.
    pub fn is_committed(&self) -> bool {
        matches!(self, SyncError::Reload { .. })
    }
}

/// Failure of a check or reload command.
#[derive(Debug, Error)]
pub enum CommandError {
    /// The shell could not be started.
    #[error("could not run {command:?}: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The command ran and exited unsuccessfully.
    #[error("{command:?} exited with {status}: {output:?}")]
    Failed {
        command: String,
        status: String,
        output: String,
    },
}

/// Convenience constructor for [`SyncError::Filesystem`].
pub(crate) fn fs_err(
    op: &'static str,
    path: impl Into<PathBuf>,
    source: std::io::Error,
) -> SyncError {
    SyncError::Filesystem {
        op,
        path: path.into(),
        source,
    }
}
