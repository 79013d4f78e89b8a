//! Error types for confsync-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise while loading a resource descriptor.
///
/// Any of these aborts resource construction; no partial resource is returned.
#[derive(Debug, Error)]
pub enum ResourceError {
    /// The descriptor file could not be read from the filesystem.
    #[error("cannot read template resource {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// TOML decode error with file path and line context from `toml`.
    #[error("cannot process template resource {path}: {source}")]
    Descriptor {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The descriptor has no `src` template path.
    #[error("empty src template in {path}")]
    EmptySource { path: PathBuf },

    /// `mode` is not a valid integer in any of the accepted bases.
    #[error("invalid mode {mode:?} in {path}")]
    InvalidMode { path: PathBuf, mode: String },

    /// Symbolic owner or group name could not be resolved to a numeric id.
    #[error("cannot find {kind} id for {name:?}: {reason}")]
    IdentityResolution {
        kind: IdentityKind,
        name: String,
        reason: String,
    },
}

/// Which identity directory a lookup went to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentityKind {
    User,
    Group,
}

impl std::fmt::Display for IdentityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityKind::User => write!(f, "owner's user"),
            IdentityKind::Group => write!(f, "group's group"),
        }
    }
}

/// Failure reported by a [`crate::backend::StoreClient`].
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend was reachable but refused or failed the request.
    #[error("backend {backend} failed: {message}")]
    Request { backend: String, message: String },

    /// A local source the backend reads from could not be read.
    #[error("backend I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A local source could not be decoded.
    #[error("backend could not decode {path}: {source}")]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
}

/// Lookup miss on the staging store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("key does not exist: {key}")]
pub struct KeyNotFound {
    pub key: String,
}
