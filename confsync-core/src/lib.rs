//! confsync core library: resource types, descriptor loading, staging store.
//!
//! Public API surface:
//! - [`types`]: [`ResourceConfig`], [`ProcessConfig`], [`FileMode`]
//! - [`descriptor`]: load `[template]` descriptors, discover them on disk
//! - [`store`]: the prefix-normalised [`StagingStore`]
//! - [`backend`]: the [`StoreClient`] contract plus env/file/memory clients
//! - [`vfs`]: the [`Filesystem`] contract plus [`OsFs`] and [`MemoryFs`]
//! - [`identity`]: owner/group resolution
//! - [`error`]: [`ResourceError`], [`BackendError`]

pub mod backend;
pub mod descriptor;
pub mod error;
pub mod identity;
pub mod store;
pub mod types;
pub mod vfs;

pub use backend::{EnvClient, FileClient, MemoryClient, StoreClient};
pub use error::{BackendError, IdentityKind, KeyNotFound, ResourceError};
pub use identity::{IdentityResolver, ProcessIdentity, StaticIdentity, SystemIdentity};
pub use store::{KvPair, StagingStore};
pub use types::{
    FileMode, ModePolicy, ProcessConfig, Resource, ResourceConfig, SyncFlags, DEFAULT_FILE_MODE,
};
pub use vfs::{FileStat, Filesystem, MemoryFs, OsFs};
