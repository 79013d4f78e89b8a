//! # confsync-sync
//!
//! Stage-and-commit pipeline.
//!
//! Call [`process`] to run one cycle for a loaded resource, or
//! [`process_all`] to run every descriptor under a configuration directory.
//! [`diff_resource`] and [`diff_all`] show pending changes without writing.

pub mod command;
pub mod diff;
pub mod error;
pub mod fingerprint;
pub mod pipeline;
pub mod writer;

pub use diff::{diff_resource, ResourceDiff};
pub use error::{CommandError, SyncError};
pub use pipeline::{diff_all, process_all, ResourceReport, RunReport};
pub use writer::{process, resolve_mode, SyncOutcome};
