//! Error types for confsync-renderer.

use std::error::Error as _;
use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from compiling or executing a template.
#[derive(Debug, Error)]
pub enum RenderError {
    /// The source template does not exist.
    #[error("missing template: {path}")]
    MissingTemplate { path: PathBuf },

    /// Filesystem error while reading the source template.
    #[error("template io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The template failed to compile.
    #[error("unable to process template {path}: {}", error_chain(.source))]
    Syntax {
        path: PathBuf,
        #[source]
        source: tera::Error,
    },

    /// The template compiled but failed while executing.
    #[error("failed to render template {path}: {}", error_chain(.source))]
    Render {
        path: PathBuf,
        #[source]
        source: tera::Error,
    },
}

/// Flatten a tera error and its causes into one line.
///
/// Tera's top-level message is generic ("Failed to render 'x'"); the useful
/// detail (which function failed and why) lives in the source chain.
pub(crate) fn error_chain(err: &tera::Error) -> String {
    let mut parts = vec![err.to_string()];
    let mut cause = err.source();
    while let Some(c) = cause {
        parts.push(c.to_string());
        cause = c.source();
    }
    parts.join(": ")
}
