//! confsync renderer: tera templates over a staging store snapshot.
//!
//! - [`engine`]: compile and render a source template with [`TemplateEngine`]
//! - [`functions`]: `getv`, `gets`, `ls`, ... bound to the store
//! - [`context`]: [`TemplateContext`], the per-resource variables
//! - [`error`]: [`RenderError`]

pub mod context;
pub mod engine;
pub mod error;
pub mod functions;

pub use context::TemplateContext;
pub use engine::TemplateEngine;
pub use error::RenderError;
