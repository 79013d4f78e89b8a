//! Tera rendering engine bound to a staging store snapshot.
//!
//! A [`TemplateEngine`] is compiled once per processing cycle: it reads the
//! source template through the virtual filesystem, registers the function
//! namespace against the cycle's [`StagingStore`], and renders straight into
//! the candidate file's writer.

use std::io::Write;
use std::path::{Path, PathBuf};

use tera::Tera;

use confsync_core::{Filesystem, StagingStore};

use crate::context::TemplateContext;
use crate::error::RenderError;
use crate::functions;

// ---------------------------------------------------------------------------
// TemplateEngine
// ---------------------------------------------------------------------------

/// One compiled template plus its store-bound function namespace.
pub struct TemplateEngine {
    tera: Tera,
    name: String,
    path: PathBuf,
}

impl TemplateEngine {
    /// Read and compile the template at `src`.
    ///
    /// Returns `RenderError::MissingTemplate` if `src` does not exist and
    /// `RenderError::Syntax` if it does not compile.
    pub fn compile(
        fs: &dyn Filesystem,
        src: &Path,
        store: &StagingStore,
    ) -> Result<Self, RenderError> {
        tracing::debug!("using source template {}", src.display());
        let exists = fs.exists(src).map_err(|e| io_err(src, e))?;
        if !exists {
            return Err(RenderError::MissingTemplate {
                path: src.to_path_buf(),
            });
        }
        let text = fs.read_to_string(src).map_err(|e| io_err(src, e))?;

        tracing::debug!("compiling source template {}", src.display());
        let name = src
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "template".to_string());
        let mut engine = Self::compile_str(&name, &text, store).map_err(|e| match e {
            RenderError::Syntax { source, .. } => RenderError::Syntax {
                path: src.to_path_buf(),
                source,
            },
            other => other,
        })?;
        engine.path = src.to_path_buf();
        Ok(engine)
    }

    /// Compile template text held in memory.
    pub fn compile_str(
        name: &str,
        text: &str,
        store: &StagingStore,
    ) -> Result<Self, RenderError> {
        let mut tera = Tera::default();
        // Configuration files are not HTML; never escape.
        tera.autoescape_on(vec![]);
        functions::register(&mut tera, store);
        tera.add_raw_template(name, text)
            .map_err(|source| RenderError::Syntax {
                path: PathBuf::from(name),
                source,
            })?;
        Ok(TemplateEngine {
            tera,
            name: name.to_string(),
            path: PathBuf::from(name),
        })
    }

    /// Render into `out`. Output may be partially written on error.
    pub fn render_to(&self, ctx: &TemplateContext, out: impl Write) -> Result<(), RenderError> {
        let tera_ctx = ctx.to_tera_context().map_err(|e| self.render_err(e))?;
        self.tera
            .render_to(&self.name, &tera_ctx, out)
            .map_err(|e| self.render_err(e))
    }

    /// Render to an in-memory string.
    pub fn render(&self, ctx: &TemplateContext) -> Result<String, RenderError> {
        let tera_ctx = ctx.to_tera_context().map_err(|e| self.render_err(e))?;
        self.tera
            .render(&self.name, &tera_ctx)
            .map_err(|e| self.render_err(e))
    }

    fn render_err(&self, source: tera::Error) -> RenderError {
        RenderError::Render {
            path: self.path.clone(),
            source,
        }
    }
}

fn io_err(path: &Path, source: std::io::Error) -> RenderError {
    RenderError::Io {
        path: path.to_path_buf(),
        source,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
