//! Template resource descriptors.
//!
//! # Layout
//!
//! ```text
//! <conf_dir>/
//!   conf.d/
//!     <name>.toml        (one [template] table per file, may nest in subdirs)
//!   templates/
//!     <src>              (joined with each descriptor's `src`)
//! ```
//!
//! # Descriptor format
//!
//! ```toml
//! [template]
//! src = "nginx.conf.tmpl"
//! dest = "/etc/nginx/nginx.conf"
//! keys = ["/nginx"]
//! prefix = "/production"
//! owner = "www-data"          # or uid = 33
//! mode = "0644"
//! check_cmd = "nginx -t -c {{src}}"
//! reload_cmd = "systemctl reload nginx"
//! ```
//!
//! All reads go through a [`Filesystem`] so loading is testable in memory.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{IdentityKind, ResourceError};
use crate::identity::IdentityResolver;
use crate::store::normalize_prefix;
use crate::types::{FileMode, ModePolicy, ProcessConfig, Resource, ResourceConfig};
use crate::vfs::Filesystem;

/// Marker for "not set" numeric ids.
const UNSET_ID: i64 = -1;

#[derive(Debug, Deserialize)]
struct DescriptorFile {
    template: TemplateSection,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct TemplateSection {
    src: String,
    dest: String,
    keys: Vec<String>,
    prefix: String,
    mode: String,
    owner: String,
    group: String,
    uid: i64,
    gid: i64,
    check_cmd: String,
    reload_cmd: String,
}

impl Default for TemplateSection {
    fn default() -> Self {
        Self {
            src: String::new(),
            dest: String::new(),
            keys: Vec::new(),
            prefix: String::new(),
            mode: String::new(),
            owner: String::new(),
            group: String::new(),
            uid: UNSET_ID,
            gid: UNSET_ID,
            check_cmd: String::new(),
            reload_cmd: String::new(),
        }
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}

// ---------------------------------------------------------------------------
// Load
// ---------------------------------------------------------------------------

/// Load and resolve the descriptor at `path`.
///
/// Returns `ResourceError::Read`/`Descriptor` if the file cannot be read or
/// decoded, `EmptySource` if `src` is missing, `InvalidMode` for a bad `mode`,
/// and `IdentityResolution` if a symbolic owner/group cannot be resolved.
pub fn load(
    fs: &dyn Filesystem,
    path: &Path,
    config: &ProcessConfig,
    ids: &dyn IdentityResolver,
) -> Result<Resource, ResourceError> {
    tracing::debug!("loading template resource from {}", path.display());

    let contents = fs.read_to_string(path).map_err(|source| ResourceError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let file: DescriptorFile =
        toml::from_str(&contents).map_err(|source| ResourceError::Descriptor {
            path: path.to_path_buf(),
            source,
        })?;
    let section = file.template;

    let prefix = match non_empty(section.prefix) {
        Some(p) => p,
        None => config.prefix.clone(),
    };
    let prefix = normalize_prefix(&prefix);

    if section.src.trim().is_empty() {
        return Err(ResourceError::EmptySource {
            path: path.to_path_buf(),
        });
    }

    let mode = match non_empty(section.mode) {
        None => ModePolicy::Inherit,
        Some(raw) => match FileMode::parse(&raw) {
            Some(m) => ModePolicy::Explicit(m),
            None => {
                return Err(ResourceError::InvalidMode {
                    path: path.to_path_buf(),
                    mode: raw,
                })
            }
        },
    };

    let uid = resolve_id(
        section.uid,
        &section.owner,
        IdentityKind::User,
        config.identity.uid,
        ids,
    )?;
    let gid = resolve_id(
        section.gid,
        &section.group,
        IdentityKind::Group,
        config.identity.gid,
        ids,
    )?;

    Ok(Resource::new(ResourceConfig {
        descriptor: path.to_path_buf(),
        src: config.template_dir.join(section.src.trim_start_matches('/')),
        dest: PathBuf::from(section.dest),
        keys: section.keys,
        prefix,
        mode,
        uid,
        gid,
        check_cmd: non_empty(section.check_cmd),
        reload_cmd: non_empty(section.reload_cmd),
        flags: config.flags,
    }))
}

fn resolve_id(
    raw: i64,
    name: &str,
    kind: IdentityKind,
    fallback: u32,
    ids: &dyn IdentityResolver,
) -> Result<u32, ResourceError> {
    if raw >= 0 {
        return u32::try_from(raw).map_err(|_| ResourceError::IdentityResolution {
            kind,
            name: raw.to_string(),
            reason: "id out of range".into(),
        });
    }
    if name.is_empty() {
        return Ok(fallback);
    }
    let lookup = match kind {
        IdentityKind::User => ids.lookup_user(name),
        IdentityKind::Group => ids.lookup_group(name),
    };
    lookup.map_err(|reason| ResourceError::IdentityResolution {
        kind,
        name: name.to_string(),
        reason,
    })
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Every `*.toml` file under `dir`, recursively, sorted by path.
///
/// Symlinked directories are not descended into; symlinked files are listed.
pub fn list_descriptors(fs: &dyn Filesystem, dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    collect_descriptors(fs, dir, &mut found)?;
    found.sort();
    Ok(found)
}

fn collect_descriptors(
    fs: &dyn Filesystem,
    dir: &Path,
    out: &mut Vec<PathBuf>,
) -> std::io::Result<()> {
    for path in fs.read_dir(dir)? {
        let stat = fs.stat(&path)?;
        if stat.is_dir {
            if fs.is_symlink(&path)? {
                tracing::debug!("skipping symlinked directory {}", path.display());
            } else {
                collect_descriptors(fs, &path, out)?;
            }
        } else if path.extension().and_then(|s| s.to_str()) == Some("toml") {
            out.push(path);
        }
    }
    Ok(())
}
