//! Dry-run unified diff support for `confsync diff`.
//!
//! Fetches and renders entirely in memory; nothing is staged and the
//! destination is only read.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use similar::TextDiff;

use confsync_core::{Filesystem, Resource, StoreClient};
use confsync_renderer::{TemplateContext, TemplateEngine};

use crate::error::{fs_err, SyncError};

/// Pending change for one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceDiff {
    pub dest: PathBuf,
    /// Empty when the destination already matches.
    pub unified_diff: String,
}

impl ResourceDiff {
    pub fn is_empty(&self) -> bool {
        self.unified_diff.is_empty()
    }
}

/// Render what a cycle would commit and compare it with the destination.
pub fn diff_resource(
    resource: &mut Resource,
    client: &dyn StoreClient,
    fs: &dyn Filesystem,
) -> Result<ResourceDiff, SyncError> {
    let config = &resource.config;
    resource
        .store
        .refresh(client, &config.prefix, &config.keys)?;

    let engine = TemplateEngine::compile(fs, &config.src, &resource.store)?;
    let ctx = TemplateContext::for_resource(config, &resource.store);
    let rendered = engine.render(&ctx)?;
    let existing = read_existing_or_empty(fs, &config.dest)?;

    if existing == rendered {
        return Ok(ResourceDiff {
            dest: config.dest.clone(),
            unified_diff: String::new(),
        });
    }

    let header = config.dest.display().to_string();
    let header = header.trim_start_matches('/');
    let unified = TextDiff::from_lines(&existing, &rendered)
        .unified_diff()
        .header(&format!("a/{header}"), &format!("b/{header}"))
        .context_radius(3)
        .to_string();

    Ok(ResourceDiff {
        dest: config.dest.clone(),
        unified_diff: unified,
    })
}

fn read_existing_or_empty(fs: &dyn Filesystem, path: &Path) -> Result<String, SyncError> {
    match fs.read(path) {
        Ok(bytes) => Ok(String::from_utf8_lossy(&bytes).into_owned()),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(fs_err("read", path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confsync_core::{MemoryClient, MemoryFs, ModePolicy, ResourceConfig, SyncFlags};

    fn setup() -> (MemoryFs, Resource) {
        let fs = MemoryFs::new();
        fs.mkdir_all(Path::new("/t"), 0o755).unwrap();
        fs.mkdir_all(Path::new("/etc"), 0o755).unwrap();
        fs.write(
            Path::new("/t/app.tmpl"),
            b"host={{ getv(key=\"/host\") }}\nport=80\n",
            0o644,
        )
        .unwrap();
        let resource = Resource::new(ResourceConfig {
            descriptor: PathBuf::from("/c/app.toml"),
            src: PathBuf::from("/t/app.tmpl"),
            dest: PathBuf::from("/etc/app.conf"),
            keys: vec!["/host".into()],
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

    #[test]
    fn matching_destination_has_empty_diff() {
        let (fs, mut resource) = setup();
        fs.write(Path::new("/etc/app.conf"), b"host=a\nport=80\n", 0o644)
            .unwrap();
        let client = MemoryClient::from_pairs([("/host", "a")]);
        let diff = diff_resource(&mut resource, &client, &fs).unwrap();
        assert!(diff.is_empty());
    }

    #[test]
    fn changed_value_produces_unified_diff_without_writing() {
        let (fs, mut resource) = setup();
        fs.write(Path::new("/etc/app.conf"), b"host=a\nport=80\n", 0o644)
            .unwrap();
        let client = MemoryClient::from_pairs([("/host", "b")]);
        let diff = diff_resource(&mut resource, &client, &fs).unwrap();

        assert!(diff.unified_diff.contains("--- a/etc/app.conf"));
        assert!(diff.unified_diff.contains("+++ b/etc/app.conf"));
        assert!(diff.unified_diff.contains("-host=a"));
        assert!(diff.unified_diff.contains("+host=b"));
        assert_eq!(
            fs.read_to_string(Path::new("/etc/app.conf")).unwrap(),
            "host=a\nport=80\n"
        );
        assert_eq!(fs.read_dir(Path::new("/etc")).unwrap().len(), 1);
    }

    #[test]
    fn missing_destination_diffs_against_empty() {
        let (fs, mut resource) = setup();
        let client = MemoryClient::from_pairs([("/host", "a")]);
        let diff = diff_resource(&mut resource, &client, &fs).unwrap();
        assert!(diff.unified_diff.contains("+port=80"));
    }
}
