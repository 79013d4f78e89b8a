//! Template context: the variables every resource template can read.

use serde::{Deserialize, Serialize};

use confsync_core::{ResourceConfig, StagingStore};

/// Variables exposed to templates alongside the store functions.
///
/// Store data itself is reached through functions (`getv`, `gets`, ...); the
/// context only describes the resource being rendered.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TemplateContext {
    /// Destination path of the rendered file.
    pub dest: String,
    /// Key prefix the store was fetched with.
    pub prefix: String,
    /// Fetch index of the store snapshot being rendered.
    pub fetch_index: u64,
}

impl TemplateContext {
    /// Build a [`TemplateContext`] from a resource and its current store.
    pub fn for_resource(config: &ResourceConfig, store: &StagingStore) -> Self {
        TemplateContext {
            dest: config.dest.display().to_string(),
            prefix: config.prefix.clone(),
            fetch_index: store.fetch_index(),
        }
    }

    /// Convert to a [`tera::Context`] for rendering.
    pub fn to_tera_context(&self) -> Result<tera::Context, tera::Error> {
        tera::Context::from_serialize(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use confsync_core::{ModePolicy, SyncFlags};
    use std::path::PathBuf;

    #[test]
    fn context_fields_populated() {
        let config = ResourceConfig {
            descriptor: PathBuf::from("/c/conf.d/a.toml"),
            src: PathBuf::from("/c/templates/a.tmpl"),
            dest: PathBuf::from("/etc/a.conf"),
            keys: vec![],
            prefix: "/app".into(),
            mode: ModePolicy::Inherit,
            uid: 0,
            gid: 0,
            check_cmd: None,
            reload_cmd: None,
            flags: SyncFlags::default(),
        };
        let ctx = TemplateContext::for_resource(&config, &StagingStore::new());
        assert_eq!(ctx.dest, "/etc/a.conf");
        assert_eq!(ctx.prefix, "/app");
        assert_eq!(ctx.fetch_index, 0);
        ctx.to_tera_context().expect("context conversion");
    }
}
