//! Process-all driver shared by `confsync sync` and `confsync diff`.
//!
//! Each descriptor under the resource directory is loaded and run
//! independently; a failing resource is recorded and the rest still run.

use std::path::PathBuf;

use confsync_core::{descriptor, Filesystem, IdentityResolver, ProcessConfig, StoreClient};

use crate::diff::{diff_resource, ResourceDiff};
use crate::error::{fs_err, SyncError};
use crate::writer::{process, SyncOutcome};

/// Outcome for one descriptor.
#[derive(Debug)]
pub struct ResourceReport<T> {
    pub descriptor: PathBuf,
    pub result: Result<T, SyncError>,
}

/// Outcomes for every descriptor, in path order.
#[derive(Debug)]
pub struct RunReport<T> {
    pub resources: Vec<ResourceReport<T>>,
}

impl<T> RunReport<T> {
    pub fn failures(&self) -> impl Iterator<Item = &ResourceReport<T>> {
        self.resources.iter().filter(|r| r.result.is_err())
    }

    pub fn has_failures(&self) -> bool {
        self.failures().next().is_some()
    }
}

/// Run one stage-and-commit cycle for every descriptor.
///
/// Returns `Err` only if the resource directory cannot be listed.
pub fn process_all(
    config: &ProcessConfig,
    client: &dyn StoreClient,
    fs: &dyn Filesystem,
    ids: &dyn IdentityResolver,
) -> Result<RunReport<SyncOutcome>, SyncError> {
    for_each_resource(config, fs, ids, |resource| process(resource, client, fs))
}

/// Compute the pending diff for every descriptor without writing.
pub fn diff_all(
    config: &ProcessConfig,
    client: &dyn StoreClient,
    fs: &dyn Filesystem,
    ids: &dyn IdentityResolver,
) -> Result<RunReport<ResourceDiff>, SyncError> {
    for_each_resource(config, fs, ids, |resource| {
        diff_resource(resource, client, fs)
    })
}

fn for_each_resource<T, F>(
    config: &ProcessConfig,
    fs: &dyn Filesystem,
    ids: &dyn IdentityResolver,
    mut run: F,
) -> Result<RunReport<T>, SyncError>
where
    F: FnMut(&mut confsync_core::Resource) -> Result<T, SyncError>,
{
    let paths = descriptor::list_descriptors(fs, &config.resource_dir)
        .map_err(|e| fs_err("list descriptors", &config.resource_dir, e))?;
    tracing::debug!(
        "found {} template resource(s) in {}",
        paths.len(),
        config.resource_dir.display()
    );

    let mut resources = Vec::with_capacity(paths.len());
    for path in paths {
        let result = descriptor::load(fs, &path, config, ids)
            .map_err(SyncError::from)
            .and_then(|mut resource| run(&mut resource));
        if let Err(e) = &result {
            tracing::error!("{}: {e}", path.display());
        }
        resources.push(ResourceReport {
            descriptor: path,
            result,
        });
    }
    Ok(RunReport { resources })
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use confsync_core::{MemoryClient, MemoryFs, ProcessIdentity, StaticIdentity};

    use super::*;

    fn conf() -> ProcessConfig {
        ProcessConfig::from_conf_dir(Path::new("/etc/confsync"), ProcessIdentity::new(0, 0))
    }

    fn fs_with_descriptors(descriptors: &[(&str, &str)]) -> MemoryFs {
        let fs = MemoryFs::new();
        fs.mkdir_all(Path::new("/etc/confsync/conf.d"), 0o755).unwrap();
        fs.mkdir_all(Path::new("/etc/confsync/templates"), 0o755).unwrap();
        fs.mkdir_all(Path::new("/srv"), 0o755).unwrap();
        for (name, body) in descriptors {
            fs.write(
                &Path::new("/etc/confsync/conf.d").join(name),
                body.as_bytes(),
                0o644,
            )
            .unwrap();
        }
        fs
    }

    #[test]
    fn empty_resource_dir_yields_empty_report() {
        let fs = fs_with_descriptors(&[]);
        let report =
            process_all(&conf(), &MemoryClient::new(), &fs, &StaticIdentity::new()).unwrap();
        assert!(report.resources.is_empty());
        assert!(!report.has_failures());
    }

    #[test]
    fn missing_resource_dir_is_an_error() {
        let fs = MemoryFs::new();
        let err = process_all(&conf(), &MemoryClient::new(), &fs, &StaticIdentity::new())
            .unwrap_err();
        assert!(matches!(err, SyncError::Filesystem { .. }), "got: {err}");
    }

    #[test]
    fn failing_resource_does_not_stop_the_rest() {
        let fs = fs_with_descriptors(&[
            ("a.toml", "[template]\ndest = \"/srv/a\"\n"),
            ("b.toml", "[template]\nsrc = \"b.tmpl\"\ndest = \"/srv/b\"\nkeys = [\"/b\"]\n"),
        ]);
        fs.write(
            Path::new("/etc/confsync/templates/b.tmpl"),
            b"{{ getv(key=\"/b\") }}",
            0o644,
        )
        .unwrap();
        let client = MemoryClient::from_pairs([("/b", "bee")]);

        let report = process_all(&conf(), &client, &fs, &StaticIdentity::new()).unwrap();
        assert_eq!(report.resources.len(), 2);
        assert!(report.has_failures());
        assert!(matches!(
            report.resources[0].result,
            Err(SyncError::Resource(_))
        ));
        assert!(matches!(
            report.resources[1].result,
            Ok(SyncOutcome::Written { .. })
        ));
        assert_eq!(fs.read_to_string(Path::new("/srv/b")).unwrap(), "bee");
    }
}
