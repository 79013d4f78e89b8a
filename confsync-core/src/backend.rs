//! Backend store clients.
//!
//! The pipeline only needs [`StoreClient::get_values`]: given fully
//! prefix-qualified keys, return a flat map of every key at or beneath them.
//! Network backends live outside this crate; the clients here cover the
//! process environment, YAML files, and a static map.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Mutex;

use crate::error::BackendError;
use crate::store::{clean_key, in_scope};

/// Source of key/value data for a resource.
pub trait StoreClient: Send + Sync {
    /// Return every key equal to or nested under any of `keys`.
    fn get_values(&self, keys: &[String]) -> Result<BTreeMap<String, String>, BackendError>;

    /// Opaque, monotonically increasing change index, when the backend has one.
    fn current_index(&self) -> Option<u64> {
        None
    }
}

fn select<'a, I>(source: I, keys: &[String]) -> BTreeMap<String, String>
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    let scopes: Vec<String> = keys.iter().map(|k| clean_key(k)).collect();
    source
        .into_iter()
        .filter(|(k, _)| scopes.iter().any(|scope| in_scope(scope, k)))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

// ---------------------------------------------------------------------------
// MemoryClient
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
struct MemoryData {
    values: BTreeMap<String, String>,
    index: u64,
}

/// Static in-process map. Every mutation advances [`StoreClient::current_index`].
#[derive(Debug, Default)]
pub struct MemoryClient {
    data: Mutex<MemoryData>,
}

impl MemoryClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_pairs<K, V, I>(pairs: I) -> Self
    where
        K: AsRef<str>,
        V: Into<String>,
        I: IntoIterator<Item = (K, V)>,
    {
        let values = pairs
            .into_iter()
            .map(|(k, v)| (clean_key(k.as_ref()), v.into()))
            .collect();
        Self {
            data: Mutex::new(MemoryData { values, index: 1 }),
        }
    }

    pub fn set(&self, key: &str, value: impl Into<String>) -> Result<(), BackendError> {
        let mut data = self.lock()?;
        data.values.insert(clean_key(key), value.into());
        data.index += 1;
        Ok(())
    }

    pub fn remove(&self, key: &str) -> Result<(), BackendError> {
        let mut data = self.lock()?;
        data.values.remove(&clean_key(key));
        data.index += 1;
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, MemoryData>, BackendError> {
        self.data.lock().map_err(|_| BackendError::Request {
            backend: "memory".into(),
            message: "store lock poisoned".into(),
        })
    }
}

impl StoreClient for MemoryClient {
    fn get_values(&self, keys: &[String]) -> Result<BTreeMap<String, String>, BackendError> {
        let data = self.lock()?;
        Ok(select(&data.values, keys))
    }

    fn current_index(&self) -> Option<u64> {
        self.lock().ok().map(|d| d.index)
    }
}

// ---------------------------------------------------------------------------
// EnvClient
// ---------------------------------------------------------------------------

/// Reads keys from environment variables: `/foo/bar` ↔ `FOO_BAR`.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvClient;

impl EnvClient {
    fn key_to_var(key: &str) -> String {
        clean_key(key)
            .trim_start_matches('/')
            .replace('/', "_")
            .to_uppercase()
    }

    fn var_to_key(var: &str) -> String {
        clean_key(&var.replace('_', "/").to_lowercase())
    }
}

impl StoreClient for EnvClient {
    fn get_values(&self, keys: &[String]) -> Result<BTreeMap<String, String>, BackendError> {
        let vars: Vec<(String, String)> = std::env::vars().collect();
        let mut out = BTreeMap::new();
        for key in keys {
            let wanted = Self::key_to_var(key);
            for (name, value) in &vars {
                let matches = wanted.is_empty()
                    || *name == wanted
                    || name
                        .strip_prefix(&wanted)
                        .is_some_and(|rest| rest.starts_with('_'));
                if matches {
                    out.insert(Self::var_to_key(name), value.clone());
                }
            }
        }
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// FileClient
// ---------------------------------------------------------------------------

/// Reads one or more YAML documents and flattens them into `/a/b/0` keys.
///
/// Files are re-read on every fetch; later files override earlier ones.
#[derive(Debug, Clone)]
pub struct FileClient {
    paths: Vec<PathBuf>,
}

impl FileClient {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    fn load(&self) -> Result<BTreeMap<String, String>, BackendError> {
        let mut out = BTreeMap::new();
        for path in &self.paths {
            let text = std::fs::read_to_string(path).map_err(|source| BackendError::Io {
                path: path.clone(),
                source,
            })?;
            let doc: serde_yaml::Value =
                serde_yaml::from_str(&text).map_err(|source| BackendError::Decode {
                    path: path.clone(),
                    source,
                })?;
            flatten("", &doc, &mut out);
        }
        Ok(out)
    }
}

impl StoreClient for FileClient {
    fn get_values(&self, keys: &[String]) -> Result<BTreeMap<String, String>, BackendError> {
        let all = self.load()?;
        Ok(select(&all, keys))
    }
}

fn flatten(prefix: &str, value: &serde_yaml::Value, out: &mut BTreeMap<String, String>) {
    use serde_yaml::Value;

    match value {
        Value::Mapping(map) => {
            for (k, v) in map {
                let segment = match k {
                    Value::String(s) => s.clone(),
                    Value::Number(n) => n.to_string(),
                    Value::Bool(b) => b.to_string(),
                    _ => continue,
                };
                flatten(&format!("{prefix}/{segment}"), v, out);
            }
        }
        Value::Sequence(items) => {
            for (i, v) in items.iter().enumerate() {
                flatten(&format!("{prefix}/{i}"), v, out);
            }
        }
        Value::String(s) => {
            out.insert(clean_key(prefix), s.clone());
        }
        Value::Number(n) => {
            out.insert(clean_key(prefix), n.to_string());
        }
        Value::Bool(b) => {
            out.insert(clean_key(prefix), b.to_string());
        }
        Value::Null => {
            out.insert(clean_key(prefix), String::new());
        }
        Value::Tagged(tagged) => flatten(prefix, &tagged.value, out),
    }
}
