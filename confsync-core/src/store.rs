//! Staging store: the per-cycle, prefix-normalised key space templates read.
//!
//! Every key held here starts with `/` and is relative to the resource prefix:
//! with prefix `/app`, the backend key `/app/db/host` is stored as `/db/host`.
//! A [`StagingStore::refresh`] replaces the whole map, so no key from an
//! earlier fetch survives. Iteration is always lexicographic by key.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::Serialize;

use crate::backend::StoreClient;
use crate::error::{BackendError, KeyNotFound};

// ---------------------------------------------------------------------------
// Key helpers
// ---------------------------------------------------------------------------

/// Canonical form of a key: rooted at `/`, no empty, `.` or `..` segments.
pub fn clean_key(key: &str) -> String {
    let mut parts: Vec<&str> = Vec::new();
    for seg in key.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            s => parts.push(s),
        }
    }
    format!("/{}", parts.join("/"))
}

/// Qualify `key` with `prefix`.
pub fn join_key(prefix: &str, key: &str) -> String {
    clean_key(&format!("{prefix}/{key}"))
}

/// Make sure a prefix starts with `/`.
pub fn normalize_prefix(prefix: &str) -> String {
    if prefix.starts_with('/') {
        prefix.to_string()
    } else {
        format!("/{prefix}")
    }
}

/// Strip `prefix` from a backend key on a path-component boundary.
///
/// Keys outside the prefix are kept whole (cleaned).
pub fn relativize(prefix: &str, key: &str) -> String {
    let prefix = clean_key(prefix);
    let key = clean_key(key);
    if prefix == "/" {
        return key;
    }
    if key == prefix {
        return "/".to_string();
    }
    match key.strip_prefix(&prefix) {
        Some(rest) if rest.starts_with('/') => rest.to_string(),
        _ => key,
    }
}

/// Whether `key` equals `scope` or lies beneath it. Both must be clean.
pub(crate) fn in_scope(scope: &str, key: &str) -> bool {
    scope == "/"
        || key == scope
        || key
            .strip_prefix(scope)
            .is_some_and(|rest| rest.starts_with('/'))
}

// ---------------------------------------------------------------------------
// StagingStore
// ---------------------------------------------------------------------------

/// A key/value pair as exposed to templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KvPair {
    pub key: String,
    pub value: String,
}

/// In-memory, prefix-normalised view of one fetch cycle.
///
/// Cloning is cheap and yields an immutable snapshot of the current cycle;
/// a later `refresh` on the original does not affect existing clones.
#[derive(Debug, Clone, Default)]
pub struct StagingStore {
    entries: Arc<BTreeMap<String, String>>,
    fetch_index: u64,
}

impl StagingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch `keys` (qualified with `prefix`) and replace the store contents.
    ///
    /// On backend failure the previous contents are left untouched and the
    /// error is returned; callers must not render from the stale data.
    pub fn refresh(
        &mut self,
        client: &dyn StoreClient,
        prefix: &str,
        keys: &[String],
    ) -> Result<(), BackendError> {
        let qualified: Vec<String> = keys.iter().map(|k| join_key(prefix, k)).collect();
        tracing::debug!("retrieving keys from store: {qualified:?}");
        tracing::debug!("key prefix set to {prefix}");

        let values = client.get_values(&qualified)?;
        tracing::debug!("got {} value(s) from store", values.len());

        self.replace_all(prefix, values);
        self.fetch_index = client
            .current_index()
            .unwrap_or_else(|| self.fetch_index.saturating_add(1));
        Ok(())
    }

    /// Purge, then insert every entry relativised against `prefix`.
    pub fn replace_all<I>(&mut self, prefix: &str, values: I)
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let entries: BTreeMap<String, String> = values
            .into_iter()
            .map(|(k, v)| (relativize(prefix, &k), v))
            .collect();
        self.entries = Arc::new(entries);
    }

    /// Index of the last successful fetch (0 before the first).
    pub fn fetch_index(&self) -> u64 {
        self.fetch_index
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Point lookup.
    pub fn get(&self, key: &str) -> Result<&str, KeyNotFound> {
        let key = clean_key(key);
        self.entries
            .get(&key)
            .map(String::as_str)
            .ok_or(KeyNotFound { key })
    }

    pub fn get_pair(&self, key: &str) -> Result<KvPair, KeyNotFound> {
        let value = self.get(key)?.to_string();
        Ok(KvPair {
            key: clean_key(key),
            value,
        })
    }

    pub fn exists(&self, key: &str) -> bool {
        self.entries.contains_key(&clean_key(key))
    }

    /// All pairs under a prefix, sorted by key.
    ///
    /// A trailing `/*` restricts the result to entries strictly beneath the
    /// prefix.
    pub fn get_all(&self, prefix: &str) -> Vec<KvPair> {
        let (scope, children_only) = match prefix.strip_suffix("/*") {
            Some(base) => (clean_key(base), true),
            None => (clean_key(prefix), false),
        };
        self.entries
            .iter()
            .filter(|(k, _)| in_scope(&scope, k))
            .filter(|(k, _)| !(children_only && **k == scope))
            .map(|(k, v)| KvPair {
                key: k.clone(),
                value: v.clone(),
            })
            .collect()
    }

    /// Values under a prefix, in key order.
    pub fn get_all_values(&self, prefix: &str) -> Vec<String> {
        self.get_all(prefix).into_iter().map(|kv| kv.value).collect()
    }

    /// Names of the immediate children of `prefix`, sorted and de-duplicated.
    pub fn list(&self, prefix: &str) -> Vec<String> {
        let scope = clean_key(prefix);
        let mut names = BTreeSet::new();
        for key in self.entries.keys() {
            if *key == scope {
                if let Some(base) = key.rsplit('/').next().filter(|b| !b.is_empty()) {
                    names.insert(base.to_string());
                }
                continue;
            }
            if let Some(first) = child_segments(&scope, key).and_then(|mut s| s.next()) {
                names.insert(first.to_string());
            }
        }
        names.into_iter().collect()
    }

    /// Like [`StagingStore::list`], keeping only children that have children.
    pub fn list_dir(&self, prefix: &str) -> Vec<String> {
        let scope = clean_key(prefix);
        let mut names = BTreeSet::new();
        for key in self.entries.keys() {
            let Some(mut segments) = child_segments(&scope, key) else {
                continue;
            };
            if let (Some(first), Some(_)) = (segments.next(), segments.next()) {
                names.insert(first.to_string());
            }
        }
        names.into_iter().collect()
    }

    /// Iterate all entries in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

/// Segments of `key` below `scope`, or `None` when `key` is not strictly nested.
fn child_segments<'a>(scope: &str, key: &'a str) -> Option<std::str::Split<'a, char>> {
    let rest = if scope == "/" {
        key.strip_prefix('/')?
    } else {
        key.strip_prefix(scope)?.strip_prefix('/')?
    };
    if rest.is_empty() {
        return None;
    }
    Some(rest.split('/'))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryClient;
    use rstest::rstest;

    fn store_with(pairs: &[(&str, &str)]) -> StagingStore {
        let mut store = StagingStore::new();
        store.replace_all(
            "/",
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())),
        );
        store
    }

    #[rstest]
    #[case("/", "/")]
    #[case("", "/")]
    #[case("//a//b/", "/a/b")]
    #[case("a/./b", "/a/b")]
    #[case("/a/b/../c", "/a/c")]
    #[case("/../a", "/a")]
    fn clean_key_cases(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(clean_key(input), expected);
    }

    #[rstest]
    #[case("/app/", "/app/db/host", "/db/host")]
    #[case("/app", "/app/db/host", "/db/host")]
    #[case("/app", "/app", "/")]
    #[case("/app", "/application/x", "/application/x")]
    #[case("/", "/foo", "/foo")]
    fn relativize_cases(#[case] prefix: &str, #[case] key: &str, #[case] expected: &str) {
        assert_eq!(relativize(prefix, key), expected);
    }

    #[test]
    fn normalize_prefix_adds_leading_slash() {
        assert_eq!(normalize_prefix(""), "/");
        assert_eq!(normalize_prefix("app"), "/app");
        assert_eq!(normalize_prefix("/app/"), "/app/");
    }

    #[test]
    fn prefix_is_stripped_on_refresh() {
        let client = MemoryClient::from_pairs([("/app/db/host", "x")]);
        let mut store = StagingStore::new();
        store
            .refresh(&client, "/app/", &["db".to_string()])
            .unwrap();
        assert_eq!(store.get("/db/host"), Ok("x"));
        assert!(!store.exists("/app/db/host"));
    }

    #[test]
    fn refresh_purges_previous_cycle() {
        let client = MemoryClient::from_pairs([("/a", "1"), ("/b", "2")]);
        let mut store = StagingStore::new();
        store.refresh(&client, "/", &["/".to_string()]).unwrap();
        assert!(store.exists("/a"));

        client.remove("/a").unwrap();
        store.refresh(&client, "/", &["/".to_string()]).unwrap();
        assert!(!store.exists("/a"));
        assert_eq!(store.get("/b"), Ok("2"));
    }

    #[test]
    fn refresh_failure_keeps_stale_contents() {
        struct Broken;
        impl StoreClient for Broken {
            fn get_values(
                &self,
                _keys: &[String],
            ) -> Result<BTreeMap<String, String>, BackendError> {
                Err(BackendError::Request {
                    backend: "broken".into(),
                    message: "down".into(),
                })
            }
        }

        let mut store = store_with(&[("/a", "1")]);
        let before = store.fetch_index();
        assert!(store.refresh(&Broken, "/", &["a".to_string()]).is_err());
        assert_eq!(store.get("/a"), Ok("1"));
        assert_eq!(store.fetch_index(), before);
    }

    #[test]
    fn fetch_index_advances() {
        let client = MemoryClient::from_pairs([("/a", "1")]);
        let mut store = StagingStore::new();
        store.refresh(&client, "/", &["a".to_string()]).unwrap();
        let first = store.fetch_index();
        client.set("/a", "2").unwrap();
        store.refresh(&client, "/", &["a".to_string()]).unwrap();
        assert!(store.fetch_index() > first);
    }

    #[test]
    fn get_missing_key_reports_cleaned_key() {
        let store = store_with(&[]);
        assert_eq!(
            store.get("missing//key"),
            Err(KeyNotFound {
                key: "/missing/key".into()
            })
        );
    }

    #[test]
    fn get_all_is_sorted_and_scoped() {
        let store = store_with(&[
            ("/upstream/b", "2"),
            ("/upstream/a", "1"),
            ("/upstreams", "no"),
            ("/other", "x"),
        ]);
        assert_eq!(store.get_all_values("/upstream"), vec!["1", "2"]);
        assert_eq!(store.get_all_values("/upstream/*"), vec!["1", "2"]);
        let keys: Vec<_> = store.get_all("/").into_iter().map(|kv| kv.key).collect();
        assert_eq!(keys, vec!["/other", "/upstream/a", "/upstream/b", "/upstreams"]);
    }

    #[test]
    fn list_and_list_dir() {
        let store = store_with(&[
            ("/svc/web/host", "h"),
            ("/svc/web/port", "p"),
            ("/svc/db/host", "d"),
            ("/svc/name", "n"),
        ]);
        assert_eq!(store.list("/svc"), vec!["db", "name", "web"]);
        assert_eq!(store.list_dir("/svc"), vec!["db", "web"]);
        assert_eq!(store.list("/svc/name"), vec!["name"]);
        assert_eq!(store.list("/"), vec!["svc"]);
        assert!(store.list("/nothing").is_empty());
    }

    #[test]
    fn clones_are_snapshots() {
        let mut store = store_with(&[("/a", "1")]);
        let snapshot = store.clone();
        store.replace_all("/", [("/b".to_string(), "2".to_string())]);
        assert!(snapshot.exists("/a"));
        assert!(!store.exists("/a"));
    }
}
