//! Template function namespace.
//!
//! | Name     | Kind     | Result                                             |
//! |----------|----------|----------------------------------------------------|
//! | `getv`   | function | value of `key`, or `default`, else render error    |
//! | `get`    | function | `{key, value}` of `key`, else render error         |
//! | `exists` | function | whether `key` is present                           |
//! | `getvs`  | function | values under `key`, sorted by key                  |
//! | `gets`   | function | `[{key, value}]` under `key`, sorted by key        |
//! | `ls`     | function | names of the immediate children of `key`           |
//! | `lsdir`  | function | children of `key` that have children themselves    |
//! | `getenv` | function | environment variable `key`, or `default`, or `""`  |
//! | `base`   | filter   | last path segment                                  |
//! | `dir`    | filter   | everything before the last path segment            |
//! | `split_path` | filter | path segments as a list                          |
//!
//! Store functions are bound to a snapshot of the [`StagingStore`] taken
//! when the engine is compiled.

use std::collections::HashMap;

use tera::{Tera, Value};

use confsync_core::StagingStore;

type Args = HashMap<String, Value>;

/// Register every function and filter on `tera`, bound to `store`.
pub fn register(tera: &mut Tera, store: &StagingStore) {
    register_store_fn(tera, "getv", store, getv);
    register_store_fn(tera, "get", store, get);
    register_store_fn(tera, "exists", store, exists);
    register_store_fn(tera, "getvs", store, getvs);
    register_store_fn(tera, "gets", store, gets);
    register_store_fn(tera, "ls", store, ls);
    register_store_fn(tera, "lsdir", store, lsdir);

    tera.register_function("getenv", getenv);
    tera.register_filter("base", base);
    tera.register_filter("dir", dir);
    tera.register_filter("split_path", split_path);
}

fn register_store_fn(
    tera: &mut Tera,
    name: &'static str,
    store: &StagingStore,
    f: fn(&StagingStore, &Args) -> tera::Result<Value>,
) {
    let store = store.clone();
    tera.register_function(name, move |args: &Args| f(&store, args));
}

fn key_arg<'a>(name: &str, args: &'a Args) -> tera::Result<&'a str> {
    match args.get("key") {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(tera::Error::msg(format!(
            "Function `{name}` received key={other} but `key` must be a string"
        ))),
        None => Err(tera::Error::msg(format!(
            "Function `{name}` was called without a `key` argument"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Store functions
// ---------------------------------------------------------------------------

fn getv(store: &StagingStore, args: &Args) -> tera::Result<Value> {
    let key = key_arg("getv", args)?;
    match store.get(key) {
        Ok(v) => Ok(Value::String(v.to_string())),
        Err(missing) => match args.get("default") {
            Some(default) => Ok(default.clone()),
            None => Err(tera::Error::msg(missing.to_string())),
        },
    }
}

fn get(store: &StagingStore, args: &Args) -> tera::Result<Value> {
    let key = key_arg("get", args)?;
    let pair = store
        .get_pair(key)
        .map_err(|missing| tera::Error::msg(missing.to_string()))?;
    Ok(tera::to_value(pair)?)
}

fn exists(store: &StagingStore, args: &Args) -> tera::Result<Value> {
    let key = key_arg("exists", args)?;
    Ok(Value::Bool(store.exists(key)))
}

fn getvs(store: &StagingStore, args: &Args) -> tera::Result<Value> {
    let key = key_arg("getvs", args)?;
    Ok(tera::to_value(store.get_all_values(key))?)
}

fn gets(store: &StagingStore, args: &Args) -> tera::Result<Value> {
    let key = key_arg("gets", args)?;
    Ok(tera::to_value(store.get_all(key))?)
}

fn ls(store: &StagingStore, args: &Args) -> tera::Result<Value> {
    let key = key_arg("ls", args)?;
    Ok(tera::to_value(store.list(key))?)
}

fn lsdir(store: &StagingStore, args: &Args) -> tera::Result<Value> {
    let key = key_arg("lsdir", args)?;
    Ok(tera::to_value(store.list_dir(key))?)
}

// ---------------------------------------------------------------------------
// Store-independent helpers
// ---------------------------------------------------------------------------

fn getenv(args: &Args) -> tera::Result<Value> {
    let key = key_arg("getenv", args)?;
    match std::env::var(key) {
        Ok(v) if !v.is_empty() => Ok(Value::String(v)),
        _ => Ok(args
            .get("default")
            .cloned()
            .unwrap_or_else(|| Value::String(String::new()))),
    }
}

fn str_input<'a>(name: &str, value: &'a Value) -> tera::Result<&'a str> {
    value
        .as_str()
        .ok_or_else(|| tera::Error::msg(format!("Filter `{name}` was used on a non-string value")))
}

fn base(value: &Value, _args: &Args) -> tera::Result<Value> {
    let s = str_input("base", value)?.trim_end_matches('/');
    let last = s.rsplit('/').next().unwrap_or("");
    Ok(Value::String(if last.is_empty() { "/".into() } else { last.into() }))
}

fn dir(value: &Value, _args: &Args) -> tera::Result<Value> {
    let s = str_input("dir", value)?.trim_end_matches('/');
    let parent = match s.rfind('/') {
        Some(0) => "/",
        Some(i) => &s[..i],
        None => ".",
    };
    Ok(Value::String(parent.into()))
}

fn split_path(value: &Value, _args: &Args) -> tera::Result<Value> {
    let s = str_input("split_path", value)?;
    let parts: Vec<&str> = s.split('/').filter(|p| !p.is_empty()).collect();
    Ok(tera::to_value(parts)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn args(pairs: &[(&str, Value)]) -> Args {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn store() -> StagingStore {
        let mut s = StagingStore::new();
        s.replace_all(
            "/",
            [
                ("/a/x".to_string(), "1".to_string()),
                ("/a/y".to_string(), "2".to_string()),
            ],
        );
        s
    }

    #[test]
    fn getv_falls_back_to_default() {
        let a = args(&[("key", "/nope".into()), ("default", "dflt".into())]);
        assert_eq!(getv(&store(), &a).unwrap(), Value::String("dflt".into()));
    }

    #[test]
    fn getv_without_default_errors_with_key() {
        let err = getv(&store(), &args(&[("key", "/nope".into())])).unwrap_err();
        assert!(err.to_string().contains("/nope"), "got: {err}");
    }

    #[test]
    fn key_must_be_a_string() {
        let err = exists(&store(), &args(&[("key", 5.into())])).unwrap_err();
        assert!(err.to_string().contains("must be a string"));
        let err = exists(&store(), &args(&[])).unwrap_err();
        assert!(err.to_string().contains("without a `key`"));
    }

    #[test]
    fn gets_returns_objects() {
        let v = gets(&store(), &args(&[("key", "/a".into())])).unwrap();
        assert_eq!(v[0]["key"], Value::String("/a/x".into()));
        assert_eq!(v[1]["value"], Value::String("2".into()));
    }

    #[test]
    fn collection_functions_return_json_values() {
        let s = store();
        let pair = get(&s, &args(&[("key", "/a/x".into())])).unwrap();
        assert_eq!(pair["key"], Value::String("/a/x".into()));
        assert_eq!(pair["value"], Value::String("1".into()));
        assert_eq!(
            getvs(&s, &args(&[("key", "/a".into())])).unwrap(),
            tera::to_value(vec!["1", "2"]).unwrap()
        );
        assert_eq!(
            ls(&s, &args(&[("key", "/a".into())])).unwrap(),
            tera::to_value(vec!["x", "y"]).unwrap()
        );
        assert_eq!(
            lsdir(&s, &args(&[("key", "/".into())])).unwrap(),
            tera::to_value(vec!["a"]).unwrap()
        );
    }

    #[test]
    fn path_filters() {
        let e = Args::new();
        assert_eq!(base(&"/etc/app/app.conf".into(), &e).unwrap(), "app.conf");
        assert_eq!(dir(&"/etc/app/app.conf".into(), &e).unwrap(), "/etc/app");
        assert_eq!(dir(&"/etc".into(), &e).unwrap(), "/");
        assert_eq!(dir(&"file".into(), &e).unwrap(), ".");
        assert_eq!(base(&"/".into(), &e).unwrap(), "/");
        assert_eq!(
            split_path(&"/a/b/".into(), &e).unwrap(),
            tera::to_value(vec!["a", "b"]).unwrap()
        );
    }
}
