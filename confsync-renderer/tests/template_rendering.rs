//! Rendering real templates against a populated staging store.

use std::path::Path;

use confsync_core::{Filesystem, MemoryClient, MemoryFs, StagingStore};
use confsync_renderer::{RenderError, TemplateContext, TemplateEngine};
use rstest::rstest;

fn store_under(prefix: &str, pairs: &[(&str, &str)]) -> StagingStore {
    let client = MemoryClient::from_pairs(pairs.iter().map(|(k, v)| (*k, *v)));
    let mut store = StagingStore::new();
    store
        .refresh(&client, prefix, &["/".to_string()])
        .expect("refresh");
    store
}

fn ctx(store: &StagingStore) -> TemplateContext {
    TemplateContext {
        dest: "/etc/app/app.conf".into(),
        prefix: "/app".into(),
        fetch_index: store.fetch_index(),
    }
}

fn render(text: &str, store: &StagingStore) -> Result<String, RenderError> {
    TemplateEngine::compile_str("app.conf.tmpl", text, store)?.render(&ctx(store))
}

// ---------------------------------------------------------------------------
// 1. Lookups
// ---------------------------------------------------------------------------

#[test]
fn prefix_is_stripped_before_lookup() {
    let store = store_under("/app", &[("/app/db/host", "10.0.0.1"), ("/app/db/port", "5432")]);
    let out = render(
        "host={{ getv(key=\"/db/host\") }}\nport={{ getv(key=\"/db/port\") }}\n",
        &store,
    )
    .expect("render");
    assert_eq!(out, "host=10.0.0.1\nport=5432\n");
}

#[test]
fn loops_over_values_and_children_in_key_order() {
    let store = store_under(
        "/",
        &[
            ("/upstream/b", "10.0.0.2:80"),
            ("/upstream/a", "10.0.0.1:80"),
            ("/upstream/c/weight", "3"),
        ],
    );
    let out = render(
        "{% for kv in gets(key=\"/upstream\") %}{{ kv.key | base }}={{ kv.value }};{% endfor %}\n\
         {% for name in ls(key=\"/upstream\") %}{{ name }} {% endfor %}\n\
         {% for name in lsdir(key=\"/upstream\") %}{{ name }}{% endfor %}",
        &store,
    )
    .expect("render");
    assert_eq!(
        out,
        "a=10.0.0.1:80;b=10.0.0.2:80;weight=3;\na b c \nc"
    );
}

#[test]
fn exists_guards_optional_keys() {
    let store = store_under("/", &[("/feature/on", "yes")]);
    let out = render(
        "{% if exists(key=\"/feature/on\") %}on{% endif %}{% if exists(key=\"/feature/off\") %}off{% endif %}",
        &store,
    )
    .expect("render");
    assert_eq!(out, "on");
}

#[test]
fn context_variables_are_visible() {
    let store = store_under("/", &[]);
    let out = render("# {{ dest }} ({{ prefix }})", &store).expect("render");
    assert_eq!(out, "# /etc/app/app.conf (/app)");
}

#[rstest]
#[case("{{ getv(key=\"/missing\") }}")]
#[case("{% set kv = get(key=\"/missing\") %}{{ kv.value }}")]
fn missing_key_fails_render_naming_key(#[case] text: &str) {
    let store = store_under("/", &[]);
    let err = render(text, &store).unwrap_err();
    assert!(matches!(err, RenderError::Render { .. }), "got: {err}");
    assert!(err.to_string().contains("/missing"), "got: {err}");
}

// ---------------------------------------------------------------------------
// 2. Compiling from the filesystem
// ---------------------------------------------------------------------------

#[test]
fn compile_reads_through_filesystem() {
    let fs = MemoryFs::new();
    fs.mkdir_all(Path::new("/etc/confsync/templates"), 0o755).unwrap();
    let src = Path::new("/etc/confsync/templates/foo.tmpl");
    fs.write(src, b"foo = {{ getv(key=\"/foo\") }}", 0o644).unwrap();

    let store = store_under("/", &[("/foo", "bar")]);
    let engine = TemplateEngine::compile(&fs, src, &store).expect("compile");
    let mut out = Vec::new();
    engine.render_to(&ctx(&store), &mut out).expect("render");
    assert_eq!(String::from_utf8(out).unwrap(), "foo = bar");
}

#[test]
fn render_error_names_template_path() {
    let fs = MemoryFs::new();
    fs.mkdir_all(Path::new("/t"), 0o755).unwrap();
    let src = Path::new("/t/x.tmpl");
    fs.write(src, b"{{ getv(key=\"/nope\") }}", 0o644).unwrap();

    let store = store_under("/", &[]);
    let engine = TemplateEngine::compile(&fs, src, &store).expect("compile");
    let msg = engine.render(&ctx(&store)).unwrap_err().to_string();
    assert!(msg.contains("/t/x.tmpl"), "got: {msg}");
    assert!(msg.contains("/nope"), "got: {msg}");
}

#[test]
fn engine_keeps_its_snapshot_after_refresh() {
    let client = MemoryClient::from_pairs([("/foo", "old")]);
    let mut store = StagingStore::new();
    store.refresh(&client, "/", &["/foo".to_string()]).unwrap();
    let engine = TemplateEngine::compile_str("t", "{{ getv(key=\"/foo\") }}", &store).unwrap();

    client.set("/foo", "new").unwrap();
    store.refresh(&client, "/", &["/foo".to_string()]).unwrap();

    assert_eq!(engine.render(&ctx(&store)).unwrap(), "old");
}
