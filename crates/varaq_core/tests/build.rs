use std::fs;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use varaq_core::{BuildOptions, Collaborators, CssMinifier, MathRenderer, build_site};

struct TestMath;

impl MathRenderer for TestMath {
    fn render(&self, expr: &str, display: bool) -> Result<String> {
        Ok(format!("[math:{expr}:{display}]"))
    }
}

struct Identity;

impl CssMinifier for Identity {
    fn minify(&self, css: &str) -> Result<String> {
        Ok(css.to_string())
    }
}

fn collaborators() -> Collaborators {
    Collaborators {
        math: Arc::new(TestMath),
        css_minifier: Arc::new(Identity),
    }
}

fn write(path: &Path, contents: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("mkdir");
    }
    fs::write(path, contents).expect("write");
}

struct Site {
    _root: tempfile::TempDir,
    options: BuildOptions,
}

fn site_fixture() -> Site {
    let root = tempfile::tempdir().expect("tempdir");
    let source = root.path().join("source");
    let theme = root.path().join("theme");
    let build = root.path().join("build");

    write(
        &source.join("meta.json"),
        br#"{
            "title": "Home",
            "author": "Site Owner",
            "default_template": "base",
            "default_dir_listing_template": "listing"
        }"#,
    );
    write(&source.join("body.md"), b"# Hi\n\ncost is $x+y$ today\n");
    write(&source.join("app.css"), b"p { margin: 0 }");
    write(&source.join("robots.txt"), b"site: {{ meta.title }}\n");
    write(&source.join("a/meta.json"), br#"{"title": "A", "date": "2021-01-01"}"#);
    write(&source.join("gallery/logo.png"), b"\x89PNG-ish");

    write(
        &theme.join("base.html"),
        b"<html><head><title>{{ meta.title }}</title>\
          <link rel=\"stylesheet\" href=\"/assets/site.css\"/></head>\
          <body>{{ mds.body|safe }}</body></html>",
    );
    write(
        &theme.join("listing.html"),
        b"<html><head><title>listing</title></head>\
          <body><ul><li>{{ item_id }}</li></ul></body></html>",
    );
    write(
        &theme.join("assets/site.css"),
        b"@font-face{font-family:\"Sahel\";src:url(\"sahel.woff2\")}",
    );
    write(&theme.join("assets/sahel.woff2"), b"font-bytes");

    Site {
        options: BuildOptions {
            source_dir: source,
            theme_dir: theme,
            build_dir: build,
            force_recreation: false,
            syntax_theme: "GitHub".to_string(),
        },
        _root: root,
    }
}

#[test]
fn build_produces_pages_assets_and_theme_dependencies() {
    let site = site_fixture();
    build_site(&site.options, &collaborators()).expect("build");
    let build = &site.options.build_dir;

    let index = fs::read_to_string(build.join("index.html")).expect("index");
    assert!(index.contains("<title>Home</title>"));
    assert!(index.contains("[math:x+y:false]"));
    assert!(index.contains("<link rel=\"stylesheet\" href=\"./app.css\"/>"));
    assert!(index.contains("<style type=\"text/css\">"));

    // per-file outputs
    assert_eq!(
        fs::read(build.join("app.css")).expect("css"),
        b"p { margin: 0 }"
    );
    assert_eq!(
        fs::read_to_string(build.join("robots.txt")).expect("txt"),
        "site: Home\n"
    );
    assert_eq!(
        fs::read(build.join("gallery/logo.png")).expect("png"),
        b"\x89PNG-ish"
    );

    // page vs listing template selection
    let child = fs::read_to_string(build.join("a/index.html")).expect("child index");
    assert!(child.contains("<title>A</title>"));
    let listing = fs::read_to_string(build.join("gallery/index.html")).expect("listing");
    assert!(listing.contains("<li>gallery</li>"));

    // transitive theme dependencies
    assert!(build.join("assets/site.css").exists());
    assert_eq!(
        fs::read(build.join("assets/sahel.woff2")).expect("font"),
        b"font-bytes"
    );
}

#[test]
fn unforced_rebuild_keeps_every_existing_output() {
    let site = site_fixture();
    build_site(&site.options, &collaborators()).expect("build");
    let build = &site.options.build_dir;

    fs::write(build.join("index.html"), "sentinel").expect("tamper");
    fs::write(build.join("assets/site.css"), "sentinel").expect("tamper");
    build_site(&site.options, &collaborators()).expect("rebuild");

    assert_eq!(
        fs::read_to_string(build.join("index.html")).expect("index"),
        "sentinel"
    );
    assert_eq!(
        fs::read_to_string(build.join("assets/site.css")).expect("css"),
        "sentinel"
    );
}

#[test]
fn forced_rebuild_recreates_pages_but_not_binaries() {
    let mut site = site_fixture();
    build_site(&site.options, &collaborators()).expect("build");
    let build = site.options.build_dir.clone();

    fs::write(build.join("index.html"), "sentinel").expect("tamper");
    fs::write(build.join("gallery/logo.png"), "sentinel").expect("tamper");
    site.options.force_recreation = true;
    build_site(&site.options, &collaborators()).expect("rebuild");

    let index = fs::read_to_string(build.join("index.html")).expect("index");
    assert!(index.contains("<title>Home</title>"));
    assert_eq!(
        fs::read_to_string(build.join("gallery/logo.png")).expect("png"),
        "sentinel"
    );
}

#[test]
fn child_template_overrides_cascade_to_descendants() {
    let root = tempfile::tempdir().expect("tempdir");
    let source = root.path().join("source");
    let theme = root.path().join("theme");
    let build = root.path().join("build");

    write(
        &source.join("meta.json"),
        br#"{"title": "Home", "default_template": "base", "child_template": "special"}"#,
    );
    write(&source.join("a/meta.json"), br#"{"title": "A"}"#);
    write(&source.join("a/b/meta.json"), br#"{"title": "B"}"#);
    write(
        &theme.join("base.html"),
        b"<html><head></head><body>base {{ meta.title }}</body></html>",
    );
    write(
        &theme.join("special.html"),
        b"<html><head></head><body>special {{ meta.title }}</body></html>",
    );

    let options = BuildOptions {
        source_dir: source,
        theme_dir: theme,
        build_dir: build.clone(),
        force_recreation: false,
        syntax_theme: "GitHub".to_string(),
    };
    build_site(&options, &collaborators()).expect("build");

    let index = fs::read_to_string(build.join("index.html")).expect("index");
    assert!(index.contains("base Home"));
    let child = fs::read_to_string(build.join("a/index.html")).expect("a");
    assert!(child.contains("special A"));
    let grandchild = fs::read_to_string(build.join("a/b/index.html")).expect("a/b");
    assert!(grandchild.contains("special B"));
}

#[test]
fn broken_templates_spare_the_rest_of_the_build() {
    let root = tempfile::tempdir().expect("tempdir");
    let source = root.path().join("source");
    let theme = root.path().join("theme");
    let build = root.path().join("build");

    write(&source.join("meta.json"), br#"{"title": "Home"}"#);
    write(&source.join("ok/meta.json"), br#"{"title": "OK", "template": "good"}"#);
    // the root keeps the (absent) default template, so only its index fails
    write(
        &theme.join("good.html"),
        b"<html><head></head><body>good {{ meta.title }}</body></html>",
    );

    let options = BuildOptions {
        source_dir: source,
        theme_dir: theme,
        build_dir: build.clone(),
        force_recreation: false,
        syntax_theme: "GitHub".to_string(),
    };
    build_site(&options, &collaborators()).expect("build");

    assert!(!build.join("index.html").exists());
    let child = fs::read_to_string(build.join("ok/index.html")).expect("ok index");
    assert!(child.contains("good OK"));
}
