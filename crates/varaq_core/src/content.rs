//! Recursive source-tree ingestion into the content graph.
//!
//! Each directory contributes exactly one item, built before its
//! subdirectories are visited. Unreadable or malformed source files abort
//! the whole build; there is no partial-graph recovery here.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};

use crate::markdown::{MarkdownContext, render_markdown};
use crate::meta::read_meta;
use crate::model::{ContentGraph, ContentItem};

pub fn build_content_tree(
    source_dir: &Path,
    markdown: &MarkdownContext<'_>,
) -> Result<ContentGraph> {
    let mut graph = ContentGraph::default();
    visit(source_dir, source_dir, markdown, &mut graph)?;
    Ok(graph)
}

fn visit(
    root: &Path,
    dir: &Path,
    markdown: &MarkdownContext<'_>,
    graph: &mut ContentGraph,
) -> Result<()> {
    let entries = sorted_entries(dir)?;

    let mut item = ContentItem::default();
    for path in &entries {
        if !path.is_file() {
            continue;
        }
        if path.file_name().is_some_and(|name| name == "meta.json") {
            item.meta = read_meta(path)?;
        } else if path.extension().and_then(|ext| ext.to_str()) == Some("md") {
            let raw = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            let html = render_markdown(&raw, markdown)
                .with_context(|| format!("failed to render {}", path.display()))?;
            let stem = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .unwrap_or_default()
                .to_string();
            item.fragments.insert(stem, html);
        }
    }
    graph.items.insert(item_id(root, dir), item);

    for path in &entries {
        if path.is_dir() {
            visit(root, path, markdown, graph)?;
        }
    }
    Ok(())
}

pub(crate) fn sorted_entries(dir: &Path) -> Result<Vec<std::path::PathBuf>> {
    let mut entries: Vec<_> = fs::read_dir(dir)
        .with_context(|| format!("failed to read directory {}", dir.display()))?
        .map(|entry| entry.map(|entry| entry.path()))
        .collect::<std::io::Result<_>>()
        .with_context(|| format!("failed to list {}", dir.display()))?;
    entries.sort();
    Ok(entries)
}

/// Item id: POSIX-style path of `dir` relative to the source root, `.` for
/// the root itself.
pub(crate) fn item_id(root: &Path, dir: &Path) -> String {
    let rel = dir.strip_prefix(root).unwrap_or(dir);
    let posix = rel.to_string_lossy().replace('\\', "/");
    if posix.is_empty() {
        ".".to_string()
    } else {
        posix
    }
}

#[cfg(test)]
mod tests {
    use super::build_content_tree;
    use crate::collab::MathRenderer;
    use crate::markdown::MarkdownContext;
    use crate::model::MetaValue;
    use anyhow::Result;
    use std::fs;

    struct TestMath;

    impl MathRenderer for TestMath {
        fn render(&self, expr: &str, display: bool) -> Result<String> {
            Ok(format!("[math:{expr}:{display}]"))
        }
    }

    #[test]
    fn every_directory_becomes_one_item() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("meta.json"), r#"{"title": "Home"}"#).expect("write");
        fs::create_dir(dir.path().join("a")).expect("mkdir");
        fs::write(dir.path().join("a/meta.json"), r#"{"title": "A"}"#).expect("write");

        let graph =
            build_content_tree(dir.path(), &MarkdownContext { math: &TestMath }).expect("graph");
        assert_eq!(graph.items.keys().collect::<Vec<_>>(), [".", "a"]);
        assert_eq!(
            graph.items["."].meta["title"],
            MetaValue::String("Home".to_string())
        );
        assert_eq!(graph.children_of(".").keys().copied().collect::<Vec<_>>(), ["a"]);
    }

    #[test]
    fn fragments_are_rendered_and_keyed_by_stem() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("body.md"), "# Hello\n").expect("write");

        let graph =
            build_content_tree(dir.path(), &MarkdownContext { math: &TestMath }).expect("graph");
        let item = graph.get(".").expect("root item");
        assert!(item.fragments["body"].contains("<h1>Hello</h1>"));
    }

    #[test]
    fn empty_directories_still_get_items() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir(dir.path().join("gallery")).expect("mkdir");

        let graph =
            build_content_tree(dir.path(), &MarkdownContext { math: &TestMath }).expect("graph");
        let item = graph.get("gallery").expect("gallery item");
        assert!(item.meta.is_empty());
        assert!(item.fragments.is_empty());
    }

    #[test]
    fn malformed_meta_aborts_the_build() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("meta.json"), "{ not json").expect("write");

        let result = build_content_tree(dir.path(), &MarkdownContext { math: &TestMath });
        assert!(result.is_err());
    }
}
