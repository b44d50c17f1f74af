//! Transitive theme-dependency resolution.
//!
//! A worklist of theme-relative paths is expanded to a fixpoint: each
//! dependency resolves to a theme file or a stylesheet synthesized from a
//! sibling font description, delivered CSS is scanned for `@font-face`
//! references, and the discovered sibling paths form the next frontier.
//! Already-materialized paths are never revisited, so reference cycles
//! terminate on their own.

use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::sync::LazyLock;

use anyhow::{Context, Result};
use regex::Regex;

use crate::fonts::synthesize_font_css;
use crate::site::write_bytes;

static FONT_FACE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"@font-face\s*\{[^{}]+\}").expect("valid regex"));
static FONT_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"url\(([^()]+)\)").expect("valid regex"));

pub fn resolve_dependencies(
    initial: BTreeSet<String>,
    theme_dir: &Path,
    build_dir: &Path,
    force: bool,
) {
    let mut materialized: BTreeSet<String> = BTreeSet::new();
    let mut frontier: Vec<String> = initial.into_iter().collect();
    while !frontier.is_empty() {
        let mut next = Vec::new();
        for dependency in frontier {
            if !materialized.insert(dependency.clone()) {
                continue;
            }
            match resolve_one(&dependency, theme_dir, build_dir, force) {
                Ok(discovered) => next.extend(discovered),
                Err(err) => log::error!("failed to resolve dependency `{dependency}`: {err:#}"),
            }
        }
        frontier = next;
    }
}

fn resolve_one(
    dependency: &str,
    theme_dir: &Path,
    build_dir: &Path,
    force: bool,
) -> Result<Vec<String>> {
    let source = theme_dir.join(dependency);
    let target = build_dir.join(dependency);
    if !force && target.exists() {
        log::info!("keeping existing `{dependency}`");
        return Ok(Vec::new());
    }

    let is_css = dependency.ends_with(".css");
    let bytes = if source.exists() {
        fs::read(&source).with_context(|| format!("failed to read {}", source.display()))?
    } else if is_css && source.with_extension("json").exists() {
        synthesize_font_css(&source.with_extension("json"))?
    } else {
        log::warn!("a dependency for the static site was missing from the theme ({dependency})");
        return Ok(Vec::new());
    };

    let mut discovered = Vec::new();
    if is_css {
        if let Ok(css) = std::str::from_utf8(&bytes) {
            discovered = referenced_font_paths(css, dependency);
        }
    }

    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    write_bytes(&target, build_dir, force, move || Ok(Some(bytes)));
    Ok(discovered)
}

/// `url(...)` references inside `@font-face` blocks, resolved as siblings
/// of the stylesheet that carries them.
fn referenced_font_paths(css: &str, dependency: &str) -> Vec<String> {
    let base = dependency
        .rsplit_once('/')
        .map(|(dir, _)| dir)
        .unwrap_or("");
    let mut urls = BTreeSet::new();
    for block in FONT_FACE.find_iter(css) {
        for caps in FONT_URL.captures_iter(block.as_str()) {
            let url = unquote(caps[1].trim());
            let url = url.trim_start_matches("./");
            if url.is_empty() {
                continue;
            }
            if base.is_empty() {
                urls.insert(url.to_string());
            } else {
                urls.insert(format!("{base}/{url}"));
            }
        }
    }
    urls.into_iter().collect()
}

fn unquote(text: &str) -> String {
    let bytes = text.as_bytes();
    if bytes.len() >= 2 && (bytes[0] == b'"' || bytes[0] == b'\'') && bytes[bytes.len() - 1] == bytes[0]
    {
        text[1..text.len() - 1]
            .replace("\\\"", "\"")
            .replace("\\'", "'")
    } else {
        text.to_string()
    }
}
