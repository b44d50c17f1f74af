//! Site generation: mirrors the source tree into the build tree, drives
//! template rendering per directory, and hands the accumulated theme
//! references to the dependency resolver.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::collab::Collaborators;
use crate::content::{build_content_tree, item_id, sorted_entries};
use crate::deps::resolve_dependencies;
use crate::engine::Renderer;
use crate::html::collect_root_refs;
use crate::markdown::MarkdownContext;
use crate::model::ContentItem;

const DEFAULT_TEMPLATE: &str = "default_template";
const DEFAULT_DIR_LISTING_TEMPLATE: &str = "default_dir_listing_template";
/// Non-reserved files with these extensions render as single-file
/// templates; everything else is copied as-is.
const TEMPLATE_EXTENSIONS: [&str; 5] = ["html", "htm", "xml", "svg", "txt"];

pub struct BuildOptions {
    pub source_dir: PathBuf,
    pub theme_dir: PathBuf,
    pub build_dir: PathBuf,
    pub force_recreation: bool,
    pub syntax_theme: String,
}

/// Runs the whole pipeline: ingestion, generation, dependency resolution,
/// end-of-build warnings.
pub fn build_site(options: &BuildOptions, collab: &Collaborators) -> Result<()> {
    let markdown = MarkdownContext {
        math: collab.math.as_ref(),
    };
    let graph = build_content_tree(&options.source_dir, &markdown)?;
    let renderer = Renderer::new(graph, &options.theme_dir, &options.syntax_theme, collab)?;

    let root = renderer.graph().get(".");
    let page_template = root
        .and_then(|item| item.meta_str("default_template"))
        .unwrap_or(DEFAULT_TEMPLATE)
        .to_string();
    let listing_template = root
        .and_then(|item| item.meta_str("default_dir_listing_template"))
        .unwrap_or(DEFAULT_DIR_LISTING_TEMPLATE)
        .to_string();

    let mut generator = Generator {
        renderer: &renderer,
        options,
        dependencies: Vec::new(),
    };
    generator.generate_dir(&options.source_dir, &page_template, &listing_template)?;

    let dependencies: BTreeSet<String> = generator.dependencies.into_iter().collect();
    resolve_dependencies(
        dependencies,
        &options.theme_dir,
        &options.build_dir,
        options.force_recreation,
    );
    renderer.report_missing_resources();
    Ok(())
}

struct Generator<'a> {
    renderer: &'a Renderer,
    options: &'a BuildOptions,
    dependencies: Vec<String>,
}

impl Generator<'_> {
    fn generate_dir(
        &mut self,
        dir: &Path,
        page_template: &str,
        listing_template: &str,
    ) -> Result<()> {
        let renderer = self.renderer;
        let id = item_id(&self.options.source_dir, dir);
        let fallback = ContentItem::default();
        let item = renderer.graph().get(&id).unwrap_or(&fallback);

        let child_page = match item.meta_str("child_template") {
            Some(name) => {
                log::info!("default template changed to `{name}`");
                name.to_string()
            }
            None => page_template.to_string(),
        };
        let child_listing = match item.meta_str("child_dir_listing_template") {
            Some(name) => {
                log::info!("default dir listing template changed to `{name}`");
                name.to_string()
            }
            None => listing_template.to_string(),
        };

        let rel = dir
            .strip_prefix(&self.options.source_dir)
            .unwrap_or_else(|_| Path::new(""));
        let out_dir = self.options.build_dir.join(rel);
        fs::create_dir_all(&out_dir)
            .with_context(|| format!("failed to create {}", out_dir.display()))?;

        let mut css: Vec<String> = Vec::new();
        let mut js: Vec<String> = Vec::new();

        for path in sorted_entries(dir)? {
            if path.is_dir() {
                self.generate_dir(&path, &child_page, &child_listing)?;
                continue;
            }
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default();
            let ext = path
                .extension()
                .and_then(|ext| ext.to_str())
                .unwrap_or("")
                .to_ascii_lowercase();
            if name == "meta.json" || ext == "md" {
                continue;
            }
            if ext == "css" {
                css.push(name.clone());
            } else if ext == "js" {
                js.push(name.clone());
            }

            let target = out_dir.join(&name);
            if TEMPLATE_EXTENSIONS.contains(&ext.as_str()) {
                let file_rel = if id == "." {
                    name.clone()
                } else {
                    format!("{id}/{name}")
                };
                write_bytes(
                    &target,
                    &self.options.build_dir,
                    self.options.force_recreation,
                    || {
                        let source = fs::read_to_string(&path)
                            .with_context(|| format!("failed to read {}", path.display()))?;
                        renderer.render_file(&source, &id, &file_rel).map(Some)
                    },
                );
            } else {
                write_bytes(
                    &target,
                    &self.options.build_dir,
                    self.options.force_recreation,
                    || {
                        fs::read(&path)
                            .map(Some)
                            .with_context(|| format!("failed to read {}", path.display()))
                    },
                );
            }
        }

        let template_name = if !item.meta.is_empty() || !item.fragments.is_empty() {
            item.meta_str("template").unwrap_or(page_template)
        } else {
            item.meta_str("dir_listing_template").unwrap_or(listing_template)
        }
        .to_string();

        let mut discovered: Vec<String> = Vec::new();
        write_bytes(
            &out_dir.join("index.html"),
            &self.options.build_dir,
            self.options.force_recreation,
            || {
                let html = renderer.render_page(&template_name, &id, &id, &css, &js)?;
                discovered = collect_root_refs(&html);
                Ok(Some(html.into_bytes()))
            },
        );
        self.dependencies.append(&mut discovered);
        Ok(())
    }
}

/// The shared write discipline: an existing target is left alone unless the
/// build is forced and the target is an HTML/CSS page asset; the byte
/// producer only runs when a write will happen, and its failure is contained
/// to this one output.
pub(crate) fn write_bytes<F>(path: &Path, build_root: &Path, force: bool, produce: F)
where
    F: FnOnce() -> Result<Option<Vec<u8>>>,
{
    let rel = path
        .strip_prefix(build_root)
        .unwrap_or(path)
        .to_string_lossy()
        .replace('\\', "/");
    let is_page_asset = matches!(
        path.extension().and_then(|ext| ext.to_str()),
        Some("html") | Some("css")
    );
    if (!force || !is_page_asset) && path.exists() {
        log::info!("keeping existing `{rel}`");
        return;
    }
    match produce() {
        Ok(Some(content)) => {
            if path.exists() {
                log::warn!("recreating `{rel}`");
            } else {
                log::info!("creating `{rel}`");
            }
            if let Err(err) = fs::write(path, content) {
                log::error!("failed to write `{rel}`: {err}");
            }
        }
        Ok(None) => log::warn!("content producer returned nothing for `{rel}`"),
        Err(err) => log::error!("failed to produce `{rel}`: {err:#}"),
    }
}
