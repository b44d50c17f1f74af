//! Template environment and rendering.
//!
//! Templates see the whole content graph, the current item, and a fixed
//! table of helper functions. Every helper is wrapped in a fault boundary at
//! registration time: a failing helper logs and degrades to `none` instead
//! of aborting the page render.

use std::cmp::Reverse;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use chrono::NaiveDateTime;
use minijinja::value::ValueKind;
use minijinja::{AutoEscape, Environment, Value, context, path_loader};
use walkdir::WalkDir;

use crate::collab::Collaborators;
use crate::html;
use crate::markdown::{MATH_EXPR, escape_html};
use crate::meta::parse_iso;
use crate::model::ContentGraph;

const DEFAULT_AUTHOR: &str = "anonymous";

pub(crate) struct RenderState {
    pub graph: ContentGraph,
    pub theme_dir: PathBuf,
    pub missing_resources: Mutex<BTreeSet<String>>,
    pub collab: Collaborators,
}

pub struct Renderer {
    env: Environment<'static>,
    state: Arc<RenderState>,
    graph_value: Value,
    highlight_style: Option<String>,
}

impl Renderer {
    pub fn new(
        graph: ContentGraph,
        theme_dir: &Path,
        syntax_theme: &str,
        collab: &Collaborators,
    ) -> Result<Self> {
        let state = Arc::new(RenderState {
            graph,
            theme_dir: theme_dir.to_path_buf(),
            missing_resources: Mutex::new(BTreeSet::new()),
            collab: collab.clone(),
        });

        let mut env = Environment::new();
        env.set_loader(path_loader(theme_dir));
        env.set_auto_escape_callback(|name| {
            if name.ends_with(".html") {
                AutoEscape::Html
            } else {
                AutoEscape::None
            }
        });
        register_helpers(&mut env, &state);

        let graph_value = Value::from_serialize(&state.graph.items);
        let highlight_style = match crate::highlight::theme_stylesheet(syntax_theme) {
            Ok(css) => Some(match collab.css_minifier.minify(&css) {
                Ok(minified) => minified,
                Err(err) => {
                    log::warn!("css minifier failed, keeping stylesheet as-is: {err:#}");
                    css
                }
            }),
            Err(err) => {
                log::warn!("no highlight stylesheet available: {err:#}");
                None
            }
        };

        Ok(Renderer {
            env,
            state,
            graph_value,
            highlight_style,
        })
    }

    pub fn graph(&self) -> &ContentGraph {
        &self.state.graph
    }

    /// Renders the named theme template for one item into a finished HTML
    /// page, including the post-render fixups. A `_fa` template name suffix
    /// selects the Farsi rendering path.
    pub fn render_page(
        &self,
        template_name: &str,
        item_id: &str,
        relative_path: &str,
        css: &[String],
        js: &[String],
    ) -> Result<String> {
        let template = self
            .env
            .get_template(&format!("{template_name}.html"))
            .with_context(|| format!("template `{template_name}` not found in theme"))?;
        let ctx = self.base_context(item_id, relative_path)?;
        let rendered = template
            .render(&ctx)
            .with_context(|| format!("failed to render template `{template_name}`"))?;
        let item = self
            .state
            .graph
            .get(item_id)
            .with_context(|| format!("unknown item id `{item_id}`"))?;
        let inline_style = if item.fragments.is_empty() {
            None
        } else {
            self.highlight_style.as_deref()
        };
        html::rewrite_html(
            &rendered,
            &html::PageAssets {
                css,
                js,
                base_path: relative_path,
                inline_style,
                farsi: template_name.ends_with("_fa"),
            },
        )
    }

    /// Renders one source file as a template against an item. The output is
    /// raw bytes; no HTML fixups apply.
    pub fn render_file(&self, source: &str, item_id: &str, relative_path: &str) -> Result<Vec<u8>> {
        let ctx = self.base_context(item_id, relative_path)?;
        let rendered = self
            .env
            .render_str(source, &ctx)
            .with_context(|| format!("failed to render file template for `{item_id}`"))?;
        Ok(rendered.into_bytes())
    }

    pub fn report_missing_resources(&self) {
        let missing = self
            .state
            .missing_resources
            .lock()
            .expect("missing resources lock");
        for resource in missing.iter() {
            log::warn!("resource `{resource}` was referenced and could not be found in the theme");
        }
    }

    fn base_context(&self, item_id: &str, relative_path: &str) -> Result<Value> {
        let item = self
            .state
            .graph
            .get(item_id)
            .with_context(|| format!("unknown item id `{item_id}`"))?;
        let children = self.state.graph.children_of(item_id);
        Ok(context! {
            static_site_data => self.graph_value.clone(),
            children => Value::from_serialize(&children),
            meta => Value::from_serialize(&item.meta),
            mds => Value::from_serialize(&item.fragments),
            item_id => item_id,
            nav_items => nav_items(relative_path),
        })
    }
}

fn nav_items(relative_path: &str) -> Vec<(String, String)> {
    let mut items = vec![("/".to_string(), "home".to_string())];
    let mut url = String::new();
    for part in relative_path
        .split('/')
        .filter(|part| !part.is_empty() && *part != ".")
    {
        url.push('/');
        url.push_str(part);
        items.push((url.clone(), part.to_string()));
    }
    items
}

fn register_helpers(env: &mut Environment<'static>, state: &Arc<RenderState>) {
    macro_rules! register {
        ($name:literal, |$state:ident $(, $arg:ident : $ty:ty)*| $body:expr) => {{
            {
                let $state = Arc::clone(state);
                env.add_function($name, move |$($arg: $ty),*| $body);
            }
            {
                let $state = Arc::clone(state);
                env.add_filter($name, move |$($arg: $ty),*| $body);
            }
        }};
    }

    register!("find_url", |state, criteria: String| {
        shield("find_url", find_url(&state, &criteria))
    });
    register!("find_lang", |state, criteria: String| {
        shield("find_lang", find_url(&state, &criteria))
    });
    register!("find_info", |state, key: String| {
        shield("find_info", find_info(&state, &key))
    });
    register!("handle_math", |state, text: String| {
        shield("handle_math", handle_math(&state, &text))
    });
    register!("get_author", |state, meta: Value| {
        shield("get_author", get_author(&state, &meta))
    });
    register!("get_theme_resource", |state,
                                     names: Value,
                                     default: Option<String>,
                                     suffix: Option<String>| {
        shield(
            "get_theme_resource",
            get_theme_resource(&state, &names, default.as_deref(), suffix.as_deref()),
        )
    });

    env.add_function("short_gregorian", |value: Value| {
        shield("short_gregorian", short_date(&value, "%b, %u %Y"))
    });
    env.add_filter("short_gregorian", |value: Value| {
        shield("short_gregorian", short_date(&value, "%b, %u %Y"))
    });
    env.add_function("short_solar_hijri", |value: Value| {
        shield("short_solar_hijri", short_date(&value, "%x %B %YSHC"))
    });
    env.add_filter("short_solar_hijri", |value: Value| {
        shield("short_solar_hijri", short_date(&value, "%x %B %YSHC"))
    });
    env.add_function("sort_by_date", |value: Value| {
        shield("sort_by_date", sort_by_date(&value))
    });
    env.add_filter("sort_by_date", |value: Value| {
        shield("sort_by_date", sort_by_date(&value))
    });
}

/// The uniform helper fault boundary.
fn shield(name: &str, result: Result<Value>) -> Value {
    match result {
        Ok(value) => value,
        Err(err) => {
            log::error!("exception in utility function `{name}`: {err:#}");
            Value::from(())
        }
    }
}

fn find_url(state: &RenderState, criteria: &str) -> Result<Value> {
    Ok(Value::from(
        match state
            .graph
            .items
            .keys()
            .find(|item_id| item_id.contains(criteria))
        {
            Some(item_id) => format!("/{item_id}"),
            None => "?error=url_could_not_be_found".to_string(),
        },
    ))
}

fn find_info(state: &RenderState, key: &str) -> Result<Value> {
    let root = state.graph.get(".").context("content graph has no root item")?;
    Ok(match root.meta.get(key) {
        Some(value) => Value::from_serialize(value),
        None => Value::from("?error=info_could_not_be_found"),
    })
}

/// Replaces every inline `$...$` span with the external renderer's output
/// and HTML-escapes the surrounding text, preserving `&nbsp;` as a real
/// no-break space.
fn handle_math(state: &RenderState, text: &str) -> Result<Value> {
    let mut out = String::new();
    let mut rest = text;
    while let Some(found) = MATH_EXPR.find(rest) {
        out.push_str(&escape_html(&rest[..found.start()].replace("&nbsp;", "\u{a0}")));
        let expr = &found.as_str()[1..found.as_str().len() - 1];
        out.push_str(&state.collab.math.render(expr, false)?);
        rest = &rest[found.end()..];
    }
    out.push_str(&escape_html(&rest.replace("&nbsp;", "\u{a0}")));
    Ok(Value::from_safe_string(out))
}

fn short_date(value: &Value, format: &str) -> Result<Value> {
    let Some(timestamp) = value_timestamp(value) else {
        bail!("`{value}` is not a timestamp");
    };
    let formatted = varaq_jdate::jstrftime(&timestamp, format)?;
    Ok(Value::from(formatted))
}

fn get_author(state: &RenderState, meta: &Value) -> Result<Value> {
    if let Some(author) = attr_str(meta, "author") {
        return Ok(Value::from(author));
    }
    if let Some(author) = state.graph.get(".").and_then(|root| root.meta_str("author")) {
        return Ok(Value::from(author));
    }
    Ok(Value::from(DEFAULT_AUTHOR))
}

/// Stable sort, newest first. The date of an entry is discovered from a
/// `date` attribute/key or from the first nested element carrying one;
/// entries without one sort as the earliest possible date.
fn sort_by_date(value: &Value) -> Result<Value> {
    let mut entries: Vec<Value> = if value.kind() == ValueKind::Map {
        value
            .try_iter()
            .context("sort_by_date input is not iterable")?
            .map(|key| {
                let item = value.get_item(&key).unwrap_or(Value::from(()));
                Value::from(vec![key, item])
            })
            .collect()
    } else {
        value
            .try_iter()
            .context("sort_by_date input is not iterable")?
            .collect()
    };
    entries.sort_by_key(|entry| Reverse(discover_date(entry).unwrap_or(NaiveDateTime::MIN)));
    Ok(Value::from(entries))
}

fn discover_date(value: &Value) -> Option<NaiveDateTime> {
    match value.kind() {
        ValueKind::Map => value
            .get_attr("date")
            .ok()
            .filter(|date| !date.is_undefined())
            .and_then(|date| value_timestamp(&date)),
        ValueKind::Seq => {
            for element in value.try_iter().ok()? {
                if let Some(found) = discover_date(&element) {
                    return Some(found);
                }
            }
            None
        }
        _ => None,
    }
}

fn value_timestamp(value: &Value) -> Option<NaiveDateTime> {
    value.as_str().and_then(parse_iso)
}

fn attr_str(value: &Value, key: &str) -> Option<String> {
    value
        .get_attr(key)
        .ok()
        .filter(|attr| !attr.is_undefined())
        .and_then(|attr| attr.as_str().map(str::to_string))
}

/// First matching file under the theme root for any candidate name, as a
/// root-relative path. Misses are recorded for the end-of-build report; the
/// final fallback is a neutral anchor.
fn get_theme_resource(
    state: &RenderState,
    names: &Value,
    default: Option<&str>,
    suffix: Option<&str>,
) -> Result<Value> {
    let suffix = suffix.unwrap_or_default();
    let mut candidates: Vec<String> = Vec::new();
    match names.kind() {
        ValueKind::Seq => {
            for name in names.try_iter()? {
                if let Some(name) = name.as_str() {
                    candidates.push(format!("{name}{suffix}"));
                }
            }
        }
        ValueKind::String => {
            if let Some(name) = names.as_str() {
                candidates.push(format!("{name}{suffix}"));
            }
        }
        _ => {}
    }

    if !candidates.is_empty() {
        for candidate in &candidates {
            if let Some(rel) = find_theme_file(&state.theme_dir, candidate) {
                return Ok(Value::from(format!("/{rel}")));
            }
        }
        let mut missing = state
            .missing_resources
            .lock()
            .expect("missing resources lock");
        missing.extend(candidates);
    }
    if let Some(default) = default {
        if let Some(rel) = find_theme_file(&state.theme_dir, &format!("{default}{suffix}")) {
            return Ok(Value::from(format!("/{rel}")));
        }
    }
    Ok(Value::from("#"))
}

fn find_theme_file(theme_dir: &Path, candidate: &str) -> Option<String> {
    let nested = format!("/{candidate}");
    WalkDir::new(theme_dir)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .find_map(|entry| {
            let rel = entry.path().strip_prefix(theme_dir).ok()?;
            let rel = rel.to_string_lossy().replace('\\', "/");
            (rel == candidate || rel.ends_with(&nested)).then_some(rel)
        })
}
