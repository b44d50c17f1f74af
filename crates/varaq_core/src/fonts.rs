//! `@font-face` stylesheet synthesis from a JSON font description.
//!
//! The description carries common properties plus a `files` map of file
//! stems to per-file overrides. A rule is emitted per stem that has a
//! `font-family` and at least one physical font file next to the JSON.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Deserialize;

const SOURCE_FORMATS: [(&str, &str); 4] = [
    (".woff2", "woff2"),
    (".woff", "woff"),
    (".ttf", "truetype"),
    ("otf", "opentype"),
];

#[derive(Debug, Deserialize)]
struct FontDescription {
    files: BTreeMap<String, serde_json::Map<String, serde_json::Value>>,
    #[serde(flatten)]
    common: serde_json::Map<String, serde_json::Value>,
}

pub fn synthesize_font_css(json_path: &Path) -> Result<Vec<u8>> {
    let raw = fs::read_to_string(json_path)
        .with_context(|| format!("failed to read {}", json_path.display()))?;
    let description: FontDescription = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", json_path.display()))?;
    let parent = json_path.parent().unwrap_or_else(|| Path::new("."));

    let rules: Vec<String> = description
        .files
        .iter()
        .filter_map(|(stem, overrides)| font_face_rule(parent, stem, overrides, &description.common))
        .collect();
    if rules.is_empty() {
        bail!(
            "no consumable fonts were found in `{}`",
            json_path.display()
        );
    }
    log::info!("stylesheet corresponding to `{}` created", json_path.display());
    Ok(rules.join("\n").into_bytes())
}

fn font_face_rule(
    parent: &Path,
    stem: &str,
    overrides: &serde_json::Map<String, serde_json::Value>,
    common: &serde_json::Map<String, serde_json::Value>,
) -> Option<String> {
    let family = overrides
        .get("font-family")
        .or_else(|| common.get("font-family"))?;
    let mut src_items = vec![format!("local(\"{}\")", css_value(family))];
    for (suffix, format) in SOURCE_FORMATS {
        let file_name = format!("{stem}{suffix}");
        if parent.join(&file_name).exists() {
            src_items.push(format!("url(\"{file_name}\") format(\"{format}\")"));
        }
    }
    if src_items.len() < 2 {
        return None;
    }

    let mut declarations: Vec<(String, String)> = common
        .iter()
        .map(|(key, value)| (key.clone(), css_value(value)))
        .collect();
    for (key, value) in overrides {
        let rendered = css_value(value);
        match declarations.iter_mut().find(|(name, _)| name == key) {
            Some(slot) => slot.1 = rendered,
            None => declarations.push((key.clone(), rendered)),
        }
    }
    declarations.push(("src".to_string(), src_items.join(",\n       ")));

    let body = declarations
        .iter()
        .map(|(key, value)| format!("{key}: {value}"))
        .collect::<Vec<_>>()
        .join(";\n  ");
    Some(format!("@font-face {{\n  {body};\n}}"))
}

fn css_value(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}
