//! Post-render HTML fixups (asset injection, Persian digit substitution)
//! and root-relative reference scanning, both streaming over the rendered
//! page.

use anyhow::{Context, Result};
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

const VOID_ELEMENTS: [&str; 14] = [
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param", "source",
    "track", "wbr",
];

pub struct PageAssets<'a> {
    pub css: &'a [String],
    pub js: &'a [String],
    pub base_path: &'a str,
    pub inline_style: Option<&'a str>,
    pub farsi: bool,
}

#[derive(Default)]
struct ElementStack {
    frames: Vec<String>,
    suppress: usize,
    math: usize,
    head: usize,
    body: usize,
}

impl ElementStack {
    fn push(&mut self, name: String) {
        self.adjust(&name, 1);
        self.frames.push(name);
    }

    fn pop_to(&mut self, name: &str) {
        if let Some(pos) = self.frames.iter().rposition(|frame| frame == name) {
            let removed: Vec<String> = self.frames.drain(pos..).collect();
            for frame in removed {
                self.adjust(&frame, -1);
            }
        }
    }

    fn adjust(&mut self, name: &str, delta: isize) {
        let counter = match name {
            "section" | "pre" => &mut self.suppress,
            "math" => &mut self.math,
            "head" => &mut self.head,
            "body" => &mut self.body,
            _ => return,
        };
        *counter = counter.saturating_add_signed(delta);
    }

    /// Digits are converted inside `<body>` unless a `<section>`/`<pre>`
    /// ancestor suppresses it, with `<math>` overriding the suppression.
    fn digits_allowed(&self) -> bool {
        self.body > 0 && (self.suppress == 0 || self.math > 0)
    }
}

fn element_name(raw: &[u8]) -> String {
    String::from_utf8_lossy(raw).to_ascii_lowercase()
}

/// Rewrites a rendered HTML page: stylesheet links and the optional inline
/// style block go at the end of `<head>`, scripts at the end of `<body>`,
/// and in Farsi mode ASCII digits in eligible text nodes become
/// Persian-Arabic glyphs.
pub fn rewrite_html(html: &str, assets: &PageAssets<'_>) -> Result<String> {
    let mut reader = Reader::from_str(html);
    reader.config_mut().check_end_names = false;
    let mut writer = Writer::new(Vec::new());
    let mut stack = ElementStack::default();

    loop {
        let event = reader
            .read_event()
            .context("failed to parse rendered html")?;
        match event {
            Event::Eof => break,
            Event::Start(start) => {
                let name = element_name(start.local_name().as_ref());
                if !VOID_ELEMENTS.contains(&name.as_str()) {
                    stack.push(name);
                }
                writer.write_event(Event::Start(start))?;
            }
            Event::End(end) => {
                let name = element_name(end.local_name().as_ref());
                if name == "head" {
                    for item in assets.css {
                        let href = format!("{}/{item}", assets.base_path);
                        writer.write_event(Event::Empty(
                            BytesStart::new("link")
                                .with_attributes([("rel", "stylesheet"), ("href", href.as_str())]),
                        ))?;
                    }
                    if let Some(style) = assets.inline_style {
                        writer.write_event(Event::Start(
                            BytesStart::new("style").with_attributes([("type", "text/css")]),
                        ))?;
                        writer.write_event(Event::Text(BytesText::from_escaped(style)))?;
                        writer.write_event(Event::End(BytesEnd::new("style")))?;
                    }
                } else if name == "body" {
                    for item in assets.js {
                        let src = format!("{}/{item}", assets.base_path);
                        writer.write_event(Event::Start(
                            BytesStart::new("script").with_attributes([("src", src.as_str())]),
                        ))?;
                        writer.write_event(Event::End(BytesEnd::new("script")))?;
                    }
                }
                stack.pop_to(&name);
                writer.write_event(Event::End(end))?;
            }
            Event::Text(text) => {
                if assets.farsi && stack.digits_allowed() {
                    let raw = String::from_utf8_lossy(text.as_ref()).into_owned();
                    writer.write_event(Event::Text(BytesText::from_escaped(persian_digits(&raw))))?;
                } else {
                    writer.write_event(Event::Text(text))?;
                }
            }
            other => writer.write_event(other)?,
        }
    }

    String::from_utf8(writer.into_inner()).context("rewritten html is not utf-8")
}

fn persian_digits(text: &str) -> String {
    text.chars()
        .map(|ch| match ch {
            '0'..='9' => char::from_u32(0x06F0 + ch as u32 - '0' as u32).unwrap_or(ch),
            _ => ch,
        })
        .collect()
}

/// Scans a rendered page for root-relative theme references: stylesheet
/// `href`s inside `<head>` and any `src` attribute inside `<body>`, each
/// stripped of its leading `/`. Scanning is best-effort; a malformed page
/// yields what was collected so far.
pub fn collect_root_refs(html: &str) -> Vec<String> {
    let mut reader = Reader::from_str(html);
    reader.config_mut().check_end_names = false;
    let mut stack = ElementStack::default();
    let mut refs = Vec::new();

    loop {
        match reader.read_event() {
            Ok(Event::Eof) => break,
            Ok(Event::Start(start)) => {
                let name = element_name(start.local_name().as_ref());
                inspect_element(&name, &start, &stack, &mut refs);
                if !VOID_ELEMENTS.contains(&name.as_str()) {
                    stack.push(name);
                }
            }
            Ok(Event::Empty(empty)) => {
                let name = element_name(empty.local_name().as_ref());
                inspect_element(&name, &empty, &stack, &mut refs);
            }
            Ok(Event::End(end)) => {
                stack.pop_to(&element_name(end.local_name().as_ref()));
            }
            Ok(_) => {}
            Err(err) => {
                log::warn!("stopped scanning rendered html for references: {err}");
                break;
            }
        }
    }
    refs
}

fn inspect_element(name: &str, element: &BytesStart, stack: &ElementStack, refs: &mut Vec<String>) {
    if stack.head > 0 && name == "link" {
        let mut is_stylesheet = false;
        let mut href: Option<String> = None;
        for attr in element.attributes().flatten() {
            match attr.key.as_ref() {
                b"rel" => {
                    is_stylesheet = String::from_utf8_lossy(&attr.value)
                        .to_ascii_lowercase()
                        .contains("stylesheet");
                }
                b"href" => href = Some(String::from_utf8_lossy(&attr.value).trim().to_string()),
                _ => {}
            }
        }
        if is_stylesheet {
            if let Some(href) = href {
                if let Some(rel) = href.strip_prefix('/') {
                    refs.push(rel.to_string());
                }
            }
        }
    }
    if stack.body > 0 {
        for attr in element.attributes().flatten() {
            if attr.key.as_ref() == b"src" {
                let value = String::from_utf8_lossy(&attr.value).trim().to_string();
                if let Some(rel) = value.strip_prefix('/') {
                    refs.push(rel.to_string());
                }
            }
        }
    }
}
