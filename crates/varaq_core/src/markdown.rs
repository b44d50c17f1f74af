//! Markdown dialect: CommonMark with tables and smart punctuation, extended
//! with `$$$`-fenced math blocks, inline `$...$` math, `[>...]` sidenotes,
//! figure-wrapped images and syntax-highlighted code blocks.

use std::sync::LazyLock;

use anyhow::Result;
use pulldown_cmark::utils::TextMergeStream;
use pulldown_cmark::{CodeBlockKind, CowStr, Event, Options, Parser, Tag, TagEnd, html};
use regex::Regex;

use crate::collab::MathRenderer;
use crate::highlight::highlight_code_html;

/// Inline math span: `$...$`, non-empty, no whitespace at either edge of the
/// expression, embedded `\$` escapes allowed.
pub(crate) static MATH_EXPR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:[^\$\s]|\\\$)((?:[^\$]|\\\$)*(?:[^\$\s]|\\\$))?\$").expect("valid regex")
});

static SIDENOTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[>[^\]]+\]").expect("valid regex"));

pub struct MarkdownContext<'a> {
    pub math: &'a dyn MathRenderer,
}

pub fn render_markdown(md: &str, ctx: &MarkdownContext<'_>) -> Result<String> {
    let mut out = String::new();
    for segment in split_math_blocks(md) {
        match segment {
            Segment::Markdown(text) => render_segment(&text, ctx, &mut out)?,
            Segment::Math(block) => {
                let rendered = ctx.math.render(&block.literal, true)?;
                out.push_str("<div class=\"block-math\"");
                if !block.info.is_empty() {
                    out.push_str(" aria-label=\"");
                    out.push_str(&escape_html(&block.info));
                    out.push('"');
                }
                out.push('>');
                out.push_str(&rendered);
                out.push_str("</div>\n");
            }
        }
    }
    Ok(out)
}

#[derive(Debug, PartialEq)]
pub(crate) struct MathBlock {
    pub info: String,
    pub literal: String,
}

#[derive(Debug, PartialEq)]
pub(crate) enum Segment {
    Markdown(String),
    Math(MathBlock),
}

struct MathFence {
    length: usize,
    offset: usize,
    collected: Vec<String>,
}

/// Splits the source into plain-Markdown runs and `$$$`-fenced math blocks.
/// A fence line is a run of three or more `$` with no further `$` on the
/// line; the closing run must be at least as long as the opening one. Fences
/// inside standard code fences are not recognized.
pub(crate) fn split_math_blocks(md: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut markdown = String::new();
    let mut math: Option<MathFence> = None;
    let mut code_fence: Option<(char, usize)> = None;

    for line in md.split_inclusive('\n') {
        let stripped = line.trim_end_matches(['\n', '\r']);
        let indent = stripped.len() - stripped.trim_start_matches(' ').len();
        let rest = &stripped[indent..];

        if let Some(fence) = math.as_mut() {
            let closes = indent <= 3 && {
                let run = rest.chars().take_while(|ch| *ch == '$').count();
                run >= fence.length && rest[run..].trim().is_empty()
            };
            if closes {
                if let Some(fence) = math.take() {
                    segments.push(Segment::Math(finalize_math(fence)));
                }
            } else {
                let skip = fence.offset.min(indent);
                fence.collected.push(stripped[skip..].to_string());
            }
            continue;
        }

        if let Some((fence_char, length)) = code_fence {
            markdown.push_str(line);
            if indent <= 3 {
                let run = rest.chars().take_while(|ch| *ch == fence_char).count();
                if run >= length && rest[run..].trim().is_empty() {
                    code_fence = None;
                }
            }
            continue;
        }

        if indent <= 3 {
            if let Some(fence_char) = rest.chars().next().filter(|ch| matches!(ch, '`' | '~')) {
                let run = rest.chars().take_while(|ch| *ch == fence_char).count();
                if run >= 3 {
                    code_fence = Some((fence_char, run));
                    markdown.push_str(line);
                    continue;
                }
            }
            let run = rest.chars().take_while(|ch| *ch == '$').count();
            if run >= 3 && !rest[run..].contains('$') {
                if !markdown.is_empty() {
                    segments.push(Segment::Markdown(std::mem::take(&mut markdown)));
                }
                let remainder = &rest[run..];
                let collected = if remainder.is_empty() {
                    Vec::new()
                } else {
                    vec![remainder.to_string()]
                };
                math = Some(MathFence {
                    length: run,
                    offset: indent,
                    collected,
                });
                continue;
            }
        }

        markdown.push_str(line);
    }

    if let Some(fence) = math.take() {
        segments.push(Segment::Math(finalize_math(fence)));
    }
    if !markdown.is_empty() {
        segments.push(Segment::Markdown(markdown));
    }
    segments
}

fn finalize_math(fence: MathFence) -> MathBlock {
    let info = fence
        .collected
        .first()
        .map(|line| unescape_string(line.trim()))
        .unwrap_or_default();
    let literal = fence.collected[1.min(fence.collected.len())..]
        .iter()
        .map(|line| format!("{line}\n"))
        .collect();
    MathBlock { info, literal }
}

fn unescape_string(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch == '\\' && chars.peek().is_some_and(char::is_ascii_punctuation) {
            continue;
        }
        out.push(ch);
    }
    out
}

struct ImagePending {
    dest_url: String,
    title: String,
    alt: String,
}

struct CodeBlockPending {
    language: String,
    code: String,
}

fn render_segment(md: &str, ctx: &MarkdownContext<'_>, out: &mut String) -> Result<()> {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_SMART_PUNCTUATION);
    options.insert(Options::ENABLE_MATH);
    let parser = TextMergeStream::new(Parser::new_ext(md, options));

    let mut events: Vec<Event> = Vec::new();
    let mut image_pending: Option<ImagePending> = None;
    let mut code_pending: Option<CodeBlockPending> = None;

    for event in parser {
        if let Some(code) = code_pending.as_mut() {
            match event {
                Event::End(TagEnd::CodeBlock) => {
                    let html = render_code_block_html(code);
                    events.push(Event::Html(html.into()));
                    code_pending = None;
                }
                Event::Text(text) | Event::Code(text) => code.code.push_str(&text),
                Event::SoftBreak | Event::HardBreak => code.code.push('\n'),
                _ => {}
            }
            continue;
        }

        match event {
            Event::Start(Tag::CodeBlock(kind)) => {
                let language = match kind {
                    CodeBlockKind::Fenced(info) => {
                        info.split_whitespace().next().unwrap_or("").to_string()
                    }
                    CodeBlockKind::Indented => String::new(),
                };
                code_pending = Some(CodeBlockPending {
                    language,
                    code: String::new(),
                });
            }
            Event::Start(Tag::Image {
                dest_url, title, ..
            }) => {
                image_pending = Some(ImagePending {
                    dest_url: dest_url.to_string(),
                    title: title.to_string(),
                    alt: String::new(),
                });
            }
            Event::End(TagEnd::Image) => {
                if let Some(image) = image_pending.take() {
                    events.push(Event::Html(render_figure_html(&image).into()));
                }
            }
            Event::InlineMath(expr) => {
                if let Some(image) = image_pending.as_mut() {
                    image.alt.push_str(&expr);
                } else {
                    let rendered = ctx.math.render(&expr, false)?;
                    events.push(Event::Html(
                        format!("<span class=\"inline-math\">{rendered}</span>").into(),
                    ));
                }
            }
            Event::DisplayMath(expr) => {
                let rendered = ctx.math.render(&expr, true)?;
                events.push(Event::Html(
                    format!("<div class=\"block-math\">{rendered}</div>").into(),
                ));
            }
            Event::Text(text) => {
                if let Some(image) = image_pending.as_mut() {
                    image.alt.push_str(&text);
                } else {
                    push_text_with_sidenotes(text, &mut events);
                }
            }
            Event::Code(text) => {
                if let Some(image) = image_pending.as_mut() {
                    image.alt.push_str(&text);
                } else {
                    events.push(Event::Code(text));
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if let Some(image) = image_pending.as_mut() {
                    if !image.alt.ends_with(' ') {
                        image.alt.push(' ');
                    }
                } else {
                    events.push(event);
                }
            }
            other => {
                if image_pending.is_none() {
                    events.push(other);
                }
            }
        }
    }

    html::push_html(out, events.into_iter());
    Ok(())
}

fn push_text_with_sidenotes<'a>(text: CowStr<'a>, events: &mut Vec<Event<'a>>) {
    if !text.contains("[>") {
        events.push(Event::Text(text));
        return;
    }
    let mut last = 0;
    for found in SIDENOTE.find_iter(&text) {
        if found.start() > last {
            events.push(Event::Text(text[last..found.start()].to_string().into()));
        }
        let content = &found.as_str()[2..found.as_str().len() - 1];
        events.push(Event::Html(
            format!(
                "<span class=\"sidenote\"><span class=\"sidenote_content\">{}</span></span>",
                escape_html(content)
            )
            .into(),
        ));
        last = found.end();
    }
    if last == 0 {
        events.push(Event::Text(text));
    } else if last < text.len() {
        events.push(Event::Text(text[last..].to_string().into()));
    }
}

fn render_figure_html(image: &ImagePending) -> String {
    let mut html = String::new();
    html.push_str("<figure><img src=\"");
    html.push_str(&escape_html(&image.dest_url));
    html.push_str("\" alt=\"");
    html.push_str(&escape_html(image.alt.trim()));
    html.push('"');
    if !image.title.is_empty() {
        html.push_str(" title=\"");
        html.push_str(&escape_html(&image.title));
        html.push('"');
    }
    html.push_str(" />");
    if !image.title.is_empty() {
        html.push_str("<figcaption>");
        html.push_str(&escape_html(&image.title));
        html.push_str("</figcaption>");
    }
    html.push_str("</figure>");
    html
}

fn sanitize_language(language: &str) -> String {
    language
        .trim()
        .to_lowercase()
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '+'))
        .collect()
}

fn render_code_block_html(pending: &CodeBlockPending) -> String {
    let language = pending.language.trim();
    let class_attr = if language.is_empty() {
        String::new()
    } else {
        format!(" class=\"language-{}\"", sanitize_language(language))
    };
    match highlight_code_html(&pending.code, language) {
        Some(html) => {
            format!("<pre class=\"highlight\"><code{class_attr}>{html}</code></pre>\n")
        }
        None => format!(
            "<pre class=\"highlight\"><code{class_attr}>{}</code></pre>\n",
            escape_html(&pending.code)
        ),
    }
}

pub(crate) fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::{
        MarkdownContext, MathBlock, Segment, render_markdown, split_math_blocks,
    };
    use crate::collab::MathRenderer;
    use anyhow::Result;

    struct TestMath;

    impl MathRenderer for TestMath {
        fn render(&self, expr: &str, display: bool) -> Result<String> {
            Ok(format!("[math:{expr}:{display}]"))
        }
    }

    fn render(md: &str) -> String {
        render_markdown(md, &MarkdownContext { math: &TestMath }).expect("render")
    }

    #[test]
    fn fenced_math_block_info_and_literal() {
        let segments = split_math_blocks("$$$\nlabel\nE=mc^2\n$$$\n");
        assert_eq!(
            segments,
            [Segment::Math(MathBlock {
                info: "label".to_string(),
                literal: "E=mc^2\n".to_string(),
            })]
        );
    }

    #[test]
    fn fence_line_remainder_becomes_info() {
        let segments = split_math_blocks("$$$label\nE=mc^2\n$$$\n");
        assert_eq!(
            segments,
            [Segment::Math(MathBlock {
                info: "label".to_string(),
                literal: "E=mc^2\n".to_string(),
            })]
        );
    }

    #[test]
    fn closing_fence_must_match_opening_length() {
        let segments = split_math_blocks("$$$$\nx\n$$$\n$$$$\n");
        assert_eq!(
            segments,
            [Segment::Math(MathBlock {
                info: "x".to_string(),
                literal: "$$$\n".to_string(),
            })]
        );
    }

    #[test]
    fn unclosed_fence_closes_at_end_of_input() {
        let segments = split_math_blocks("intro\n\n$$$\nlabel\na+b\n");
        assert_eq!(segments.len(), 2);
        assert_eq!(
            segments[1],
            Segment::Math(MathBlock {
                info: "label".to_string(),
                literal: "a+b\n".to_string(),
            })
        );
    }

    #[test]
    fn dollar_fences_inside_code_fences_are_literal() {
        let html = render("```\n$$$\nx\n$$$\n```\n");
        assert!(html.contains("$$$"));
        assert!(!html.contains("block-math"));
    }

    #[test]
    fn math_block_renders_in_display_mode() {
        let html = render("$$$\nlabel\nE=mc^2\n$$$\n");
        assert!(html.contains("<div class=\"block-math\" aria-label=\"label\">"));
        assert!(html.contains("[math:E=mc^2\n:true]"));
    }

    #[test]
    fn inline_math_passes_literal_to_renderer() {
        let html = render("cost is $x+y$ today\n");
        assert!(html.contains("cost is <span class=\"inline-math\">[math:x+y:false]</span> today"));
    }

    #[test]
    fn sidenote_renders_nested_spans() {
        let html = render("fact[>tom & jerry] end\n");
        assert!(html.contains(
            "<span class=\"sidenote\"><span class=\"sidenote_content\">tom &amp; jerry</span></span>"
        ));
        assert!(html.contains("fact"));
        assert!(html.contains("end"));
    }

    #[test]
    fn images_are_wrapped_in_figures() {
        let html = render("![An image](pic.png \"A caption\")\n");
        assert!(html.contains("<figure><img src=\"pic.png\" alt=\"An image\" title=\"A caption\" />"));
        assert!(html.contains("<figcaption>A caption</figcaption></figure>"));
    }

    #[test]
    fn untitled_images_have_no_figcaption() {
        let html = render("![An image](pic.png)\n");
        assert!(html.contains("<figure><img src=\"pic.png\" alt=\"An image\" /></figure>"));
        assert!(!html.contains("figcaption"));
    }

    #[test]
    fn code_blocks_are_highlighted() {
        let html = render("```rust\nfn main() {}\n```\n");
        assert!(html.contains("<pre class=\"highlight\"><code class=\"language-rust\">"));
        assert!(html.contains("<span class=\""));
    }

    #[test]
    fn unknown_code_language_falls_back_to_escaped_text() {
        let html = render("```zzzz\na < b\n```\n");
        assert!(html.contains("a &lt; b"));
    }
}
