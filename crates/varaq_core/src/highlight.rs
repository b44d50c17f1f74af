use std::cell::RefCell;

use anyhow::{Context, Result};
use syntect::html::{ClassStyle, ClassedHTMLGenerator, css_for_theme_with_class_style};
use syntect::parsing::{SyntaxReference, SyntaxSet};
use syntect::util::LinesWithEndings;
use syntect_assets::assets::HighlightingAssets;

thread_local! {
    static ASSETS: RefCell<HighlightingAssets> = RefCell::new(HighlightingAssets::from_binary());
}

fn find_syntax<'a>(syntax_set: &'a SyntaxSet, language: &str) -> Option<&'a SyntaxReference> {
    let token = language.trim().to_lowercase();
    if token.is_empty() {
        return None;
    }
    let token = map_language_alias(&token);
    syntax_set.find_syntax_by_token(token)
}

fn map_language_alias(token: &str) -> &str {
    match token {
        "c++" | "cpp" | "cxx" | "cc" => "cpp",
        "sh" | "shell" => "bash",
        _ => token,
    }
}

/// Classed-HTML highlighting for one code block. With no usable language
/// hint the syntax is guessed from the first line of the code; `None` means
/// the caller should fall back to plain escaped text.
pub fn highlight_code_html(code: &str, language: &str) -> Option<String> {
    ASSETS.with(|cell| {
        let assets = cell.borrow();
        let syntax_set = assets.get_syntax_set().ok()?;
        let syntax = match find_syntax(syntax_set, language) {
            Some(syntax) => syntax,
            None => {
                let first_line = code.lines().next().unwrap_or("");
                syntax_set.find_syntax_by_first_line(first_line)?
            }
        };
        let mut generator =
            ClassedHTMLGenerator::new_with_class_style(syntax, syntax_set, ClassStyle::Spaced);
        for line in LinesWithEndings::from(code) {
            let _ = generator.parse_html_for_line_which_includes_newline(line);
        }
        Some(generator.finalize())
    })
}

/// The stylesheet matching the classed highlighting output, generated from
/// the named theme.
pub fn theme_stylesheet(theme: &str) -> Result<String> {
    ASSETS.with(|cell| {
        let assets = cell.borrow();
        let theme = assets.get_theme(theme);
        css_for_theme_with_class_style(theme, ClassStyle::Spaced)
            .context("failed to generate highlight stylesheet")
    })
}

#[cfg(test)]
mod tests {
    use super::{highlight_code_html, theme_stylesheet};

    #[test]
    fn highlights_by_language_hint() {
        let html = highlight_code_html("fn main() {}\n", "rust").expect("highlight");
        assert!(html.contains("fn"));
        assert!(html.contains("<span class=\""));
    }

    #[test]
    fn guesses_language_from_first_line() {
        let html = highlight_code_html("#!/bin/bash\necho hi\n", "").expect("guess");
        assert!(html.contains("echo"));
    }

    #[test]
    fn unknown_language_without_guessable_line_is_none() {
        assert!(highlight_code_html("plain words here", "no-such-lang-xyz").is_none());
    }

    #[test]
    fn stylesheet_carries_class_rules() {
        let css = theme_stylesheet("GitHub").expect("stylesheet");
        assert!(css.contains('.'));
    }
}
