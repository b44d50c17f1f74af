//! Process-backed implementations of the external collaborators, plus the
//! neutral fallbacks used when no program is configured.
//!
//! A renderer program receives the expression on stdin (with `--display`
//! appended in block mode) and answers with an HTML fragment on stdout; a
//! minifier program receives CSS on stdin and answers with CSS on stdout.

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use varaq_core::{Collaborators, CssMinifier, MathRenderer};

pub fn collaborators(math_command: Option<&str>, css_command: Option<&str>) -> Collaborators {
    let math: Arc<dyn MathRenderer> = match math_command {
        Some(command) => Arc::new(CommandMathRenderer {
            command: command.to_string(),
        }),
        None => Arc::new(FallbackMathRenderer),
    };
    let css_minifier: Arc<dyn CssMinifier> = match css_command {
        Some(command) => Arc::new(CommandCssMinifier {
            command: command.to_string(),
        }),
        None => Arc::new(IdentityCssMinifier),
    };
    Collaborators { math, css_minifier }
}

fn run_filter(command: &str, extra_args: &[&str], input: &str) -> Result<String> {
    let mut parts = command.split_whitespace();
    let program = parts.next().context("empty collaborator command")?;
    let mut child = Command::new(program)
        .args(parts)
        .args(extra_args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .with_context(|| format!("failed to start `{command}`"))?;
    child
        .stdin
        .take()
        .context("no stdin handle")?
        .write_all(input.as_bytes())
        .with_context(|| format!("failed to feed `{command}`"))?;
    let output = child
        .wait_with_output()
        .with_context(|| format!("failed to run `{command}`"))?;
    if !output.status.success() {
        bail!(
            "`{command}` exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    String::from_utf8(output.stdout).with_context(|| format!("`{command}` produced invalid utf-8"))
}

struct CommandMathRenderer {
    command: String,
}

impl MathRenderer for CommandMathRenderer {
    fn render(&self, expr: &str, display: bool) -> Result<String> {
        let args: &[&str] = if display { &["--display"] } else { &[] };
        run_filter(&self.command, args, expr)
    }
}

/// Keeps builds working without an external renderer: the expression is
/// preserved verbatim for client-side rendering.
struct FallbackMathRenderer;

impl MathRenderer for FallbackMathRenderer {
    fn render(&self, expr: &str, _display: bool) -> Result<String> {
        Ok(format!("<code class=\"math-src\">{}</code>", escape(expr)))
    }
}

struct CommandCssMinifier {
    command: String,
}

impl CssMinifier for CommandCssMinifier {
    fn minify(&self, css: &str) -> Result<String> {
        run_filter(&self.command, &[], css)
    }
}

struct IdentityCssMinifier;

impl CssMinifier for IdentityCssMinifier {
    fn minify(&self, css: &str) -> Result<String> {
        Ok(css.to_string())
    }
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::collaborators;

    #[test]
    fn fallback_math_escapes_the_expression() {
        let collab = collaborators(None, None);
        let html = collab.math.render("a<b", false).expect("render");
        assert_eq!(html, "<code class=\"math-src\">a&lt;b</code>");
    }

    #[test]
    fn identity_minifier_passes_css_through() {
        let collab = collaborators(None, None);
        let css = collab.css_minifier.minify("body { }").expect("minify");
        assert_eq!(css, "body { }");
    }

    #[cfg(unix)]
    #[test]
    fn command_renderer_round_trips_through_the_process() {
        let collab = collaborators(Some("cat"), Some("cat"));
        let html = collab.math.render("x+y", false).expect("render");
        assert_eq!(html, "x+y");
        let css = collab.css_minifier.minify("body{}").expect("minify");
        assert_eq!(css, "body{}");
    }

    #[cfg(unix)]
    #[test]
    fn failing_command_surfaces_an_error() {
        let collab = collaborators(Some("false"), None);
        assert!(collab.math.render("x", false).is_err());
    }
}
