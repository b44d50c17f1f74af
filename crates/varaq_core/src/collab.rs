//! Interfaces of the external collaborators the pipeline delegates to. The
//! build never constructs these itself; callers hand in implementations.

use std::sync::Arc;

use anyhow::Result;

/// Renders one math expression to an HTML fragment. `display` selects block
/// mode over inline mode.
pub trait MathRenderer: Send + Sync {
    fn render(&self, expr: &str, display: bool) -> Result<String>;
}

/// Minifies a CSS string. Only consulted for the syntax-highlight stylesheet
/// injected into pages that carry Markdown fragments.
pub trait CssMinifier: Send + Sync {
    fn minify(&self, css: &str) -> Result<String>;
}

#[derive(Clone)]
pub struct Collaborators {
    pub math: Arc<dyn MathRenderer>,
    pub css_minifier: Arc<dyn CssMinifier>,
}
