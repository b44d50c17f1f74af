//! Build pipeline for a Markdown/math static site: source-tree ingestion
//! into a content graph, template rendering over that graph, output-tree
//! generation, and transitive theme-dependency resolution.

pub mod collab;
pub mod content;
pub mod deps;
pub mod engine;
pub mod fonts;
pub mod highlight;
pub mod html;
pub mod markdown;
pub mod meta;
pub mod model;
pub mod site;

pub use collab::{Collaborators, CssMinifier, MathRenderer};
pub use site::{BuildOptions, build_site};
