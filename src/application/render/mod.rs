//! Markdown rendering pipeline.
//!
//! Rendering is pure: markdown in, HTML out. Callers decide where the result is
//! stored. Feeds reuse the stored HTML after passing it through a stricter
//! allowlist.

mod config;
mod service;

pub use service::{ComrakRenderService, MarkdownRenderer, render_service};
