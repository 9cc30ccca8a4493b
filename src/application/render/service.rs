use std::{sync::Arc, time::Instant};

use comrak::markdown_to_html;
use once_cell::sync::Lazy;

use super::config::{build_feed_sanitizer, default_options};

const MERMAID_PRE: &str = "<pre lang=\"mermaid\"";
const MERMAID_PRE_MARKED: &str = "<pre lang=\"mermaid\" data-controller=\"mermaid\" class=\"mermaid\"";

/// Markdown conversion seam used by services that persist rendered HTML.
pub trait MarkdownRenderer: Send + Sync {
    /// `None` for blank input.
    fn render_markdown(&self, markdown: &str) -> Option<String>;

    /// Reduce stored HTML to the feed allowlist.
    fn sanitize_for_feed(&self, html: &str) -> String;
}

/// Comrak pipeline with footnotes, smart punctuation and mermaid markers.
pub struct ComrakRenderService {
    options: comrak::Options<'static>,
    feed_sanitizer: ammonia::Builder<'static>,
}

impl ComrakRenderService {
    fn new() -> Self {
        Self {
            options: default_options(),
            feed_sanitizer: build_feed_sanitizer(),
        }
    }
}

impl Default for ComrakRenderService {
    fn default() -> Self {
        Self::new()
    }
}

static RENDER_SERVICE: Lazy<Arc<ComrakRenderService>> =
    Lazy::new(|| Arc::new(ComrakRenderService::new()));

/// Access the shared render service instance, initialised on first use.
pub fn render_service() -> Arc<ComrakRenderService> {
    Arc::clone(&RENDER_SERVICE)
}

impl MarkdownRenderer for ComrakRenderService {
    fn render_markdown(&self, markdown: &str) -> Option<String> {
        if markdown.trim().is_empty() {
            return None;
        }

        let started = Instant::now();
        let html = markdown_to_html(markdown, &self.options);
        let html = mark_mermaid_blocks(&html);
        metrics::histogram!("willow_markdown_render_ms")
            .record(started.elapsed().as_secs_f64() * 1000.0);

        Some(html)
    }

    fn sanitize_for_feed(&self, html: &str) -> String {
        self.feed_sanitizer.clean(html).to_string()
    }
}

fn mark_mermaid_blocks(html: &str) -> String {
    html.replace(MERMAID_PRE, MERMAID_PRE_MARKED)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(markdown: &str) -> Option<String> {
        render_service().render_markdown(markdown)
    }

    #[test]
    fn blank_markdown_renders_nothing() {
        assert_eq!(render(""), None);
        assert_eq!(render("   \n\t"), None);
    }

    #[test]
    fn basic_markdown_becomes_html() {
        let html = render("# Hello World\n\nThis is a test.").expect("html");
        assert!(html.contains("Hello World"));
        assert!(html.contains("<p>This is a test.</p>"));
    }

    #[test]
    fn mermaid_fences_get_the_diagram_marker() {
        let markdown = "```mermaid\ngraph TD\n  A --> B\n```\n\n```ruby\nputs 1\n```\n\n```mermaid\nflowchart LR\n  C --> D\n```\n";
        let html = render(markdown).expect("html");
        assert_eq!(html.matches("class=\"mermaid\"").count(), 2);
        assert!(html.contains("<pre lang=\"ruby\"><code"));
        assert!(html.contains("data-controller=\"mermaid\""));
    }

    #[test]
    fn other_code_blocks_stay_untouched() {
        let html = render("```python\nprint(1)\n```").expect("html");
        assert!(html.contains("<pre lang=\"python\""));
        assert!(!html.contains("class=\"mermaid\""));
    }

    #[test]
    fn headings_get_anchor_ids() {
        let html = render("## Getting Started\n\nBody").expect("html");
        assert!(html.contains("id=\"getting-started\""));
    }

    #[test]
    fn footnotes_and_smart_quotes_are_enabled() {
        let html = render("Text with a note[^1] and \"quotes\".\n\n[^1]: The note.").expect("html");
        assert!(html.contains("footnote"));
        assert!(html.contains('\u{201c}'));
    }

    #[test]
    fn raw_html_is_omitted() {
        let html = render("<script>alert(1)</script>\n\nSafe").expect("html");
        assert!(!html.contains("<script>"));
        assert!(html.contains("Safe"));
    }

    #[test]
    fn feed_sanitizing_keeps_code_blocks() {
        let html = render("```mermaid\ngraph TD\n```").expect("html");
        let clean = render_service().sanitize_for_feed(&html);
        assert!(clean.contains("<pre"));
        assert!(!clean.contains("<script"));
    }
}
