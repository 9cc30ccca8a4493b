//! Syndication service for RSS, Atom and JSON Feed output.
//!
//! Feeds carry the 20 most recent published posts of one blog. Post HTML is
//! re-sanitized against the feed allowlist before it is embedded.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use time::{
    OffsetDateTime,
    format_description::well_known::{Rfc2822, Rfc3339},
};

use crate::application::blog::BlogContext;
use crate::application::render::MarkdownRenderer;
use crate::application::repos::{PostsRepo, RepoError};
use crate::application::site::SiteContext;
use crate::domain::entities::PostRecord;

pub const FEED_LIMIT: i64 = 20;
const FEED_LANGUAGE: &str = "en";

#[derive(Clone)]
pub struct SyndicationService {
    posts: Arc<dyn PostsRepo>,
    renderer: Arc<dyn MarkdownRenderer>,
    site: SiteContext,
}

#[derive(Debug, Error)]
pub enum SyndicationError {
    #[error("failed to list posts: {0}")]
    Posts(String),
    #[error("failed to encode feed: {0}")]
    Encode(String),
}

impl From<RepoError> for SyndicationError {
    fn from(err: RepoError) -> Self {
        SyndicationError::Posts(err.to_string())
    }
}

impl SyndicationService {
    pub fn new(
        posts: Arc<dyn PostsRepo>,
        renderer: Arc<dyn MarkdownRenderer>,
        site: SiteContext,
    ) -> Self {
        Self {
            posts,
            renderer,
            site,
        }
    }

    /// RSS 2.0 with an `atom:link` self reference.
    pub async fn rss(&self, ctx: &BlogContext) -> Result<String, SyndicationError> {
        let posts = self.posts.list_recent_published(ctx.blog.id, FEED_LIMIT).await?;
        let base = self.site.blog_base_url(&ctx.blog);

        let mut items = String::new();
        for post in &posts {
            let link = permalink(&base, post);
            let published = post.published_at.unwrap_or(post.created_at);
            items.push_str(&format!(
                "    <item>\n      <title>{}</title>\n      <link>{link}</link>\n      <guid isPermaLink=\"true\">{link}</guid>\n      <pubDate>{}</pubDate>\n      <description><![CDATA[{}]]></description>\n    </item>\n",
                xml_escape(&post.title),
                format_rfc2822(published),
                cdata_escape(&self.feed_html(post)),
            ));
        }

        Ok(format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<rss version=\"2.0\" xmlns:atom=\"http://www.w3.org/2005/Atom\">\n  <channel>\n    <title>{}</title>\n    <link>{base}/</link>\n    <description>{}</description>\n    <language>{FEED_LANGUAGE}</language>\n    <atom:link href=\"{base}/posts/rss\" rel=\"self\" type=\"application/rss+xml\"/>\n{items}  </channel>\n</rss>\n",
            xml_escape(ctx.blog.display_title()),
            xml_escape(&channel_description(ctx)),
        ))
    }

    pub async fn atom(&self, ctx: &BlogContext) -> Result<String, SyndicationError> {
        let posts = self.posts.list_recent_published(ctx.blog.id, FEED_LIMIT).await?;
        let base = self.site.blog_base_url(&ctx.blog);
        let author = xml_escape(&ctx.owner.name);
        let updated = posts
            .iter()
            .map(|post| post.updated_at)
            .max()
            .unwrap_or(ctx.blog.updated_at);

        let mut entries = String::new();
        for post in &posts {
            let link = permalink(&base, post);
            let published = post.published_at.unwrap_or(post.created_at);
            entries.push_str(&format!(
                "  <entry>\n    <id>{link}</id>\n    <title>{}</title>\n    <link rel=\"alternate\" type=\"text/html\" href=\"{link}\"/>\n    <published>{}</published>\n    <updated>{}</updated>\n    <author>\n      <name>{author}</name>\n    </author>\n    <summary>{}</summary>\n    <content type=\"html\">{}</content>\n  </entry>\n",
                xml_escape(&post.title),
                format_rfc3339(published),
                format_rfc3339(post.updated_at),
                xml_escape(&entry_summary(post, &ctx.owner.name)),
                xml_escape(&self.feed_html(post)),
            ));
        }

        Ok(format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<feed xmlns=\"http://www.w3.org/2005/Atom\" xml:lang=\"{FEED_LANGUAGE}\">\n  <id>{base}/</id>\n  <title>{}</title>\n  <link rel=\"alternate\" type=\"text/html\" href=\"{base}/\"/>\n  <link rel=\"self\" type=\"application/atom+xml\" href=\"{base}/posts/atom\"/>\n  <updated>{}</updated>\n  <author>\n    <name>{author}</name>\n  </author>\n{entries}</feed>\n",
            xml_escape(ctx.blog.display_title()),
            format_rfc3339(updated),
        ))
    }

    /// JSON Feed 1.1.
    pub async fn json_feed(&self, ctx: &BlogContext) -> Result<String, SyndicationError> {
        let posts = self.posts.list_recent_published(ctx.blog.id, FEED_LIMIT).await?;
        let base = self.site.blog_base_url(&ctx.blog);

        let items = posts
            .iter()
            .map(|post| {
                let url = permalink(&base, post);
                JsonFeedItem {
                    id: url.clone(),
                    url,
                    title: post.title.clone(),
                    content_html: self.feed_html(post),
                    content_text: post.body_markdown.clone().unwrap_or_default(),
                    summary: post.meta_description.clone(),
                    date_published: format_rfc3339(post.published_at.unwrap_or(post.created_at)),
                    date_modified: format_rfc3339(post.updated_at),
                    tags: post.tag_list.clone(),
                }
            })
            .collect();

        let feed = JsonFeed {
            version: "https://jsonfeed.org/version/1.1",
            title: ctx.blog.display_title().to_string(),
            home_page_url: format!("{base}/"),
            feed_url: format!("{base}/posts/json"),
            description: channel_description(ctx),
            language: FEED_LANGUAGE,
            authors: vec![JsonFeedAuthor {
                name: ctx.owner.name.clone(),
            }],
            items,
        };

        serde_json::to_string_pretty(&feed).map_err(|err| SyndicationError::Encode(err.to_string()))
    }

    fn feed_html(&self, post: &PostRecord) -> String {
        match post.body_html.as_deref() {
            Some(html) => self.renderer.sanitize_for_feed(html),
            None => post
                .body_markdown
                .as_deref()
                .and_then(|markdown| self.renderer.render_markdown(markdown))
                .map(|html| self.renderer.sanitize_for_feed(&html))
                .unwrap_or_default(),
        }
    }
}

#[derive(Serialize)]
struct JsonFeed {
    version: &'static str,
    title: String,
    home_page_url: String,
    feed_url: String,
    description: String,
    language: &'static str,
    authors: Vec<JsonFeedAuthor>,
    items: Vec<JsonFeedItem>,
}

#[derive(Serialize)]
struct JsonFeedAuthor {
    name: String,
}

#[derive(Serialize)]
struct JsonFeedItem {
    id: String,
    url: String,
    title: String,
    content_html: String,
    content_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    summary: Option<String>,
    date_published: String,
    date_modified: String,
    tags: Vec<String>,
}

fn permalink(base: &str, post: &PostRecord) -> String {
    format!("{base}/{}", post.slug)
}

fn channel_description(ctx: &BlogContext) -> String {
    format!("Latest posts from {}", ctx.owner.name)
}

fn entry_summary(post: &PostRecord, author: &str) -> String {
    match post.meta_description.as_deref() {
        Some(summary) if !summary.trim().is_empty() => summary.to_string(),
        _ => format!("{} by {author}", post.title),
    }
}

fn format_rfc2822(ts: OffsetDateTime) -> String {
    ts.format(&Rfc2822).unwrap_or_else(|_| ts.to_string())
}

fn format_rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_else(|_| ts.to_string())
}

pub(crate) fn xml_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}

fn cdata_escape(input: &str) -> String {
    input.replace("]]>", "]]]]><![CDATA[>")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xml_escape_covers_markup_characters() {
        assert_eq!(xml_escape("<a href=\"x\">Tom & Jerry's</a>"), "&lt;a href=&quot;x&quot;&gt;Tom &amp; Jerry&apos;s&lt;/a&gt;");
    }

    #[test]
    fn cdata_terminators_are_split() {
        assert_eq!(cdata_escape("a]]>b"), "a]]]]><![CDATA[>b");
    }
}
