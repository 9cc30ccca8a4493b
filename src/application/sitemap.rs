//! Sitemap service for sitemap.xml and robots.txt generation.

use std::sync::Arc;

use thiserror::Error;
use time::{OffsetDateTime, macros::format_description};

use crate::application::repos::{PostsRepo, RepoError, TagsRepo};
use crate::application::site::SiteContext;
use crate::application::syndication::xml_escape;
use crate::domain::entities::BlogRecord;

pub const SITEMAP_POST_LIMIT: i64 = 500;
pub const SITEMAP_TAG_LIMIT: i64 = 50;

const ROOT_ROBOTS: &str = "User-agent: *\nAllow: /\n";

#[derive(Clone)]
pub struct SitemapService {
    posts: Arc<dyn PostsRepo>,
    tags: Arc<dyn TagsRepo>,
    site: SiteContext,
}

#[derive(Debug, Error)]
pub enum SitemapError {
    #[error("failed to list posts: {0}")]
    Posts(String),
    #[error("failed to list tags: {0}")]
    Tags(String),
}

impl From<RepoError> for SitemapError {
    fn from(err: RepoError) -> Self {
        SitemapError::Posts(err.to_string())
    }
}

struct Entry {
    loc: String,
    lastmod: Option<OffsetDateTime>,
    changefreq: &'static str,
    priority: &'static str,
}

impl SitemapService {
    pub fn new(posts: Arc<dyn PostsRepo>, tags: Arc<dyn TagsRepo>, site: SiteContext) -> Self {
        Self { posts, tags, site }
    }

    pub async fn sitemap(&self, blog: &BlogRecord) -> Result<String, SitemapError> {
        let base = self.site.blog_base_url(blog);
        let posts = self
            .posts
            .list_for_sitemap(blog.id, SITEMAP_POST_LIMIT)
            .await?;
        let tags = self
            .tags
            .list_popular(blog.id, SITEMAP_TAG_LIMIT)
            .await
            .map_err(|err| SitemapError::Tags(err.to_string()))?;

        let most_recent = posts.iter().map(|post| post.updated_at).max();

        let mut entries = vec![
            Entry {
                loc: format!("{base}/"),
                lastmod: most_recent,
                changefreq: "daily",
                priority: "1.0",
            },
            Entry {
                loc: format!("{base}/tags"),
                lastmod: most_recent,
                changefreq: "weekly",
                priority: "0.8",
            },
        ];
        entries.extend(posts.iter().map(|post| Entry {
            loc: format!("{base}/{}", post.slug),
            lastmod: Some(post.updated_at),
            changefreq: "weekly",
            priority: "0.7",
        }));
        entries.extend(tags.iter().map(|tag| Entry {
            loc: format!("{base}/t/{}", tag.tag.slug),
            lastmod: tag.last_updated_at,
            changefreq: "weekly",
            priority: "0.6",
        }));

        let mut body = String::from(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n<urlset xmlns=\"http://www.sitemaps.org/schemas/sitemap/0.9\">\n",
        );
        for entry in &entries {
            body.push_str(&render_entry(entry));
        }
        body.push_str("</urlset>\n");

        Ok(body)
    }

    pub fn robots(&self, blog: &BlogRecord) -> String {
        if blog.no_index {
            return "User-agent: *\nDisallow: /\n".to_string();
        }
        let base = self.site.blog_base_url(blog);
        format!("User-agent: *\nAllow: /\n\nSitemap: {base}/sitemap.xml\n")
    }

    pub fn root_robots(&self) -> &'static str {
        ROOT_ROBOTS
    }
}

fn render_entry(entry: &Entry) -> String {
    let lastmod = entry
        .lastmod
        .and_then(|ts| ts.format(format_description!("[year]-[month]-[day]")).ok())
        .map(|date| format!("    <lastmod>{date}</lastmod>\n"))
        .unwrap_or_default();
    format!(
        "  <url>\n    <loc>{}</loc>\n{lastmod}    <changefreq>{}</changefreq>\n    <priority>{}</priority>\n  </url>\n",
        xml_escape(&entry.loc),
        entry.changefreq,
        entry.priority,
    )
}
