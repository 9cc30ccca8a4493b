//! Askama view models and templates for the public blog pages.

use askama::{Error as AskamaError, Template};
use axum::{
    http::StatusCode,
    response::{Html, IntoResponse, Response},
};
use thiserror::Error;
use time::{OffsetDateTime, format_description::FormatItem, macros::format_description};

use crate::application::{
    blog::{BlogContext, HomePage, TagPage},
    error::{ErrorReport, HttpError},
    pagination::Paged,
    site::SiteContext,
};
use crate::domain::entities::{PostRecord, TagWithCount};
use crate::domain::slug::tag_slug;

const DISPLAY_DATE: &[FormatItem<'static>] =
    format_description!("[month repr:long] [day padding:none], [year]");
const ISO_DATE: &[FormatItem<'static>] = format_description!("[year]-[month]-[day]");

#[derive(Debug, Error)]
#[error("{public_message}")]
pub struct TemplateRenderError {
    pub(crate) source: &'static str,
    pub(crate) public_message: &'static str,
    #[source]
    pub(crate) error: AskamaError,
}

impl TemplateRenderError {
    pub fn new(source: &'static str, public_message: &'static str, error: AskamaError) -> Self {
        Self {
            source,
            public_message,
            error,
        }
    }
}

impl From<TemplateRenderError> for HttpError {
    fn from(err: TemplateRenderError) -> Self {
        let TemplateRenderError {
            source,
            public_message,
            error,
        } = err;

        HttpError::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            public_message,
            &error,
        )
    }
}

pub fn render_template<T: Template>(template: T) -> Result<Html<String>, HttpError> {
    template.render().map(Html).map_err(|err| {
        TemplateRenderError::new(
            "presentation::views::render_template",
            "Template rendering failed",
            err,
        )
        .into()
    })
}

pub fn render_template_response<T: Template>(template: T, status: StatusCode) -> Response {
    match render_template(template) {
        Ok(html) => (status, html).into_response(),
        Err(err) => err.into_response(),
    }
}

pub fn render_not_found_response(layout: LayoutView) -> Response {
    let mut response =
        render_template_response(NotFoundTemplate { layout }, StatusCode::NOT_FOUND);
    ErrorReport::from_message(
        "presentation::views::render_not_found_response",
        StatusCode::NOT_FOUND,
        "Resource not found",
    )
    .attach(&mut response);
    response
}

pub fn format_display_date(value: OffsetDateTime) -> String {
    value.format(DISPLAY_DATE).unwrap_or_default()
}

pub fn format_iso_date(value: OffsetDateTime) -> String {
    value.format(ISO_DATE).unwrap_or_default()
}

/// Chrome shared by every page: titles, meta tags, feed links.
#[derive(Debug, Clone)]
pub struct LayoutView {
    pub site_title: String,
    pub page_title: String,
    pub description: Option<String>,
    pub favicon_emoji: Option<String>,
    pub canonical: String,
    pub theme: String,
    pub no_index: bool,
    pub has_mermaid: bool,
    pub feeds: Option<FeedLinks>,
}

#[derive(Debug, Clone)]
pub struct FeedLinks {
    pub rss: String,
    pub atom: String,
    pub json: String,
}

impl LayoutView {
    pub fn for_blog(site: &SiteContext, ctx: &BlogContext, path: &str) -> Self {
        let base = site.blog_base_url(&ctx.blog);
        let title = ctx.blog.display_title().to_string();
        Self {
            page_title: title.clone(),
            site_title: title,
            description: ctx
                .blog
                .meta_description
                .clone()
                .filter(|text| !text.trim().is_empty()),
            favicon_emoji: ctx.blog.favicon_emoji.clone(),
            canonical: format!("{base}{path}"),
            theme: ctx.blog.theme.clone(),
            no_index: ctx.blog.no_index,
            has_mermaid: false,
            feeds: Some(FeedLinks {
                rss: format!("{base}/posts/rss"),
                atom: format!("{base}/posts/atom"),
                json: format!("{base}/posts/json"),
            }),
        }
    }

    /// Chrome for the platform root, which has no blog behind it.
    pub fn platform(site: &SiteContext) -> Self {
        Self {
            site_title: site.root_domain.clone(),
            page_title: site.root_domain.clone(),
            description: None,
            favicon_emoji: None,
            canonical: format!("https://{}/", site.root_domain),
            theme: "light".to_string(),
            no_index: false,
            has_mermaid: false,
            feeds: None,
        }
    }

    pub fn titled(mut self, title: &str) -> Self {
        if !title.trim().is_empty() {
            self.page_title = format!("{title} | {}", self.site_title);
        }
        self
    }

    pub fn described(mut self, description: Option<&str>) -> Self {
        if let Some(text) = description.filter(|text| !text.trim().is_empty()) {
            self.description = Some(text.to_string());
        }
        self
    }
}

#[derive(Debug, Clone)]
pub struct TagLink {
    pub name: String,
    pub href: String,
}

impl TagLink {
    fn from_name(name: &str) -> Self {
        Self {
            name: name.to_string(),
            href: format!("/t/{}", tag_slug(name)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PostCard {
    pub title: String,
    pub href: String,
    pub date: Option<String>,
    pub date_iso: Option<String>,
    pub summary: Option<String>,
    pub tags: Vec<TagLink>,
}

impl From<&PostRecord> for PostCard {
    fn from(post: &PostRecord) -> Self {
        Self {
            title: post.title.clone(),
            href: format!("/{}", post.slug),
            date: post.published_at.map(format_display_date),
            date_iso: post.published_at.map(format_iso_date),
            summary: post
                .meta_description
                .clone()
                .filter(|text| !text.trim().is_empty()),
            tags: post.tag_list.iter().map(|name| TagLink::from_name(name)).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PaginationView {
    pub page: u32,
    pub total_pages: u32,
    pub prev_href: Option<String>,
    pub next_href: Option<String>,
}

impl PaginationView {
    pub fn new<T>(paged: &Paged<T>, base_path: &str) -> Self {
        let href = |page: u32| {
            if page <= 1 {
                base_path.to_string()
            } else {
                format!("{base_path}?page={page}")
            }
        };
        Self {
            page: paged.page,
            total_pages: paged.total_pages(),
            prev_href: paged.prev_page().map(href),
            next_href: paged.next_page().map(href),
        }
    }

    pub fn is_needed(&self) -> bool {
        self.total_pages > 1
    }
}

#[derive(Debug, Clone)]
pub struct PostView {
    pub title: String,
    pub body_html: String,
    pub date: Option<String>,
    pub date_iso: Option<String>,
    pub is_page: bool,
    pub tags: Vec<TagLink>,
}

impl From<&PostRecord> for PostView {
    fn from(post: &PostRecord) -> Self {
        Self {
            title: post.title.clone(),
            body_html: post.body_html.clone().unwrap_or_default(),
            date: post.published_at.map(format_display_date),
            date_iso: post.published_at.map(format_iso_date),
            is_page: post.is_page(),
            tags: post.tag_list.iter().map(|name| TagLink::from_name(name)).collect(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TagCountView {
    pub name: String,
    pub href: String,
    pub count: i64,
}

impl From<&TagWithCount> for TagCountView {
    fn from(tag: &TagWithCount) -> Self {
        Self {
            name: tag.tag.name.clone(),
            href: format!("/t/{}", tag.tag.slug),
            count: tag.posts_count,
        }
    }
}

#[derive(Template)]
#[template(path = "landing.html")]
pub struct LandingTemplate {
    pub layout: LayoutView,
}

#[derive(Template)]
#[template(path = "index.html")]
pub struct IndexTemplate {
    pub layout: LayoutView,
    pub featured: Vec<PostCard>,
    pub posts: Vec<PostCard>,
    pub pagination: PaginationView,
}

impl IndexTemplate {
    pub fn new(layout: LayoutView, home: &HomePage) -> Self {
        Self {
            layout,
            featured: home.featured.iter().map(PostCard::from).collect(),
            posts: home.posts.items.iter().map(PostCard::from).collect(),
            pagination: PaginationView::new(&home.posts, "/"),
        }
    }
}

#[derive(Template)]
#[template(path = "post.html")]
pub struct PostTemplate {
    pub layout: LayoutView,
    pub post: PostView,
    pub footer_html: Option<String>,
}

impl PostTemplate {
    pub fn new(layout: LayoutView, ctx: &BlogContext, post: &PostRecord) -> Self {
        let mut layout = layout
            .titled(&post.title)
            .described(post.meta_description.as_deref());
        layout.has_mermaid = post.has_mermaid_diagrams;
        Self {
            layout,
            post: PostView::from(post),
            footer_html: ctx.blog.post_footer_html.clone(),
        }
    }
}

#[derive(Template)]
#[template(path = "tags.html")]
pub struct TagsTemplate {
    pub layout: LayoutView,
    pub tags: Vec<TagCountView>,
}

#[derive(Template)]
#[template(path = "tag.html")]
pub struct TagTemplate {
    pub layout: LayoutView,
    pub tag_name: String,
    pub posts: Vec<PostCard>,
    pub pagination: PaginationView,
}

impl TagTemplate {
    pub fn new(layout: LayoutView, page: &TagPage) -> Self {
        Self {
            layout: layout.titled(&page.tag.name),
            tag_name: page.tag.name.clone(),
            posts: page.posts.items.iter().map(PostCard::from).collect(),
            pagination: PaginationView::new(&page.posts, &format!("/t/{}", page.tag.slug)),
        }
    }
}

#[derive(Template)]
#[template(path = "subscribe.html")]
pub struct SubscribeTemplate {
    pub layout: LayoutView,
    pub author_name: String,
}

#[derive(Template)]
#[template(path = "not_found.html")]
pub struct NotFoundTemplate {
    pub layout: LayoutView,
}
