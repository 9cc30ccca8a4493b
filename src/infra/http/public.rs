use std::sync::Arc;

use axum::{
    Router,
    body::Body,
    extract::{FromRef, FromRequestParts, Path, Query, State},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_TYPE, HOST, LOCATION},
        request::Parts,
    },
    response::{IntoResponse, Redirect, Response},
    routing::get,
};
use tracing::error;

use crate::{
    application::{
        blog::{BlogContext, BlogError, BlogService, HostTarget},
        error::HttpError,
        pagination::PageQuery,
        repos::HealthCheck,
        sitemap::SitemapService,
        syndication::SyndicationService,
        uploads::UploadService,
    },
    presentation::views::{
        IndexTemplate, LandingTemplate, LayoutView, PostTemplate, SubscribeTemplate,
        TagCountView, TagTemplate, TagsTemplate, render_not_found_response,
        render_template_response,
    },
};

use super::{RouterState, health_response, repo_error_to_http};

const POST_CACHE_CONTROL: &str = "public, max-age=300";
const SITEMAP_CACHE_CONTROL: &str = "public, max-age=21600";
const ROBOTS_CACHE_CONTROL: &str = "public, max-age=2592000";

#[derive(Clone)]
pub struct HttpState {
    pub blogs: Arc<BlogService>,
    pub syndication: Arc<SyndicationService>,
    pub sitemap: Arc<SitemapService>,
    pub uploads: Arc<UploadService>,
    pub health: Arc<dyn HealthCheck>,
}

impl HttpState {
    fn platform_layout(&self) -> LayoutView {
        LayoutView::platform(self.blogs.site())
    }

    fn blog_layout(&self, ctx: &BlogContext, path: &str) -> LayoutView {
        LayoutView::for_blog(self.blogs.site(), ctx, path)
    }
}

pub fn build_router() -> Router<RouterState> {
    Router::new()
        .route("/", get(home))
        .route("/tags", get(tags_index))
        .route("/t/{tag}", get(tag_page))
        .route("/subscribe", get(subscribe))
        .route("/posts/rss", get(rss_feed))
        .route("/posts/atom", get(atom_feed))
        .route("/posts/json", get(json_feed))
        .route("/sitemap.xml", get(sitemap))
        .route("/robots.txt", get(robots_txt))
        .route("/up", get(up))
        .route("/{slug}", get(post_detail))
}

/// The site a request is addressed to, after the custom-domain redirect has been applied.
pub enum Tenant {
    Root,
    Blog(Box<BlogContext>),
}

impl<S> FromRequestParts<S> for Tenant
where
    HttpState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let state = HttpState::from_ref(state);
        let host = request_host(parts);

        let ctx = match state.blogs.resolve(&host).await {
            Ok(HostTarget::Root) => return Ok(Tenant::Root),
            Ok(HostTarget::Blog(ctx)) => ctx,
            Err(BlogError::UnknownHost(_)) => {
                return Err(render_not_found_response(state.platform_layout()));
            }
            Err(err) => return Err(blog_error_response(err)),
        };

        let path_and_query = parts
            .uri
            .path_and_query()
            .map(|value| value.as_str())
            .unwrap_or("/");
        if let Some(location) =
            state
                .blogs
                .site()
                .custom_domain_redirect(&ctx.blog, &host, path_and_query)
        {
            return Err(moved_permanently(&location));
        }

        Ok(Tenant::Blog(ctx))
    }
}

/// A blog-only route; the platform root answers these with the not-found page.
pub struct CurrentBlog(pub Box<BlogContext>);

impl<S> FromRequestParts<S> for CurrentBlog
where
    HttpState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        match Tenant::from_request_parts(parts, state).await? {
            Tenant::Blog(ctx) => Ok(CurrentBlog(ctx)),
            Tenant::Root => {
                let state = HttpState::from_ref(state);
                Err(render_not_found_response(state.platform_layout()))
            }
        }
    }
}

fn request_host(parts: &Parts) -> String {
    parts
        .headers
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
        .or_else(|| parts.uri.host().map(str::to_string))
        .unwrap_or_default()
}

async fn home(
    State(state): State<HttpState>,
    tenant: Tenant,
    Query(query): Query<PageQuery>,
) -> Response {
    let ctx = match tenant {
        Tenant::Root => {
            return render_template_response(
                LandingTemplate {
                    layout: state.platform_layout(),
                },
                StatusCode::OK,
            );
        }
        Tenant::Blog(ctx) => ctx,
    };

    match state.blogs.home(&ctx.blog, query.page).await {
        Ok(home) => render_template_response(
            IndexTemplate::new(state.blog_layout(&ctx, "/"), &home),
            StatusCode::OK,
        ),
        Err(err) => blog_error_response(err),
    }
}

async fn tags_index(State(state): State<HttpState>, CurrentBlog(ctx): CurrentBlog) -> Response {
    match state.blogs.tags(&ctx.blog).await {
        Ok(tags) => render_template_response(
            TagsTemplate {
                layout: state.blog_layout(&ctx, "/tags").titled("Tags"),
                tags: tags.iter().map(TagCountView::from).collect(),
            },
            StatusCode::OK,
        ),
        Err(err) => blog_error_response(err),
    }
}

async fn tag_page(
    State(state): State<HttpState>,
    CurrentBlog(ctx): CurrentBlog,
    Path(tag): Path<String>,
    Query(query): Query<PageQuery>,
) -> Response {
    match state.blogs.tag(&ctx.blog, &tag, query.page).await {
        Ok(Some(page)) => {
            let layout = state.blog_layout(&ctx, &format!("/t/{}", page.tag.slug));
            render_template_response(TagTemplate::new(layout, &page), StatusCode::OK)
        }
        Ok(None) => Redirect::to("/").into_response(),
        Err(err) => blog_error_response(err),
    }
}

async fn post_detail(
    State(state): State<HttpState>,
    CurrentBlog(ctx): CurrentBlog,
    Path(slug): Path<String>,
) -> Response {
    match state.blogs.post(&ctx.blog, &slug).await {
        Ok(Some(post)) => {
            let layout = state.blog_layout(&ctx, &format!("/{}", post.slug));
            let mut response =
                render_template_response(PostTemplate::new(layout, &ctx, &post), StatusCode::OK);
            if response.status().is_success() {
                set_cache_control(&mut response, POST_CACHE_CONTROL);
            }
            response
        }
        Ok(None) => render_not_found_response(state.blog_layout(&ctx, &format!("/{slug}"))),
        Err(err) => blog_error_response(err),
    }
}

async fn subscribe(State(state): State<HttpState>, CurrentBlog(ctx): CurrentBlog) -> Response {
    render_template_response(
        SubscribeTemplate {
            layout: state.blog_layout(&ctx, "/subscribe").titled("Subscribe"),
            author_name: ctx.owner.name.clone(),
        },
        StatusCode::OK,
    )
}

async fn rss_feed(State(state): State<HttpState>, CurrentBlog(ctx): CurrentBlog) -> Response {
    match state.syndication.rss(&ctx).await {
        Ok(body) => text_response(body, "application/rss+xml; charset=utf-8", None),
        Err(err) => HttpError::from_error(
            "infra::http::public::rss",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to generate RSS feed",
            &err,
        )
        .into_response(),
    }
}

async fn atom_feed(State(state): State<HttpState>, CurrentBlog(ctx): CurrentBlog) -> Response {
    match state.syndication.atom(&ctx).await {
        Ok(body) => text_response(body, "application/atom+xml; charset=utf-8", None),
        Err(err) => HttpError::from_error(
            "infra::http::public::atom",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to generate Atom feed",
            &err,
        )
        .into_response(),
    }
}

async fn json_feed(State(state): State<HttpState>, CurrentBlog(ctx): CurrentBlog) -> Response {
    match state.syndication.json_feed(&ctx).await {
        Ok(body) => text_response(body, "application/feed+json; charset=utf-8", None),
        Err(err) => HttpError::from_error(
            "infra::http::public::json_feed",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to generate JSON feed",
            &err,
        )
        .into_response(),
    }
}

async fn sitemap(State(state): State<HttpState>, CurrentBlog(ctx): CurrentBlog) -> Response {
    match state.sitemap.sitemap(&ctx.blog).await {
        Ok(body) => text_response(
            body,
            "application/xml; charset=utf-8",
            Some(SITEMAP_CACHE_CONTROL),
        ),
        Err(err) => HttpError::from_error(
            "infra::http::public::sitemap",
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to generate sitemap",
            &err,
        )
        .into_response(),
    }
}

async fn robots_txt(State(state): State<HttpState>, tenant: Tenant) -> Response {
    let body = match tenant {
        Tenant::Root => state.sitemap.root_robots().to_string(),
        Tenant::Blog(ctx) => state.sitemap.robots(&ctx.blog),
    };
    text_response(
        body,
        "text/plain; charset=utf-8",
        Some(ROBOTS_CACHE_CONTROL),
    )
}

async fn up(State(state): State<HttpState>) -> Response {
    health_response(state.health.health_check().await)
}

fn blog_error_response(err: BlogError) -> Response {
    const SOURCE: &str = "infra::http::public";
    match err {
        BlogError::Repo(err) => repo_error_to_http(SOURCE, err).into_response(),
        other => {
            error!(target = "willow::http::public", error = %other, "Failed to load blog");
            HttpError::internal(SOURCE, &other).into_response()
        }
    }
}

fn moved_permanently(location: &str) -> Response {
    match HeaderValue::from_str(location) {
        Ok(value) => (StatusCode::MOVED_PERMANENTLY, [(LOCATION, value)]).into_response(),
        Err(_) => StatusCode::BAD_REQUEST.into_response(),
    }
}

fn set_cache_control(response: &mut Response, value: &'static str) {
    response
        .headers_mut()
        .insert(CACHE_CONTROL, HeaderValue::from_static(value));
}

fn text_response(body: String, content_type: &str, cache_control: Option<&'static str>) -> Response {
    let mut builder = Response::builder()
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, content_type);
    if let Some(value) = cache_control {
        builder = builder.header(CACHE_CONTROL, value);
    }
    builder
        .body(Body::from(body))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}
