use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::{HeaderMap, StatusCode, header::CONTENT_TYPE, header::HOST},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

use crate::application::tokens::ApiPrincipal;
use crate::domain::entities::PostRecord;
use crate::domain::posts::{PostInput, normalize_tag_list, parse_tag_list};
use crate::domain::types::PostKind;
use crate::domain::uploads::DirectUploadRequest;

use super::error::ApiError;
use super::state::ApiState;

/// `tag_list` accepts either `"a, b"` or `["a", "b"]`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum TagListInput {
    Text(String),
    List(Vec<String>),
}

impl TagListInput {
    fn into_names(self) -> Vec<String> {
        match self {
            TagListInput::Text(raw) => parse_tag_list(&raw),
            TagListInput::List(names) => normalize_tag_list(names.iter().map(String::as_str)),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PostPayload {
    pub title: Option<String>,
    pub body_markdown: Option<String>,
    pub slug: Option<String>,
    pub meta_description: Option<String>,
    pub published: Option<bool>,
    #[serde(with = "time::serde::rfc3339::option")]
    pub published_at: Option<OffsetDateTime>,
    pub featured: Option<bool>,
    pub tag_list: Option<TagListInput>,
    /// Subdomain of the target blog; the primary blog when absent.
    pub blog: Option<String>,
}

impl PostPayload {
    fn into_input(self) -> PostInput {
        PostInput {
            title: self.title,
            slug: self.slug,
            body_markdown: self.body_markdown,
            meta_description: self.meta_description,
            published: self.published,
            published_at: self.published_at,
            featured: self.featured,
            tag_list: self.tag_list.map(TagListInput::into_names),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PostEnvelope {
    pub post: Option<PostPayload>,
    /// A whole frontmatter document, used instead of `post`.
    pub markdown: Option<String>,
    pub blog: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PostBody {
    pub post: PostRecord,
}

#[derive(Debug, Serialize)]
pub struct PostsBody {
    pub posts: Vec<PostRecord>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DomainQuery {
    pub domain: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DirectUploadEnvelope {
    pub blob: Option<DirectUploadRequest>,
}

fn parse_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| {
            ApiError::bad_request("Invalid request body").with_detail(rejection.body_text())
        })
}

pub async fn list_posts(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
) -> Result<Json<PostsBody>, ApiError> {
    let posts = state.posts.list(&principal.user).await?;
    Ok(Json(PostsBody { posts }))
}

pub async fn get_post(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(slug): Path<String>,
) -> Result<Json<PostBody>, ApiError> {
    let post = state.posts.get(&principal.user, &slug).await?;
    Ok(Json(PostBody { post }))
}

pub async fn create_post(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    payload: Result<Json<PostEnvelope>, JsonRejection>,
) -> Result<(StatusCode, Json<PostBody>), ApiError> {
    let envelope = parse_body(payload)?;
    let subdomain = envelope
        .blog
        .clone()
        .or_else(|| envelope.post.as_ref().and_then(|post| post.blog.clone()));
    let blog = state
        .posts
        .blog_for(&principal.user, subdomain.as_deref())
        .await?;

    let post = match (envelope.markdown, envelope.post) {
        (Some(markdown), _) => {
            state
                .posts
                .import_markdown(&principal.user, &blog, &markdown)
                .await?
        }
        (None, Some(payload)) => {
            state
                .posts
                .create(&principal.user, &blog, PostKind::Post, payload.into_input())
                .await?
        }
        (None, None) => return Err(ApiError::bad_request("param is missing: post")),
    };

    Ok((StatusCode::CREATED, Json(PostBody { post })))
}

pub async fn update_post(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(slug): Path<String>,
    payload: Result<Json<PostEnvelope>, JsonRejection>,
) -> Result<Json<PostBody>, ApiError> {
    let envelope = parse_body(payload)?;
    let current = state.posts.get(&principal.user, &slug).await?;

    let post = match (envelope.markdown, envelope.post) {
        (Some(markdown), _) => state.posts.update_from_markdown(&current, &markdown).await?,
        (None, Some(payload)) => state.posts.update(&current, payload.into_input()).await?,
        (None, None) => return Err(ApiError::bad_request("param is missing: post")),
    };

    Ok(Json(PostBody { post }))
}

pub async fn delete_post(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(slug): Path<String>,
) -> Result<StatusCode, ApiError> {
    let post = state.posts.get(&principal.user, &slug).await?;
    state.posts.destroy(&post).await?;
    Ok(StatusCode::NO_CONTENT)
}

pub async fn post_markdown(
    State(state): State<ApiState>,
    Extension(principal): Extension<ApiPrincipal>,
    Path(slug): Path<String>,
) -> Result<Response, ApiError> {
    let post = state.posts.get(&principal.user, &slug).await?;
    let document = state.posts.export_markdown(&post)?;
    Ok((
        StatusCode::OK,
        [(CONTENT_TYPE, "text/markdown; charset=utf-8")],
        document,
    )
        .into_response())
}

/// Called by the TLS terminator before it provisions a certificate for a host.
pub async fn validate_domain(
    State(state): State<ApiState>,
    headers: HeaderMap,
    Query(query): Query<DomainQuery>,
) -> Result<StatusCode, ApiError> {
    let host_header = headers.get(HOST).and_then(|value| value.to_str().ok());
    let domain = query
        .domain
        .as_deref()
        .filter(|domain| !domain.trim().is_empty())
        .or(host_header);

    if state.domains.validate(domain).await? {
        Ok(StatusCode::OK)
    } else {
        Ok(StatusCode::FORBIDDEN)
    }
}

pub async fn create_direct_upload(
    State(state): State<ApiState>,
    payload: Result<Json<DirectUploadEnvelope>, JsonRejection>,
) -> Result<Response, ApiError> {
    let envelope = parse_body(payload)?;
    let request = envelope
        .blob
        .ok_or_else(|| ApiError::bad_request("param is missing: blob"))?;

    let response = state
        .uploads
        .create_direct_upload(request)
        .await
        .map_err(ApiError::from)?;
    Ok(Json(response).into_response())
}
