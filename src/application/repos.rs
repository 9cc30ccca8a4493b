//! Repository traits describing persistence adapters.

use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::pagination::{PageRequest, Paged};
use crate::domain::entities::{
    BlobMetadata, BlobRecord, BlogRecord, PostRecord, TagRecord, TagWithCount, UserRecord,
    UserTokenRecord,
};
use crate::domain::types::PostKind;

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("duplicate record violates unique constraint `{constraint}`")]
    Duplicate { constraint: String },
    #[error("resource not found")]
    NotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("integrity error: {message}")]
    Integrity { message: String },
    #[error("database timeout")]
    Timeout,
}

impl RepoError {
    pub fn from_persistence(err: impl std::fmt::Display) -> Self {
        Self::Persistence(err.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct CreateUserParams {
    pub email: String,
    pub name: String,
    pub password_hash: String,
}

#[async_trait]
pub trait UsersRepo: Send + Sync {
    async fn create_user(&self, params: CreateUserParams) -> Result<UserRecord, RepoError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepoError>;

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, RepoError>;
}

#[derive(Debug, Clone)]
pub struct CreateBlogParams {
    pub user_id: Uuid,
    pub subdomain: String,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub favicon_emoji: Option<String>,
    pub custom_domain: Option<String>,
    pub theme: String,
    pub post_footer_markdown: Option<String>,
    pub post_footer_html: Option<String>,
    pub no_index: bool,
    pub primary: bool,
}

#[derive(Debug, Clone)]
pub struct UpdateBlogParams {
    pub id: Uuid,
    pub subdomain: String,
    pub title: Option<String>,
    pub meta_description: Option<String>,
    pub favicon_emoji: Option<String>,
    pub custom_domain: Option<String>,
    pub theme: String,
    pub post_footer_markdown: Option<String>,
    pub post_footer_html: Option<String>,
    pub no_index: bool,
    pub primary: bool,
}

#[async_trait]
pub trait BlogsRepo: Send + Sync {
    async fn find_by_subdomain(&self, subdomain: &str) -> Result<Option<BlogRecord>, RepoError>;

    async fn find_by_custom_domain(&self, domain: &str) -> Result<Option<BlogRecord>, RepoError>;

    async fn find_blog_by_id(&self, id: Uuid) -> Result<Option<BlogRecord>, RepoError>;

    /// Oldest first.
    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<BlogRecord>, RepoError>;

    async fn create_blog(&self, params: CreateBlogParams) -> Result<BlogRecord, RepoError>;

    async fn update_blog(&self, params: UpdateBlogParams) -> Result<BlogRecord, RepoError>;
}

/// Public, read-only post queries. Every method only sees published rows.
#[async_trait]
pub trait PostsRepo: Send + Sync {
    /// Featured posts (not pages), newest publication first.
    async fn list_featured(&self, blog_id: Uuid, limit: i64) -> Result<Vec<PostRecord>, RepoError>;

    /// Posts (not pages), newest publication first.
    async fn list_published(
        &self,
        blog_id: Uuid,
        page: PageRequest,
    ) -> Result<Paged<PostRecord>, RepoError>;

    /// Posts carrying `tag_id`, newest creation first.
    async fn list_published_by_tag(
        &self,
        blog_id: Uuid,
        tag_id: Uuid,
        page: PageRequest,
    ) -> Result<Paged<PostRecord>, RepoError>;

    /// Posts (not pages) ordered by `published_at DESC, created_at DESC`.
    async fn list_recent_published(
        &self,
        blog_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PostRecord>, RepoError>;

    /// Posts and pages for the sitemap, most recently updated first.
    async fn list_for_sitemap(&self, blog_id: Uuid, limit: i64)
    -> Result<Vec<PostRecord>, RepoError>;

    /// A published post or page.
    async fn find_published_by_slug(
        &self,
        blog_id: Uuid,
        slug: &str,
    ) -> Result<Option<PostRecord>, RepoError>;
}

#[derive(Debug, Clone)]
pub struct CreatePostParams {
    pub blog_id: Uuid,
    pub author_id: Uuid,
    pub kind: PostKind,
    pub title: String,
    pub slug: String,
    pub base_slug: String,
    pub slug_suffix: i32,
    pub body_markdown: Option<String>,
    pub body_html: Option<String>,
    pub meta_description: Option<String>,
    pub published: bool,
    pub published_at: Option<OffsetDateTime>,
    pub featured: bool,
    pub has_mermaid_diagrams: bool,
}

#[derive(Debug, Clone)]
pub struct UpdatePostParams {
    pub id: Uuid,
    pub title: String,
    pub slug: String,
    pub base_slug: String,
    pub slug_suffix: i32,
    pub body_markdown: Option<String>,
    pub body_html: Option<String>,
    pub meta_description: Option<String>,
    pub published: bool,
    pub published_at: Option<OffsetDateTime>,
    pub featured: bool,
    pub has_mermaid_diagrams: bool,
}

/// Author-scoped reads and all writes.
#[async_trait]
pub trait PostsWriteRepo: Send + Sync {
    async fn list_for_author(&self, author_id: Uuid) -> Result<Vec<PostRecord>, RepoError>;

    async fn find_for_author_by_slug(
        &self,
        author_id: Uuid,
        slug: &str,
    ) -> Result<Option<PostRecord>, RepoError>;

    /// Any post or page in the blog, published or not.
    async fn find_in_blog_by_slug(
        &self,
        blog_id: Uuid,
        slug: &str,
    ) -> Result<Option<PostRecord>, RepoError>;

    async fn slug_exists(&self, slug: &str) -> Result<bool, RepoError>;

    /// Highest `slug_suffix` among the blog's posts sharing `base_slug`, ignoring `exclude`.
    async fn max_slug_suffix(
        &self,
        blog_id: Uuid,
        base_slug: &str,
        exclude: Option<Uuid>,
    ) -> Result<Option<i32>, RepoError>;

    /// Insert the post, find or create its tags and write the taggings in one transaction.
    async fn create_post(
        &self,
        params: CreatePostParams,
        tags: &[NewTag],
    ) -> Result<PostRecord, RepoError>;

    /// Same transaction boundary as `create_post`; `tags: None` keeps the current taggings.
    async fn update_post(
        &self,
        params: UpdatePostParams,
        tags: Option<&[NewTag]>,
    ) -> Result<PostRecord, RepoError>;

    async fn update_post_featured(&self, id: Uuid, featured: bool)
    -> Result<PostRecord, RepoError>;

    async fn delete_post(&self, id: Uuid) -> Result<(), RepoError>;
}

/// A tag as written on a post. `slug` is the base slug; when another tag of the blog
/// already owns it, the repository moves on to `slug-2`, `slug-3`, ... and the first
/// name to claim a slug keeps it. Names equal under `same_tag_name` share one tag.
#[derive(Debug, Clone)]
pub struct NewTag {
    pub name: String,
    pub slug: String,
}

#[async_trait]
pub trait TagsRepo: Send + Sync {
    /// Tags used by at least one published post, ordered by name.
    async fn list_with_counts(&self, blog_id: Uuid) -> Result<Vec<TagWithCount>, RepoError>;

    /// Most used tags first.
    async fn list_popular(&self, blog_id: Uuid, limit: i64)
    -> Result<Vec<TagWithCount>, RepoError>;

    async fn find_tag_by_slug(
        &self,
        blog_id: Uuid,
        slug: &str,
    ) -> Result<Option<TagRecord>, RepoError>;
}

#[derive(Debug, Clone)]
pub struct CreateTokenParams {
    pub user_id: Uuid,
    pub name: String,
    pub token: String,
    pub expires_at: Option<OffsetDateTime>,
}

#[async_trait]
pub trait TokensRepo: Send + Sync {
    async fn create_token(&self, params: CreateTokenParams) -> Result<UserTokenRecord, RepoError>;

    async fn find_by_token(&self, token: &str) -> Result<Option<UserTokenRecord>, RepoError>;

    async fn list_tokens(&self, user_id: Uuid) -> Result<Vec<UserTokenRecord>, RepoError>;

    /// `true` when a row was removed.
    async fn delete_token(&self, user_id: Uuid, id: Uuid) -> Result<bool, RepoError>;

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError>;
}

#[async_trait]
pub trait BlobsRepo: Send + Sync {
    async fn insert_blob(&self, record: BlobRecord) -> Result<(), RepoError>;

    async fn find_blob(&self, id: Uuid) -> Result<Option<BlobRecord>, RepoError>;

    async fn find_blob_by_key(&self, key: &str) -> Result<Option<BlobRecord>, RepoError>;

    async fn update_blob_metadata(&self, id: Uuid, metadata: &BlobMetadata)
    -> Result<(), RepoError>;

    /// Record a rewritten file together with its new size and metadata.
    async fn update_blob_contents(
        &self,
        id: Uuid,
        byte_size: i64,
        metadata: &BlobMetadata,
    ) -> Result<(), RepoError>;
}

#[async_trait]
pub trait HealthCheck: Send + Sync {
    async fn health_check(&self) -> Result<(), RepoError>;
}
