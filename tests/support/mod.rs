#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use tempfile::TempDir;
use time::OffsetDateTime;
use tokio::sync::Mutex;
use tower::ServiceExt;
use uuid::Uuid;

use willow::application::accounts::AccountService;
use willow::application::blog::BlogService;
use willow::application::domain_validation::DomainValidationService;
use willow::application::jobs::{JobQueue, JobWorkerContext, QueuedJob};
use willow::application::pagination::{PageRequest, Paged};
use willow::application::posts::PostWriteService;
use willow::application::render::{MarkdownRenderer, render_service};
use willow::application::repos::{
    BlobsRepo, BlogsRepo, CreateBlogParams, CreatePostParams, CreateTokenParams,
    CreateUserParams, HealthCheck, NewTag, PostsRepo, PostsWriteRepo, RepoError, TagsRepo,
    TokensRepo, UpdateBlogParams, UpdatePostParams, UsersRepo,
};
use willow::application::site::SiteContext;
use willow::application::sitemap::SitemapService;
use willow::application::syndication::SyndicationService;
use willow::application::tokens::TokenService;
use willow::application::uploads::{UploadPolicy, UploadService};
use willow::domain::blogs::BlogSettings;
use willow::domain::entities::{
    BlobMetadata, BlobRecord, BlogRecord, PostRecord, TagRecord, TagWithCount, UserRecord,
    UserTokenRecord,
};
use willow::domain::posts::PostInput;
use willow::domain::slug::{MAX_TAG_SLUG_ATTEMPTS, SequencedSlug, same_tag_name};
use willow::domain::types::PostKind;
use willow::infra::http::{ApiRateLimiter, ApiState, HttpState, RouterState, build_app};
use willow::infra::uploads::UploadStorage;

pub const ROOT_DOMAIN: &str = "willow.camp";
pub const SIGNING_SECRET: &str = "test-signing-secret";
pub const MAX_REQUEST_BYTES: usize = 8 * 1024 * 1024;

#[derive(Default, Clone)]
struct State {
    users: Vec<UserRecord>,
    blogs: Vec<BlogRecord>,
    posts: Vec<PostRecord>,
    tags: Vec<TagRecord>,
    /// `(post_id, tag_id, position)`
    taggings: Vec<(Uuid, Uuid, usize)>,
    tokens: Vec<UserTokenRecord>,
    blobs: Vec<BlobRecord>,
    jobs: Vec<QueuedJob>,
    unhealthy: bool,
}

impl State {
    fn with_tags(&self, mut post: PostRecord) -> PostRecord {
        let mut tagged: Vec<(usize, &TagRecord)> = self
            .taggings
            .iter()
            .filter(|(post_id, _, _)| *post_id == post.id)
            .filter_map(|(_, tag_id, position)| {
                self.tags
                    .iter()
                    .find(|tag| tag.id == *tag_id)
                    .map(|tag| (*position, tag))
            })
            .collect();
        tagged.sort_by_key(|(position, _)| *position);
        post.tag_list = tagged.into_iter().map(|(_, tag)| tag.name.clone()).collect();
        post
    }

    /// Same slug walk as the Postgres repository: reuse a same-named tag, else take the next free slug.
    fn ensure_tag(&mut self, blog_id: Uuid, wanted: &NewTag) -> Result<Uuid, RepoError> {
        for attempt in 1..=MAX_TAG_SLUG_ATTEMPTS {
            let slug = SequencedSlug {
                base: wanted.slug.clone(),
                suffix: attempt,
            }
            .slug();
            match self
                .tags
                .iter()
                .find(|tag| tag.blog_id == blog_id && tag.slug == slug)
            {
                Some(tag) if same_tag_name(&tag.name, &wanted.name) => return Ok(tag.id),
                Some(_) => continue,
                None => {
                    let id = Uuid::new_v4();
                    self.tags.push(TagRecord {
                        id,
                        blog_id,
                        name: wanted.name.clone(),
                        slug,
                    });
                    return Ok(id);
                }
            }
        }
        Err(RepoError::Integrity {
            message: format!("no free slug for tag `{}`", wanted.name),
        })
    }

    fn tag_post(&mut self, post_id: Uuid, blog_id: Uuid, tags: &[NewTag]) -> Result<(), RepoError> {
        let mut ids: Vec<Uuid> = Vec::with_capacity(tags.len());
        for wanted in tags {
            let id = self.ensure_tag(blog_id, wanted)?;
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        self.taggings.retain(|(tagged, _, _)| *tagged != post_id);
        for (position, tag_id) in ids.into_iter().enumerate() {
            self.taggings.push((post_id, tag_id, position));
        }
        Ok(())
    }

    fn published_posts(&self, blog_id: Uuid) -> Vec<PostRecord> {
        let mut posts: Vec<PostRecord> = self
            .posts
            .iter()
            .filter(|post| post.blog_id == blog_id && post.published && post.kind == PostKind::Post)
            .map(|post| self.with_tags(post.clone()))
            .collect();
        posts.sort_by(|a, b| {
            b.published_at
                .cmp(&a.published_at)
                .then(b.created_at.cmp(&a.created_at))
        });
        posts
    }

    fn tag_counts(&self, blog_id: Uuid) -> Vec<TagWithCount> {
        self.tags
            .iter()
            .filter(|tag| tag.blog_id == blog_id)
            .filter_map(|tag| {
                let posts: Vec<&PostRecord> = self
                    .taggings
                    .iter()
                    .filter(|(_, tag_id, _)| *tag_id == tag.id)
                    .filter_map(|(post_id, _, _)| self.posts.iter().find(|p| p.id == *post_id))
                    .filter(|post| post.published && post.kind == PostKind::Post)
                    .collect();
                (!posts.is_empty()).then(|| TagWithCount {
                    tag: tag.clone(),
                    posts_count: posts.len() as i64,
                    last_updated_at: posts.iter().map(|post| post.updated_at).max(),
                })
            })
            .collect()
    }
}

fn page_of(items: Vec<PostRecord>, page: PageRequest) -> Paged<PostRecord> {
    let total = items.len() as u64;
    let items = items
        .into_iter()
        .skip(page.offset() as usize)
        .take(page.limit() as usize)
        .collect();
    Paged::new(items, page, total)
}

/// In-memory stand-in for every repository the services depend on.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn set_unhealthy(&self) {
        self.state.lock().await.unhealthy = true;
    }

    pub async fn queued_jobs(&self) -> Vec<QueuedJob> {
        self.state.lock().await.jobs.clone()
    }

    pub async fn take_jobs(&self) -> Vec<QueuedJob> {
        std::mem::take(&mut self.state.lock().await.jobs)
    }

    pub async fn post_count(&self) -> usize {
        self.state.lock().await.posts.len()
    }

    /// Overwrite timestamps so feed output is stable.
    pub async fn pin_post_times(
        &self,
        id: Uuid,
        published_at: OffsetDateTime,
        updated_at: OffsetDateTime,
    ) {
        let mut state = self.state.lock().await;
        if let Some(post) = state.posts.iter_mut().find(|post| post.id == id) {
            post.published_at = Some(published_at);
            post.created_at = published_at;
            post.updated_at = updated_at;
        }
    }

    /// Tags of a blog as `(name, slug)`, in creation order.
    pub async fn tags_of(&self, blog_id: Uuid) -> Vec<(String, String)> {
        self.state
            .lock()
            .await
            .tags
            .iter()
            .filter(|tag| tag.blog_id == blog_id)
            .map(|tag| (tag.name.clone(), tag.slug.clone()))
            .collect()
    }

    pub async fn insert_tag(&self, blog_id: Uuid, name: &str, slug: &str) {
        self.state.lock().await.tags.push(TagRecord {
            id: Uuid::new_v4(),
            blog_id,
            name: name.to_string(),
            slug: slug.to_string(),
        });
    }

    pub async fn pin_blog_times(&self, id: Uuid, at: OffsetDateTime) {
        let mut state = self.state.lock().await;
        if let Some(blog) = state.blogs.iter_mut().find(|blog| blog.id == id) {
            blog.created_at = at;
            blog.updated_at = at;
        }
    }
}

#[async_trait]
impl UsersRepo for MemoryStore {
    async fn create_user(&self, params: CreateUserParams) -> Result<UserRecord, RepoError> {
        let mut state = self.state.lock().await;
        if state.users.iter().any(|user| user.email == params.email) {
            return Err(RepoError::Duplicate {
                constraint: "users_email_key".into(),
            });
        }
        let now = OffsetDateTime::now_utc();
        let user = UserRecord {
            id: Uuid::new_v4(),
            email: params.email,
            name: params.name,
            password_hash: params.password_hash,
            created_at: now,
            updated_at: now,
        };
        state.users.push(user.clone());
        Ok(user)
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<UserRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state.users.iter().find(|user| user.email == email).cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> Result<Option<UserRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state.users.iter().find(|user| user.id == id).cloned())
    }
}

#[async_trait]
impl BlogsRepo for MemoryStore {
    async fn find_by_subdomain(&self, subdomain: &str) -> Result<Option<BlogRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state.blogs.iter().find(|blog| blog.subdomain == subdomain).cloned())
    }

    async fn find_by_custom_domain(&self, domain: &str) -> Result<Option<BlogRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .blogs
            .iter()
            .find(|blog| blog.custom_domain.as_deref() == Some(domain))
            .cloned())
    }

    async fn find_blog_by_id(&self, id: Uuid) -> Result<Option<BlogRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state.blogs.iter().find(|blog| blog.id == id).cloned())
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<BlogRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .blogs
            .iter()
            .filter(|blog| blog.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn create_blog(&self, params: CreateBlogParams) -> Result<BlogRecord, RepoError> {
        let mut state = self.state.lock().await;
        if state.blogs.iter().any(|blog| blog.subdomain == params.subdomain) {
            return Err(RepoError::Duplicate {
                constraint: "blogs_subdomain_key".into(),
            });
        }
        let now = OffsetDateTime::now_utc();
        let blog = BlogRecord {
            id: Uuid::new_v4(),
            user_id: params.user_id,
            subdomain: params.subdomain,
            title: params.title,
            meta_description: params.meta_description,
            favicon_emoji: params.favicon_emoji,
            custom_domain: params.custom_domain,
            theme: params.theme,
            post_footer_markdown: params.post_footer_markdown,
            post_footer_html: params.post_footer_html,
            no_index: params.no_index,
            primary: params.primary,
            created_at: now,
            updated_at: now,
        };
        state.blogs.push(blog.clone());
        Ok(blog)
    }

    async fn update_blog(&self, params: UpdateBlogParams) -> Result<BlogRecord, RepoError> {
        let mut state = self.state.lock().await;
        let blog = state
            .blogs
            .iter_mut()
            .find(|blog| blog.id == params.id)
            .ok_or(RepoError::NotFound)?;
        blog.subdomain = params.subdomain;
        blog.title = params.title;
        blog.meta_description = params.meta_description;
        blog.favicon_emoji = params.favicon_emoji;
        blog.custom_domain = params.custom_domain;
        blog.theme = params.theme;
        blog.post_footer_markdown = params.post_footer_markdown;
        blog.post_footer_html = params.post_footer_html;
        blog.no_index = params.no_index;
        blog.primary = params.primary;
        blog.updated_at = OffsetDateTime::now_utc();
        Ok(blog.clone())
    }
}

#[async_trait]
impl PostsRepo for MemoryStore {
    async fn list_featured(&self, blog_id: Uuid, limit: i64) -> Result<Vec<PostRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .published_posts(blog_id)
            .into_iter()
            .filter(|post| post.featured)
            .take(limit as usize)
            .collect())
    }

    async fn list_published(
        &self,
        blog_id: Uuid,
        page: PageRequest,
    ) -> Result<Paged<PostRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(page_of(state.published_posts(blog_id), page))
    }

    async fn list_published_by_tag(
        &self,
        blog_id: Uuid,
        tag_id: Uuid,
        page: PageRequest,
    ) -> Result<Paged<PostRecord>, RepoError> {
        let state = self.state.lock().await;
        let mut posts: Vec<PostRecord> = state
            .published_posts(blog_id)
            .into_iter()
            .filter(|post| {
                state
                    .taggings
                    .iter()
                    .any(|(post_id, tagged, _)| *post_id == post.id && *tagged == tag_id)
            })
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(page_of(posts, page))
    }

    async fn list_recent_published(
        &self,
        blog_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PostRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .published_posts(blog_id)
            .into_iter()
            .take(limit as usize)
            .collect())
    }

    async fn list_for_sitemap(
        &self,
        blog_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PostRecord>, RepoError> {
        let state = self.state.lock().await;
        let mut posts = state.published_posts(blog_id);
        posts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        posts.truncate(limit as usize);
        posts.extend(
            state
                .posts
                .iter()
                .filter(|post| {
                    post.blog_id == blog_id && post.published && post.kind == PostKind::Page
                })
                .cloned(),
        );
        posts.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(posts)
    }

    async fn find_published_by_slug(
        &self,
        blog_id: Uuid,
        slug: &str,
    ) -> Result<Option<PostRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .posts
            .iter()
            .find(|post| post.blog_id == blog_id && post.slug == slug && post.published)
            .map(|post| state.with_tags(post.clone())))
    }
}

#[async_trait]
impl PostsWriteRepo for MemoryStore {
    async fn list_for_author(&self, author_id: Uuid) -> Result<Vec<PostRecord>, RepoError> {
        let state = self.state.lock().await;
        let mut posts: Vec<PostRecord> = state
            .posts
            .iter()
            .filter(|post| post.author_id == author_id)
            .map(|post| state.with_tags(post.clone()))
            .collect();
        posts.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(posts)
    }

    async fn find_for_author_by_slug(
        &self,
        author_id: Uuid,
        slug: &str,
    ) -> Result<Option<PostRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .posts
            .iter()
            .find(|post| post.author_id == author_id && post.slug == slug)
            .map(|post| state.with_tags(post.clone())))
    }

    async fn find_in_blog_by_slug(
        &self,
        blog_id: Uuid,
        slug: &str,
    ) -> Result<Option<PostRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .posts
            .iter()
            .find(|post| post.blog_id == blog_id && post.slug == slug)
            .map(|post| state.with_tags(post.clone())))
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool, RepoError> {
        let state = self.state.lock().await;
        Ok(state.posts.iter().any(|post| post.slug == slug))
    }

    async fn max_slug_suffix(
        &self,
        blog_id: Uuid,
        base_slug: &str,
        exclude: Option<Uuid>,
    ) -> Result<Option<i32>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .posts
            .iter()
            .filter(|post| {
                post.blog_id == blog_id && post.base_slug == base_slug && Some(post.id) != exclude
            })
            .map(|post| post.slug_suffix)
            .max())
    }

    async fn create_post(
        &self,
        params: CreatePostParams,
        tags: &[NewTag],
    ) -> Result<PostRecord, RepoError> {
        let mut state = self.state.lock().await;
        if state
            .posts
            .iter()
            .any(|post| post.blog_id == params.blog_id && post.slug == params.slug)
        {
            return Err(RepoError::Duplicate {
                constraint: "posts_blog_id_slug_key".into(),
            });
        }
        let now = OffsetDateTime::now_utc();
        let post = PostRecord {
            id: Uuid::new_v4(),
            blog_id: params.blog_id,
            author_id: params.author_id,
            kind: params.kind,
            title: params.title,
            slug: params.slug,
            base_slug: params.base_slug,
            slug_suffix: params.slug_suffix,
            body_markdown: params.body_markdown,
            body_html: params.body_html,
            meta_description: params.meta_description,
            published: params.published,
            published_at: params.published_at,
            featured: params.featured,
            has_mermaid_diagrams: params.has_mermaid_diagrams,
            tag_list: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        // Work on a copy so a failed tag write leaves nothing behind.
        let mut next = state.clone();
        next.posts.push(post.clone());
        next.tag_post(post.id, post.blog_id, tags)?;
        *state = next;
        Ok(state.with_tags(post))
    }

    async fn update_post(
        &self,
        params: UpdatePostParams,
        tags: Option<&[NewTag]>,
    ) -> Result<PostRecord, RepoError> {
        let mut state = self.state.lock().await;
        let mut next = state.clone();
        let post = next
            .posts
            .iter_mut()
            .find(|post| post.id == params.id)
            .ok_or(RepoError::NotFound)?;
        post.title = params.title;
        post.slug = params.slug;
        post.base_slug = params.base_slug;
        post.slug_suffix = params.slug_suffix;
        post.body_markdown = params.body_markdown;
        post.body_html = params.body_html;
        post.meta_description = params.meta_description;
        post.published = params.published;
        post.published_at = params.published_at;
        post.featured = params.featured;
        post.has_mermaid_diagrams = params.has_mermaid_diagrams;
        post.updated_at = OffsetDateTime::now_utc();
        let post = post.clone();
        if let Some(tags) = tags {
            next.tag_post(post.id, post.blog_id, tags)?;
        }
        *state = next;
        Ok(state.with_tags(post))
    }

    async fn update_post_featured(
        &self,
        id: Uuid,
        featured: bool,
    ) -> Result<PostRecord, RepoError> {
        let mut state = self.state.lock().await;
        let post = state
            .posts
            .iter_mut()
            .find(|post| post.id == id)
            .ok_or(RepoError::NotFound)?;
        post.featured = featured;
        post.updated_at = OffsetDateTime::now_utc();
        let post = post.clone();
        Ok(state.with_tags(post))
    }

    async fn delete_post(&self, id: Uuid) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        state.posts.retain(|post| post.id != id);
        state.taggings.retain(|(post_id, _, _)| *post_id != id);
        Ok(())
    }
}

#[async_trait]
impl TagsRepo for MemoryStore {
    async fn list_with_counts(&self, blog_id: Uuid) -> Result<Vec<TagWithCount>, RepoError> {
        let state = self.state.lock().await;
        let mut tags = state.tag_counts(blog_id);
        tags.sort_by(|a, b| a.tag.name.to_lowercase().cmp(&b.tag.name.to_lowercase()));
        Ok(tags)
    }

    async fn list_popular(
        &self,
        blog_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TagWithCount>, RepoError> {
        let state = self.state.lock().await;
        let mut tags = state.tag_counts(blog_id);
        tags.sort_by(|a, b| {
            b.posts_count
                .cmp(&a.posts_count)
                .then(a.tag.name.to_lowercase().cmp(&b.tag.name.to_lowercase()))
        });
        tags.truncate(limit as usize);
        Ok(tags)
    }

    async fn find_tag_by_slug(
        &self,
        blog_id: Uuid,
        slug: &str,
    ) -> Result<Option<TagRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .tags
            .iter()
            .find(|tag| tag.blog_id == blog_id && tag.slug == slug)
            .cloned())
    }
}

#[async_trait]
impl TokensRepo for MemoryStore {
    async fn create_token(&self, params: CreateTokenParams) -> Result<UserTokenRecord, RepoError> {
        let mut state = self.state.lock().await;
        let record = UserTokenRecord {
            id: Uuid::new_v4(),
            user_id: params.user_id,
            name: params.name,
            token: params.token,
            expires_at: params.expires_at,
            created_at: OffsetDateTime::now_utc(),
        };
        state.tokens.push(record.clone());
        Ok(record)
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<UserTokenRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state.tokens.iter().find(|record| record.token == token).cloned())
    }

    async fn list_tokens(&self, user_id: Uuid) -> Result<Vec<UserTokenRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state
            .tokens
            .iter()
            .filter(|record| record.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn delete_token(&self, user_id: Uuid, id: Uuid) -> Result<bool, RepoError> {
        let mut state = self.state.lock().await;
        let before = state.tokens.len();
        state
            .tokens
            .retain(|record| !(record.user_id == user_id && record.id == id));
        Ok(state.tokens.len() != before)
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let mut state = self.state.lock().await;
        let before = state.tokens.len();
        state.tokens.retain(|record| record.is_active(now));
        Ok((before - state.tokens.len()) as u64)
    }
}

#[async_trait]
impl BlobsRepo for MemoryStore {
    async fn insert_blob(&self, record: BlobRecord) -> Result<(), RepoError> {
        self.state.lock().await.blobs.push(record);
        Ok(())
    }

    async fn find_blob(&self, id: Uuid) -> Result<Option<BlobRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state.blobs.iter().find(|blob| blob.id == id).cloned())
    }

    async fn find_blob_by_key(&self, key: &str) -> Result<Option<BlobRecord>, RepoError> {
        let state = self.state.lock().await;
        Ok(state.blobs.iter().find(|blob| blob.key == key).cloned())
    }

    async fn update_blob_metadata(
        &self,
        id: Uuid,
        metadata: &BlobMetadata,
    ) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        let blob = state
            .blobs
            .iter_mut()
            .find(|blob| blob.id == id)
            .ok_or(RepoError::NotFound)?;
        blob.metadata = metadata.clone();
        Ok(())
    }

    async fn update_blob_contents(
        &self,
        id: Uuid,
        byte_size: i64,
        metadata: &BlobMetadata,
    ) -> Result<(), RepoError> {
        let mut state = self.state.lock().await;
        let blob = state
            .blobs
            .iter_mut()
            .find(|blob| blob.id == id)
            .ok_or(RepoError::NotFound)?;
        blob.byte_size = byte_size;
        blob.metadata = metadata.clone();
        Ok(())
    }
}

#[async_trait]
impl JobQueue for MemoryStore {
    async fn enqueue(&self, job: QueuedJob) -> Result<(), RepoError> {
        self.state.lock().await.jobs.push(job);
        Ok(())
    }
}

#[async_trait]
impl HealthCheck for MemoryStore {
    async fn health_check(&self) -> Result<(), RepoError> {
        if self.state.lock().await.unhealthy {
            Err(RepoError::Timeout)
        } else {
            Ok(())
        }
    }
}

/// Services wired over a [`MemoryStore`] plus the router built from them.
pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub router: Router,
    pub accounts: AccountService,
    pub posts: PostWriteService,
    pub tokens: Arc<TokenService>,
    pub uploads: Arc<UploadService>,
    pub storage: Arc<UploadStorage>,
    _upload_dir: TempDir,
}

pub struct TestAppBuilder {
    per_page: u32,
    rate_limit: u32,
}

impl Default for TestAppBuilder {
    fn default() -> Self {
        Self {
            per_page: 20,
            rate_limit: 100,
        }
    }
}

impl TestAppBuilder {
    pub fn per_page(mut self, per_page: u32) -> Self {
        self.per_page = per_page;
        self
    }

    pub fn rate_limit(mut self, max_requests: u32) -> Self {
        self.rate_limit = max_requests;
        self
    }

    pub fn build(self) -> TestApp {
        let store = MemoryStore::new();
        let site = SiteContext::new(ROOT_DOMAIN);
        let renderer: Arc<dyn MarkdownRenderer> = render_service();

        let users: Arc<dyn UsersRepo> = store.clone();
        let blogs: Arc<dyn BlogsRepo> = store.clone();
        let posts_repo: Arc<dyn PostsRepo> = store.clone();
        let posts_write: Arc<dyn PostsWriteRepo> = store.clone();
        let tags: Arc<dyn TagsRepo> = store.clone();
        let tokens_repo: Arc<dyn TokensRepo> = store.clone();
        let blobs: Arc<dyn BlobsRepo> = store.clone();
        let queue: Arc<dyn JobQueue> = store.clone();
        let health: Arc<dyn HealthCheck> = store.clone();

        let upload_dir = tempfile::tempdir().expect("upload dir");
        let storage =
            Arc::new(UploadStorage::new(upload_dir.path().to_path_buf()).expect("storage"));
        let uploads = Arc::new(UploadService::new(
            blobs.clone(),
            storage.clone(),
            queue,
            UploadPolicy {
                signing_secret: SIGNING_SECRET.to_string(),
                ttl: time::Duration::minutes(5),
                public_read_acl: true,
                max_bytes: MAX_REQUEST_BYTES as u64,
            },
        ));

        let posts = PostWriteService::new(posts_write, blogs.clone(), renderer.clone());
        let accounts = AccountService::new(
            users.clone(),
            blogs.clone(),
            posts.clone(),
            renderer.clone(),
        );
        let tokens = Arc::new(TokenService::new(tokens_repo, users.clone()));

        let http = HttpState {
            blogs: Arc::new(BlogService::new(
                blogs.clone(),
                users,
                posts_repo.clone(),
                tags.clone(),
                site.clone(),
                self.per_page,
            )),
            syndication: Arc::new(SyndicationService::new(
                posts_repo.clone(),
                renderer,
                site.clone(),
            )),
            sitemap: Arc::new(SitemapService::new(posts_repo, tags, site.clone())),
            uploads: uploads.clone(),
            health,
        };
        let api = ApiState {
            tokens: tokens.clone(),
            posts: Arc::new(posts.clone()),
            domains: Arc::new(DomainValidationService::new(blogs, site.root_domain.clone())),
            uploads: uploads.clone(),
            rate_limiter: Arc::new(ApiRateLimiter::new(
                Duration::from_secs(60),
                self.rate_limit,
            )),
        };

        let router = build_app(RouterState { http, api }, MAX_REQUEST_BYTES);
        TestApp {
            store,
            router,
            accounts,
            posts,
            tokens,
            uploads,
            storage,
            _upload_dir: upload_dir,
        }
    }
}

impl TestApp {
    pub fn new() -> Self {
        TestAppBuilder::default().build()
    }

    pub fn builder() -> TestAppBuilder {
        TestAppBuilder::default()
    }

    pub fn job_context(&self) -> JobWorkerContext {
        JobWorkerContext {
            blobs: self.store.clone(),
            storage: self.storage.clone(),
            queue: self.store.clone(),
        }
    }

    pub async fn user(&self, email: &str, name: &str) -> UserRecord {
        self.accounts
            .create_user(email, name, "password123")
            .await
            .expect("create user")
    }

    pub async fn blog(&self, user: &UserRecord, subdomain: &str) -> BlogRecord {
        self.blog_with(
            user,
            BlogSettings {
                subdomain: subdomain.to_string(),
                primary: true,
                ..Default::default()
            },
        )
        .await
    }

    pub async fn blog_with(&self, user: &UserRecord, settings: BlogSettings) -> BlogRecord {
        self.accounts
            .create_blog(user, settings)
            .await
            .expect("create blog")
    }

    pub async fn token(&self, user: &UserRecord) -> String {
        self.tokens
            .issue(user, "test", None)
            .await
            .expect("issue token")
            .token
    }

    pub async fn publish(
        &self,
        user: &UserRecord,
        blog: &BlogRecord,
        title: &str,
        body: &str,
        tags: &[&str],
    ) -> PostRecord {
        self.posts
            .create(
                user,
                blog,
                PostKind::Post,
                PostInput {
                    title: Some(title.to_string()),
                    body_markdown: Some(body.to_string()),
                    published: Some(true),
                    tag_list: Some(tags.iter().map(|tag| tag.to_string()).collect()),
                    ..Default::default()
                },
            )
            .await
            .expect("publish post")
    }

    pub async fn draft(&self, user: &UserRecord, blog: &BlogRecord, title: &str) -> PostRecord {
        self.posts
            .create(
                user,
                blog,
                PostKind::Post,
                PostInput {
                    title: Some(title.to_string()),
                    published: Some(false),
                    ..Default::default()
                },
            )
            .await
            .expect("draft post")
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        self.router
            .clone()
            .oneshot(request)
            .await
            .expect("router response")
    }

    pub async fn get(&self, host: &str, uri: &str) -> Response<Body> {
        self.send(
            Request::builder()
                .uri(uri)
                .header("host", host)
                .body(Body::empty())
                .expect("request"),
        )
        .await
    }
}

pub fn blog_host(subdomain: &str) -> String {
    format!("{subdomain}.{ROOT_DOMAIN}")
}

pub async fn body_to_string(response: Response<Body>) -> String {
    let bytes = response
        .into_body()
        .collect()
        .await
        .expect("collect body")
        .to_bytes();
    String::from_utf8(bytes.to_vec()).expect("utf8 body")
}

pub async fn body_to_json(response: Response<Body>) -> serde_json::Value {
    let body = body_to_string(response).await;
    serde_json::from_str(&body).expect("json body")
}

pub fn header<'a>(response: &'a Response<Body>, name: &str) -> Option<&'a str> {
    response
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
}
