//! Author-side post and page writes.
//!
//! Every save re-renders the body, recomputes the mermaid flag and settles the
//! slug before anything is persisted. Slugs are sequenced per blog from the
//! highest suffix already in use for the same base.

use std::sync::Arc;

use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::markdown_io::{FrontmatterError, parse_markdown_document, post_to_markdown};
use crate::application::render::MarkdownRenderer;
use crate::application::repos::{
    BlogsRepo, CreatePostParams, NewTag, PostsWriteRepo, RepoError, UpdatePostParams,
};
use crate::domain::entities::{BlogRecord, PostRecord, UserRecord};
use crate::domain::error::ValidationErrors;
use crate::domain::posts::{PostAttributes, PostInput, UNTITLED_TITLE, slug_needs_regeneration};
use crate::domain::slug::{SequencedSlug, base_slug_for_title, derive_slug, tag_slug};
use crate::domain::types::PostKind;

const ABOUT_TITLE: &str = "About";
const ABOUT_SLUG: &str = "about";
const MAX_SLUG_ATTEMPTS: i32 = 50;

#[derive(Debug, Error)]
pub enum PostWriteError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("{0}")]
    Validation(ValidationErrors),
    #[error("post not found")]
    NotFound,
    #[error("post belongs to another author")]
    Forbidden,
    #[error("user has no blog to post to")]
    NoBlog,
    #[error(transparent)]
    Frontmatter(#[from] FrontmatterError),
    #[error("could not find a free slug for `{0}`")]
    SlugExhausted(String),
}

impl From<ValidationErrors> for PostWriteError {
    fn from(errors: ValidationErrors) -> Self {
        Self::Validation(errors)
    }
}

#[derive(Clone)]
pub struct PostWriteService {
    posts: Arc<dyn PostsWriteRepo>,
    blogs: Arc<dyn BlogsRepo>,
    renderer: Arc<dyn MarkdownRenderer>,
}

impl PostWriteService {
    pub fn new(
        posts: Arc<dyn PostsWriteRepo>,
        blogs: Arc<dyn BlogsRepo>,
        renderer: Arc<dyn MarkdownRenderer>,
    ) -> Self {
        Self {
            posts,
            blogs,
            renderer,
        }
    }

    pub async fn list(&self, user: &UserRecord) -> Result<Vec<PostRecord>, PostWriteError> {
        Ok(self.posts.list_for_author(user.id).await?)
    }

    /// Look a post up by slug for `user`. Slugs owned by someone else are `Forbidden`.
    pub async fn get(&self, user: &UserRecord, slug: &str) -> Result<PostRecord, PostWriteError> {
        if let Some(post) = self.posts.find_for_author_by_slug(user.id, slug).await? {
            return Ok(post);
        }
        if self.posts.slug_exists(slug).await? {
            Err(PostWriteError::Forbidden)
        } else {
            Err(PostWriteError::NotFound)
        }
    }

    pub async fn find_in_blog(
        &self,
        blog: &BlogRecord,
        slug: &str,
    ) -> Result<PostRecord, PostWriteError> {
        self.posts
            .find_in_blog_by_slug(blog.id, slug)
            .await?
            .ok_or(PostWriteError::NotFound)
    }

    /// Pick the target blog: the named subdomain, else the primary blog, else the oldest.
    pub async fn blog_for(
        &self,
        user: &UserRecord,
        subdomain: Option<&str>,
    ) -> Result<BlogRecord, PostWriteError> {
        let blogs = self.blogs.list_for_user(user.id).await?;
        let chosen = match subdomain.map(str::trim).filter(|s| !s.is_empty()) {
            Some(wanted) => {
                let wanted = wanted.to_ascii_lowercase();
                blogs.into_iter().find(|blog| blog.subdomain == wanted)
            }
            None => {
                let primary = blogs.iter().position(|blog| blog.primary);
                match primary {
                    Some(index) => blogs.into_iter().nth(index),
                    None => blogs.into_iter().next(),
                }
            }
        };
        chosen.ok_or(PostWriteError::NoBlog)
    }

    pub async fn create(
        &self,
        author: &UserRecord,
        blog: &BlogRecord,
        kind: PostKind,
        input: PostInput,
    ) -> Result<PostRecord, PostWriteError> {
        let mut attrs = PostAttributes::default().apply(&input);
        attrs.stamp_publication(OffsetDateTime::now_utc());
        attrs.validate().into_result()?;

        let slug = self
            .allocate_slug(blog.id, input.slug.as_deref(), &attrs.title, None)
            .await?;
        let body_html = self.render(&attrs);
        let has_mermaid_diagrams = attrs.has_mermaid_diagrams();
        let tags = new_tags(&attrs.tag_list);

        let post = self
            .posts
            .create_post(
                CreatePostParams {
                    blog_id: blog.id,
                    author_id: author.id,
                    kind,
                    title: attrs.title,
                    slug: slug.slug(),
                    base_slug: slug.base,
                    slug_suffix: slug.suffix,
                    body_markdown: attrs.body_markdown,
                    body_html,
                    meta_description: attrs.meta_description,
                    published: attrs.published,
                    published_at: attrs.published_at,
                    featured: attrs.featured,
                    has_mermaid_diagrams,
                },
                &tags,
            )
            .await?;

        tracing::info!(
            target = "willow::application::posts",
            post_id = %post.id,
            blog_id = %blog.id,
            slug = %post.slug,
            kind = kind.as_str(),
            "Created post"
        );
        Ok(post)
    }

    pub async fn update(
        &self,
        post: &PostRecord,
        input: PostInput,
    ) -> Result<PostRecord, PostWriteError> {
        let current = PostAttributes {
            title: post.title.clone(),
            body_markdown: post.body_markdown.clone(),
            meta_description: post.meta_description.clone(),
            published: post.published,
            published_at: post.published_at,
            featured: post.featured,
            tag_list: post.tag_list.clone(),
        };
        let mut attrs = current.apply(&input);
        attrs.stamp_publication(OffsetDateTime::now_utc());
        attrs.validate().into_result()?;

        let explicit_slug = input
            .slug
            .as_deref()
            .map(str::trim)
            .filter(|slug| !slug.is_empty() && *slug != post.slug);
        // A retitled draft keeps its slot when the new title parameterizes to the same base.
        let regenerate = explicit_slug.is_none()
            && slug_needs_regeneration(&post.title, &attrs.title, post.published)
            && base_slug_for_title(&attrs.title) != post.base_slug;
        let (slug, base_slug, slug_suffix) = if explicit_slug.is_some() || regenerate {
            let allocated = self
                .allocate_slug(post.blog_id, explicit_slug, &attrs.title, Some(post.id))
                .await?;
            (allocated.slug(), allocated.base, allocated.suffix)
        } else {
            (post.slug.clone(), post.base_slug.clone(), post.slug_suffix)
        };

        let body_html = self.render(&attrs);
        let has_mermaid_diagrams = attrs.has_mermaid_diagrams();
        let tags = input.tag_list.is_some().then(|| new_tags(&attrs.tag_list));

        let updated = self
            .posts
            .update_post(
                UpdatePostParams {
                    id: post.id,
                    title: attrs.title,
                    slug,
                    base_slug,
                    slug_suffix,
                    body_markdown: attrs.body_markdown,
                    body_html,
                    meta_description: attrs.meta_description,
                    published: attrs.published,
                    published_at: attrs.published_at,
                    featured: attrs.featured,
                    has_mermaid_diagrams,
                },
                tags.as_deref(),
            )
            .await?;
        Ok(updated)
    }

    pub async fn destroy(&self, post: &PostRecord) -> Result<(), PostWriteError> {
        self.posts.delete_post(post.id).await?;
        tracing::info!(target = "willow::application::posts", post_id = %post.id, "Deleted post");
        Ok(())
    }

    pub async fn toggle_featured(&self, post: &PostRecord) -> Result<PostRecord, PostWriteError> {
        let mut updated = self.posts.update_post_featured(post.id, !post.featured).await?;
        updated.tag_list = post.tag_list.clone();
        Ok(updated)
    }

    /// Draft placeholder used when an author starts a new post from scratch.
    pub async fn create_untitled(
        &self,
        author: &UserRecord,
        blog: &BlogRecord,
    ) -> Result<PostRecord, PostWriteError> {
        let input = PostInput {
            title: Some(UNTITLED_TITLE.to_string()),
            published: Some(false),
            ..Default::default()
        };
        self.create(author, blog, PostKind::Post, input).await
    }

    /// Every blog starts with an unpublished About page owned by the blog's user.
    pub async fn create_about_page(&self, blog: &BlogRecord) -> Result<PostRecord, PostWriteError> {
        let input = PostInput {
            title: Some(ABOUT_TITLE.to_string()),
            slug: Some(ABOUT_SLUG.to_string()),
            ..Default::default()
        };
        let mut attrs = PostAttributes::default().apply(&input);
        attrs.stamp_publication(OffsetDateTime::now_utc());
        let slug = self
            .allocate_slug(blog.id, input.slug.as_deref(), &attrs.title, None)
            .await?;

        Ok(self
            .posts
            .create_post(
                CreatePostParams {
                    blog_id: blog.id,
                    author_id: blog.user_id,
                    kind: PostKind::Page,
                    title: attrs.title,
                    slug: slug.slug(),
                    base_slug: slug.base,
                    slug_suffix: slug.suffix,
                    body_markdown: None,
                    body_html: None,
                    meta_description: None,
                    published: false,
                    published_at: None,
                    featured: false,
                    has_mermaid_diagrams: false,
                },
                &[],
            )
            .await?)
    }

    pub async fn import_markdown(
        &self,
        author: &UserRecord,
        blog: &BlogRecord,
        text: &str,
    ) -> Result<PostRecord, PostWriteError> {
        let imported = parse_markdown_document(text)?;
        if let Some(problem) = imported.problems.first() {
            let mut errors = PostAttributes::default().apply(&imported.input).validate();
            for problem in &imported.problems {
                errors.add_base(problem.to_string());
            }
            tracing::warn!(
                target = "willow::application::posts",
                error = %problem,
                "Rejected markdown import"
            );
            return Err(PostWriteError::Validation(errors));
        }
        self.create(author, blog, PostKind::Post, imported.input).await
    }

    /// Apply a markdown document to an existing post.
    pub async fn update_from_markdown(
        &self,
        post: &PostRecord,
        text: &str,
    ) -> Result<PostRecord, PostWriteError> {
        let imported = parse_markdown_document(text)?;
        if !imported.problems.is_empty() {
            let mut errors = ValidationErrors::new();
            for problem in &imported.problems {
                errors.add_base(problem.to_string());
            }
            return Err(PostWriteError::Validation(errors));
        }
        self.update(post, imported.input).await
    }

    pub fn export_markdown(&self, post: &PostRecord) -> Result<String, PostWriteError> {
        Ok(post_to_markdown(post)?)
    }

    fn render(&self, attrs: &PostAttributes) -> Option<String> {
        attrs
            .body_markdown
            .as_deref()
            .and_then(|markdown| self.renderer.render_markdown(markdown))
    }

    async fn allocate_slug(
        &self,
        blog_id: Uuid,
        requested: Option<&str>,
        title: &str,
        exclude: Option<Uuid>,
    ) -> Result<SequencedSlug, PostWriteError> {
        let base = requested
            .and_then(|slug| derive_slug(slug).ok())
            .unwrap_or_else(|| base_slug_for_title(title));
        let max = self.posts.max_slug_suffix(blog_id, &base, exclude).await?;
        let mut candidate = SequencedSlug::next(base, max);

        // An explicit slug such as `hello-2` can collide with the sequence of `hello`.
        for _ in 0..MAX_SLUG_ATTEMPTS {
            match self.posts.find_in_blog_by_slug(blog_id, &candidate.slug()).await? {
                Some(existing) if Some(existing.id) != exclude => {
                    candidate.suffix = candidate.suffix.max(1) + 1;
                }
                _ => return Ok(candidate),
            }
        }
        Err(PostWriteError::SlugExhausted(candidate.base))
    }
}

fn new_tags(names: &[String]) -> Vec<NewTag> {
    names
        .iter()
        .map(|name| NewTag {
            slug: tag_slug(name),
            name: name.clone(),
        })
        .collect()
}
