//! Read-side service for public blog pages.

use std::sync::Arc;

use thiserror::Error;

use crate::application::pagination::{PageRequest, Paged};
use crate::application::repos::{BlogsRepo, PostsRepo, RepoError, TagsRepo, UsersRepo};
use crate::application::site::SiteContext;
use crate::domain::entities::{BlogRecord, PostRecord, TagRecord, TagWithCount, UserRecord};
use crate::domain::hosts::HostResolution;

const FEATURED_LIMIT: i64 = 3;

#[derive(Debug, Error)]
pub enum BlogError {
    #[error("no blog is served from `{0}`")]
    UnknownHost(String),
    #[error("blog owner `{0}` is missing")]
    MissingOwner(uuid::Uuid),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

/// A resolved blog together with its owner, who is the author shown in chrome and feeds.
#[derive(Debug, Clone)]
pub struct BlogContext {
    pub blog: BlogRecord,
    pub owner: UserRecord,
}

#[derive(Debug, Clone)]
pub enum HostTarget {
    Root,
    Blog(Box<BlogContext>),
}

#[derive(Debug, Clone)]
pub struct HomePage {
    pub featured: Vec<PostRecord>,
    pub posts: Paged<PostRecord>,
}

#[derive(Debug, Clone)]
pub struct TagPage {
    pub tag: TagRecord,
    pub posts: Paged<PostRecord>,
}

#[derive(Clone)]
pub struct BlogService {
    blogs: Arc<dyn BlogsRepo>,
    users: Arc<dyn UsersRepo>,
    posts: Arc<dyn PostsRepo>,
    tags: Arc<dyn TagsRepo>,
    site: SiteContext,
    per_page: u32,
}

impl BlogService {
    pub fn new(
        blogs: Arc<dyn BlogsRepo>,
        users: Arc<dyn UsersRepo>,
        posts: Arc<dyn PostsRepo>,
        tags: Arc<dyn TagsRepo>,
        site: SiteContext,
        per_page: u32,
    ) -> Self {
        Self {
            blogs,
            users,
            posts,
            tags,
            site,
            per_page,
        }
    }

    pub fn site(&self) -> &SiteContext {
        &self.site
    }

    pub async fn resolve(&self, host: &str) -> Result<HostTarget, BlogError> {
        let blog = match self.site.resolve(host) {
            HostResolution::Root => return Ok(HostTarget::Root),
            HostResolution::Subdomain(subdomain) => self.blogs.find_by_subdomain(&subdomain).await?,
            HostResolution::CustomDomain(domain) => {
                self.blogs.find_by_custom_domain(&domain).await?
            }
        };
        let blog = blog.ok_or_else(|| BlogError::UnknownHost(host.to_string()))?;
        let owner = self
            .users
            .find_user_by_id(blog.user_id)
            .await?
            .ok_or(BlogError::MissingOwner(blog.user_id))?;

        Ok(HostTarget::Blog(Box::new(BlogContext { blog, owner })))
    }

    pub async fn home(&self, blog: &BlogRecord, page: Option<u32>) -> Result<HomePage, BlogError> {
        let featured = self.posts.list_featured(blog.id, FEATURED_LIMIT).await?;
        let posts = self
            .posts
            .list_published(blog.id, PageRequest::new(page, self.per_page))
            .await?;
        Ok(HomePage { featured, posts })
    }

    pub async fn post(&self, blog: &BlogRecord, slug: &str) -> Result<Option<PostRecord>, BlogError> {
        Ok(self.posts.find_published_by_slug(blog.id, slug).await?)
    }

    pub async fn tags(&self, blog: &BlogRecord) -> Result<Vec<TagWithCount>, BlogError> {
        Ok(self.tags.list_with_counts(blog.id).await?)
    }

    /// `None` when the tag does not exist; callers send the visitor home.
    pub async fn tag(
        &self,
        blog: &BlogRecord,
        slug: &str,
        page: Option<u32>,
    ) -> Result<Option<TagPage>, BlogError> {
        let Some(tag) = self.tags.find_tag_by_slug(blog.id, slug).await? else {
            return Ok(None);
        };
        let posts = self
            .posts
            .list_published_by_tag(blog.id, tag.id, PageRequest::new(page, self.per_page))
            .await?;
        Ok(Some(TagPage { tag, posts }))
    }
}
