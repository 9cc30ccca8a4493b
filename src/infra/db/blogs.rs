use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{BlogsRepo, CreateBlogParams, RepoError, UpdateBlogParams},
    domain::entities::BlogRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct BlogRow {
    id: Uuid,
    user_id: Uuid,
    subdomain: String,
    title: Option<String>,
    meta_description: Option<String>,
    favicon_emoji: Option<String>,
    custom_domain: Option<String>,
    theme: String,
    post_footer_markdown: Option<String>,
    post_footer_html: Option<String>,
    no_index: bool,
    is_primary: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
}

impl From<BlogRow> for BlogRecord {
    fn from(row: BlogRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            subdomain: row.subdomain,
            title: row.title,
            meta_description: row.meta_description,
            favicon_emoji: row.favicon_emoji,
            custom_domain: row.custom_domain,
            theme: row.theme,
            post_footer_markdown: row.post_footer_markdown,
            post_footer_html: row.post_footer_html,
            no_index: row.no_index,
            primary: row.is_primary,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

const BLOG_COLUMNS: &str = "id, user_id, subdomain, title, meta_description, favicon_emoji, \
    custom_domain, theme, post_footer_markdown, post_footer_html, no_index, is_primary, \
    created_at, updated_at";

impl PostgresRepositories {
    async fn find_blog_where(
        &self,
        column: &'static str,
        value: &str,
    ) -> Result<Option<BlogRecord>, RepoError> {
        let row = sqlx::query_as::<_, BlogRow>(&format!(
            "SELECT {BLOG_COLUMNS} FROM blogs WHERE {column} = $1"
        ))
        .bind(value)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(BlogRecord::from))
    }
}

#[async_trait]
impl BlogsRepo for PostgresRepositories {
    async fn find_by_subdomain(&self, subdomain: &str) -> Result<Option<BlogRecord>, RepoError> {
        self.find_blog_where("subdomain", subdomain).await
    }

    async fn find_by_custom_domain(&self, domain: &str) -> Result<Option<BlogRecord>, RepoError> {
        self.find_blog_where("custom_domain", domain).await
    }

    async fn find_blog_by_id(&self, id: Uuid) -> Result<Option<BlogRecord>, RepoError> {
        let row = sqlx::query_as::<_, BlogRow>(&format!(
            "SELECT {BLOG_COLUMNS} FROM blogs WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(BlogRecord::from))
    }

    async fn list_for_user(&self, user_id: Uuid) -> Result<Vec<BlogRecord>, RepoError> {
        let rows = sqlx::query_as::<_, BlogRow>(&format!(
            "SELECT {BLOG_COLUMNS} FROM blogs WHERE user_id = $1 ORDER BY created_at, id"
        ))
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(BlogRecord::from).collect())
    }

    async fn create_blog(&self, params: CreateBlogParams) -> Result<BlogRecord, RepoError> {
        let row = sqlx::query_as::<_, BlogRow>(&format!(
            "INSERT INTO blogs (id, user_id, subdomain, title, meta_description, favicon_emoji, \
                 custom_domain, theme, post_footer_markdown, post_footer_html, no_index, is_primary) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12) \
             RETURNING {BLOG_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(params.user_id)
        .bind(&params.subdomain)
        .bind(&params.title)
        .bind(&params.meta_description)
        .bind(&params.favicon_emoji)
        .bind(&params.custom_domain)
        .bind(&params.theme)
        .bind(&params.post_footer_markdown)
        .bind(&params.post_footer_html)
        .bind(params.no_index)
        .bind(params.primary)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn update_blog(&self, params: UpdateBlogParams) -> Result<BlogRecord, RepoError> {
        let row = sqlx::query_as::<_, BlogRow>(&format!(
            "UPDATE blogs SET subdomain = $2, title = $3, meta_description = $4, \
                 favicon_emoji = $5, custom_domain = $6, theme = $7, \
                 post_footer_markdown = $8, post_footer_html = $9, no_index = $10, \
                 is_primary = $11, updated_at = now() \
             WHERE id = $1 \
             RETURNING {BLOG_COLUMNS}"
        ))
        .bind(params.id)
        .bind(&params.subdomain)
        .bind(&params.title)
        .bind(&params.meta_description)
        .bind(&params.favicon_emoji)
        .bind(&params.custom_domain)
        .bind(&params.theme)
        .bind(&params.post_footer_markdown)
        .bind(&params.post_footer_html)
        .bind(params.no_index)
        .bind(params.primary)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }
}
