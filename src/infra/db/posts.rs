use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::{
        pagination::{PageRequest, Paged},
        repos::{
            CreatePostParams, NewTag, PostsRepo, PostsWriteRepo, RepoError, UpdatePostParams,
        },
    },
    domain::{entities::PostRecord, types::PostKind},
};

use super::{PostgresRepositories, map_sqlx_error, tags::tag_post};

/// Columns selected for every post query; `p` aliases `posts`.
const POST_COLUMNS: &str = r#"
    p.id, p.blog_id, p.author_id, p.kind, p.title, p.slug, p.base_slug, p.slug_suffix,
    p.body_markdown, p.body_html, p.meta_description, p.published, p.published_at,
    p.featured, p.has_mermaid_diagrams, p.created_at, p.updated_at,
    COALESCE(
        (SELECT array_agg(t.name ORDER BY tg.position, t.name)
         FROM taggings tg
         JOIN tags t ON t.id = tg.tag_id
         WHERE tg.post_id = p.id),
        ARRAY[]::TEXT[]
    ) AS tag_list
"#;

#[derive(sqlx::FromRow)]
struct PostRow {
    id: Uuid,
    blog_id: Uuid,
    author_id: Uuid,
    kind: String,
    title: String,
    slug: String,
    base_slug: String,
    slug_suffix: i32,
    body_markdown: Option<String>,
    body_html: Option<String>,
    meta_description: Option<String>,
    published: bool,
    published_at: Option<OffsetDateTime>,
    featured: bool,
    has_mermaid_diagrams: bool,
    created_at: OffsetDateTime,
    updated_at: OffsetDateTime,
    tag_list: Vec<String>,
}

impl TryFrom<PostRow> for PostRecord {
    type Error = RepoError;

    fn try_from(row: PostRow) -> Result<Self, Self::Error> {
        let kind = PostKind::try_from(row.kind.as_str()).map_err(|_| RepoError::Integrity {
            message: format!("unknown post kind `{}`", row.kind),
        })?;

        Ok(Self {
            id: row.id,
            blog_id: row.blog_id,
            author_id: row.author_id,
            kind,
            title: row.title,
            slug: row.slug,
            base_slug: row.base_slug,
            slug_suffix: row.slug_suffix,
            body_markdown: row.body_markdown,
            body_html: row.body_html,
            meta_description: row.meta_description,
            published: row.published,
            published_at: row.published_at,
            featured: row.featured,
            has_mermaid_diagrams: row.has_mermaid_diagrams,
            tag_list: row.tag_list,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

fn into_records(rows: Vec<PostRow>) -> Result<Vec<PostRecord>, RepoError> {
    rows.into_iter().map(PostRecord::try_from).collect()
}

fn into_record(row: Option<PostRow>) -> Result<Option<PostRecord>, RepoError> {
    row.map(PostRecord::try_from).transpose()
}

fn total_from(count: i64) -> u64 {
    u64::try_from(count).unwrap_or_default()
}

impl PostgresRepositories {
    async fn fetch_post(&self, id: Uuid) -> Result<PostRecord, RepoError> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts p WHERE p.id = $1"
        ))
        .bind(id)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        into_record(row)?.ok_or(RepoError::NotFound)
    }
}

#[async_trait]
impl PostsRepo for PostgresRepositories {
    async fn list_featured(&self, blog_id: Uuid, limit: i64) -> Result<Vec<PostRecord>, RepoError> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            SELECT {POST_COLUMNS}
            FROM posts p
            WHERE p.blog_id = $1 AND p.published AND p.featured AND p.kind = 'post'
            ORDER BY p.published_at DESC, p.created_at DESC
            LIMIT $2
            "#
        ))
        .bind(blog_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        into_records(rows)
    }

    async fn list_published(
        &self,
        blog_id: Uuid,
        page: PageRequest,
    ) -> Result<Paged<PostRecord>, RepoError> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM posts
            WHERE blog_id = $1 AND published AND kind = 'post'
            "#,
        )
        .bind(blog_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let rows = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            SELECT {POST_COLUMNS}
            FROM posts p
            WHERE p.blog_id = $1 AND p.published AND p.kind = 'post'
            ORDER BY p.published_at DESC, p.created_at DESC, p.id DESC
            LIMIT $2 OFFSET $3
            "#
        ))
        .bind(blog_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(Paged::new(into_records(rows)?, page, total_from(total)))
    }

    async fn list_published_by_tag(
        &self,
        blog_id: Uuid,
        tag_id: Uuid,
        page: PageRequest,
    ) -> Result<Paged<PostRecord>, RepoError> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM posts p
            JOIN taggings tg ON tg.post_id = p.id
            WHERE p.blog_id = $1 AND tg.tag_id = $2 AND p.published AND p.kind = 'post'
            "#,
        )
        .bind(blog_id)
        .bind(tag_id)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        let rows = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            SELECT {POST_COLUMNS}
            FROM posts p
            JOIN taggings tagged ON tagged.post_id = p.id
            WHERE p.blog_id = $1 AND tagged.tag_id = $2 AND p.published AND p.kind = 'post'
            ORDER BY p.created_at DESC, p.id DESC
            LIMIT $3 OFFSET $4
            "#
        ))
        .bind(blog_id)
        .bind(tag_id)
        .bind(page.limit())
        .bind(page.offset())
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(Paged::new(into_records(rows)?, page, total_from(total)))
    }

    async fn list_recent_published(
        &self,
        blog_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PostRecord>, RepoError> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            SELECT {POST_COLUMNS}
            FROM posts p
            WHERE p.blog_id = $1 AND p.published AND p.kind = 'post'
            ORDER BY p.published_at DESC, p.created_at DESC
            LIMIT $2
            "#
        ))
        .bind(blog_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        into_records(rows)
    }

    async fn list_for_sitemap(
        &self,
        blog_id: Uuid,
        limit: i64,
    ) -> Result<Vec<PostRecord>, RepoError> {
        // The limit applies to posts only; every published page is listed.
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            (SELECT {POST_COLUMNS}
             FROM posts p
             WHERE p.blog_id = $1 AND p.published AND p.kind = 'post'
             ORDER BY p.updated_at DESC
             LIMIT $2)
            UNION ALL
            (SELECT {POST_COLUMNS}
             FROM posts p
             WHERE p.blog_id = $1 AND p.published AND p.kind = 'page')
            ORDER BY updated_at DESC
            "#
        ))
        .bind(blog_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        into_records(rows)
    }

    async fn find_published_by_slug(
        &self,
        blog_id: Uuid,
        slug: &str,
    ) -> Result<Option<PostRecord>, RepoError> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            SELECT {POST_COLUMNS}
            FROM posts p
            WHERE p.blog_id = $1 AND p.slug = $2 AND p.published
            "#
        ))
        .bind(blog_id)
        .bind(slug)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        into_record(row)
    }
}

#[async_trait]
impl PostsWriteRepo for PostgresRepositories {
    async fn list_for_author(&self, author_id: Uuid) -> Result<Vec<PostRecord>, RepoError> {
        let rows = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            SELECT {POST_COLUMNS}
            FROM posts p
            WHERE p.author_id = $1
            ORDER BY p.created_at DESC, p.id DESC
            "#
        ))
        .bind(author_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        into_records(rows)
    }

    async fn find_for_author_by_slug(
        &self,
        author_id: Uuid,
        slug: &str,
    ) -> Result<Option<PostRecord>, RepoError> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            r#"
            SELECT {POST_COLUMNS}
            FROM posts p
            WHERE p.author_id = $1 AND p.slug = $2
            ORDER BY p.created_at
            LIMIT 1
            "#
        ))
        .bind(author_id)
        .bind(slug)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        into_record(row)
    }

    async fn find_in_blog_by_slug(
        &self,
        blog_id: Uuid,
        slug: &str,
    ) -> Result<Option<PostRecord>, RepoError> {
        let row = sqlx::query_as::<_, PostRow>(&format!(
            "SELECT {POST_COLUMNS} FROM posts p WHERE p.blog_id = $1 AND p.slug = $2"
        ))
        .bind(blog_id)
        .bind(slug)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        into_record(row)
    }

    async fn slug_exists(&self, slug: &str) -> Result<bool, RepoError> {
        sqlx::query_scalar::<_, bool>("SELECT EXISTS (SELECT 1 FROM posts WHERE slug = $1)")
            .bind(slug)
            .fetch_one(self.pool())
            .await
            .map_err(map_sqlx_error)
    }

    async fn max_slug_suffix(
        &self,
        blog_id: Uuid,
        base_slug: &str,
        exclude: Option<Uuid>,
    ) -> Result<Option<i32>, RepoError> {
        sqlx::query_scalar::<_, Option<i32>>(
            r#"
            SELECT MAX(slug_suffix)
            FROM posts
            WHERE blog_id = $1
              AND base_slug = $2
              AND ($3::UUID IS NULL OR id <> $3)
            "#,
        )
        .bind(blog_id)
        .bind(base_slug)
        .bind(exclude)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)
    }

    async fn create_post(
        &self,
        params: CreatePostParams,
        tags: &[NewTag],
    ) -> Result<PostRecord, RepoError> {
        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;

        let id: Uuid = sqlx::query_scalar(
            r#"
            INSERT INTO posts (
                id, blog_id, author_id, kind, title, slug, base_slug, slug_suffix,
                body_markdown, body_html, meta_description, published, published_at,
                featured, has_mermaid_diagrams
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15)
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(params.blog_id)
        .bind(params.author_id)
        .bind(params.kind.as_str())
        .bind(&params.title)
        .bind(&params.slug)
        .bind(&params.base_slug)
        .bind(params.slug_suffix)
        .bind(&params.body_markdown)
        .bind(&params.body_html)
        .bind(&params.meta_description)
        .bind(params.published)
        .bind(params.published_at)
        .bind(params.featured)
        .bind(params.has_mermaid_diagrams)
        .fetch_one(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if !tags.is_empty() {
            tag_post(&mut *tx, id, params.blog_id, tags).await?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        self.fetch_post(id).await
    }

    async fn update_post(
        &self,
        params: UpdatePostParams,
        tags: Option<&[NewTag]>,
    ) -> Result<PostRecord, RepoError> {
        let mut tx = self.pool().begin().await.map_err(map_sqlx_error)?;

        let blog_id: Option<Uuid> = sqlx::query_scalar(
            r#"
            UPDATE posts
            SET title = $2,
                slug = $3,
                base_slug = $4,
                slug_suffix = $5,
                body_markdown = $6,
                body_html = $7,
                meta_description = $8,
                published = $9,
                published_at = $10,
                featured = $11,
                has_mermaid_diagrams = $12,
                updated_at = now()
            WHERE id = $1
            RETURNING blog_id
            "#,
        )
        .bind(params.id)
        .bind(&params.title)
        .bind(&params.slug)
        .bind(&params.base_slug)
        .bind(params.slug_suffix)
        .bind(&params.body_markdown)
        .bind(&params.body_html)
        .bind(&params.meta_description)
        .bind(params.published)
        .bind(params.published_at)
        .bind(params.featured)
        .bind(params.has_mermaid_diagrams)
        .fetch_optional(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;
        let blog_id = blog_id.ok_or(RepoError::NotFound)?;

        if let Some(tags) = tags {
            tag_post(&mut *tx, params.id, blog_id, tags).await?;
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        self.fetch_post(params.id).await
    }

    async fn update_post_featured(
        &self,
        id: Uuid,
        featured: bool,
    ) -> Result<PostRecord, RepoError> {
        let result =
            sqlx::query("UPDATE posts SET featured = $2, updated_at = now() WHERE id = $1")
                .bind(id)
                .bind(featured)
                .execute(self.pool())
                .await
                .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        self.fetch_post(id).await
    }

    async fn delete_post(&self, id: Uuid) -> Result<(), RepoError> {
        let result = sqlx::query("DELETE FROM posts WHERE id = $1")
            .bind(id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}
