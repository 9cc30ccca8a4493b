use async_trait::async_trait;
use sqlx::PgConnection;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{NewTag, RepoError, TagsRepo},
    domain::{
        entities::{TagRecord, TagWithCount},
        slug::{MAX_TAG_SLUG_ATTEMPTS, SequencedSlug, same_tag_name},
    },
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct TagRow {
    id: Uuid,
    blog_id: Uuid,
    name: String,
    slug: String,
}

impl From<TagRow> for TagRecord {
    fn from(row: TagRow) -> Self {
        Self {
            id: row.id,
            blog_id: row.blog_id,
            name: row.name,
            slug: row.slug,
        }
    }
}

#[derive(sqlx::FromRow)]
struct TagCountRow {
    id: Uuid,
    blog_id: Uuid,
    name: String,
    slug: String,
    posts_count: i64,
    last_updated_at: Option<OffsetDateTime>,
}

impl From<TagCountRow> for TagWithCount {
    fn from(row: TagCountRow) -> Self {
        Self {
            tag: TagRecord {
                id: row.id,
                blog_id: row.blog_id,
                name: row.name,
                slug: row.slug,
            },
            posts_count: row.posts_count,
            last_updated_at: row.last_updated_at,
        }
    }
}

const TAG_COUNTS_QUERY: &str = r#"
    SELECT t.id, t.blog_id, t.name, t.slug,
           COUNT(p.id) AS posts_count,
           MAX(p.updated_at) AS last_updated_at
    FROM tags t
    JOIN taggings tg ON tg.tag_id = t.id
    JOIN posts p ON p.id = tg.post_id AND p.published AND p.kind = 'post'
    WHERE t.blog_id = $1
    GROUP BY t.id, t.blog_id, t.name, t.slug
"#;

#[async_trait]
impl TagsRepo for PostgresRepositories {
    async fn list_with_counts(&self, blog_id: Uuid) -> Result<Vec<TagWithCount>, RepoError> {
        let rows = sqlx::query_as::<_, TagCountRow>(&format!(
            "{TAG_COUNTS_QUERY} ORDER BY LOWER(t.name), t.slug"
        ))
        .bind(blog_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(TagWithCount::from).collect())
    }

    async fn list_popular(
        &self,
        blog_id: Uuid,
        limit: i64,
    ) -> Result<Vec<TagWithCount>, RepoError> {
        let rows = sqlx::query_as::<_, TagCountRow>(&format!(
            "{TAG_COUNTS_QUERY} ORDER BY posts_count DESC, LOWER(t.name) LIMIT $2"
        ))
        .bind(blog_id)
        .bind(limit)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(TagWithCount::from).collect())
    }

    async fn find_tag_by_slug(
        &self,
        blog_id: Uuid,
        slug: &str,
    ) -> Result<Option<TagRecord>, RepoError> {
        let row = sqlx::query_as::<_, TagRow>(
            "SELECT id, blog_id, name, slug FROM tags WHERE blog_id = $1 AND slug = $2",
        )
        .bind(blog_id)
        .bind(slug)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(TagRecord::from))
    }
}

/// Find or create `tag` inside the caller's transaction and return its id.
///
/// A tag whose name matches case-insensitively is reused. When the slug belongs to a
/// differently named tag (`C++` and `C#` both slug to `c`) the next suffix is tried.
pub(super) async fn ensure_tag(
    conn: &mut PgConnection,
    blog_id: Uuid,
    tag: &NewTag,
) -> Result<Uuid, RepoError> {
    for attempt in 1..=MAX_TAG_SLUG_ATTEMPTS {
        let slug = SequencedSlug {
            base: tag.slug.clone(),
            suffix: attempt,
        }
        .slug();

        let inserted: Option<Uuid> = sqlx::query_scalar(
            r#"
            INSERT INTO tags (id, blog_id, name, slug)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (blog_id, slug) DO NOTHING
            RETURNING id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(blog_id)
        .bind(&tag.name)
        .bind(&slug)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
        if let Some(id) = inserted {
            return Ok(id);
        }

        let existing = sqlx::query_as::<_, TagRow>(
            "SELECT id, blog_id, name, slug FROM tags WHERE blog_id = $1 AND slug = $2",
        )
        .bind(blog_id)
        .bind(&slug)
        .fetch_optional(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
        if let Some(row) = existing
            && same_tag_name(&row.name, &tag.name)
        {
            return Ok(row.id);
        }
    }

    Err(RepoError::Integrity {
        message: format!("no free slug for tag `{}`", tag.name),
    })
}

/// Replace the taggings of `post_id` with `tags`, in order, inside the caller's transaction.
pub(super) async fn tag_post(
    conn: &mut PgConnection,
    post_id: Uuid,
    blog_id: Uuid,
    tags: &[NewTag],
) -> Result<(), RepoError> {
    sqlx::query("DELETE FROM taggings WHERE post_id = $1")
        .bind(post_id)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;

    for (position, tag) in tags.iter().enumerate() {
        let position = i32::try_from(position).map_err(|_| RepoError::InvalidInput {
            message: "too many tags".to_string(),
        })?;
        let tag_id = ensure_tag(&mut *conn, blog_id, tag).await?;
        sqlx::query(
            r#"
            INSERT INTO taggings (post_id, tag_id, position)
            VALUES ($1, $2, $3)
            ON CONFLICT (post_id, tag_id) DO NOTHING
            "#,
        )
        .bind(post_id)
        .bind(tag_id)
        .bind(position)
        .execute(&mut *conn)
        .await
        .map_err(map_sqlx_error)?;
    }
    Ok(())
}
