use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::{
    application::repos::{CreateTokenParams, RepoError, TokensRepo},
    domain::entities::UserTokenRecord,
};

use super::{PostgresRepositories, map_sqlx_error};

#[derive(sqlx::FromRow)]
struct TokenRow {
    id: Uuid,
    user_id: Uuid,
    name: String,
    token: String,
    expires_at: Option<OffsetDateTime>,
    created_at: OffsetDateTime,
}

impl From<TokenRow> for UserTokenRecord {
    fn from(row: TokenRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            token: row.token,
            expires_at: row.expires_at,
            created_at: row.created_at,
        }
    }
}

#[async_trait]
impl TokensRepo for PostgresRepositories {
    async fn create_token(&self, params: CreateTokenParams) -> Result<UserTokenRecord, RepoError> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            INSERT INTO user_tokens (id, user_id, name, token, expires_at)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING id, user_id, name, token, expires_at, created_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(params.user_id)
        .bind(&params.name)
        .bind(&params.token)
        .bind(params.expires_at)
        .fetch_one(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.into())
    }

    async fn find_by_token(&self, token: &str) -> Result<Option<UserTokenRecord>, RepoError> {
        let row = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT id, user_id, name, token, expires_at, created_at
            FROM user_tokens
            WHERE token = $1
            "#,
        )
        .bind(token)
        .fetch_optional(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(row.map(UserTokenRecord::from))
    }

    async fn list_tokens(&self, user_id: Uuid) -> Result<Vec<UserTokenRecord>, RepoError> {
        let rows = sqlx::query_as::<_, TokenRow>(
            r#"
            SELECT id, user_id, name, token, expires_at, created_at
            FROM user_tokens
            WHERE user_id = $1
            ORDER BY created_at DESC
            "#,
        )
        .bind(user_id)
        .fetch_all(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(rows.into_iter().map(UserTokenRecord::from).collect())
    }

    async fn delete_token(&self, user_id: Uuid, id: Uuid) -> Result<bool, RepoError> {
        let result = sqlx::query("DELETE FROM user_tokens WHERE id = $1 AND user_id = $2")
            .bind(id)
            .bind(user_id)
            .execute(self.pool())
            .await
            .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() > 0)
    }

    async fn purge_expired(&self, now: OffsetDateTime) -> Result<u64, RepoError> {
        let result = sqlx::query(
            "DELETE FROM user_tokens WHERE expires_at IS NOT NULL AND expires_at <= $1",
        )
        .bind(now)
        .execute(self.pool())
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }
}
