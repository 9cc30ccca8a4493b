use std::sync::Arc;

use subtle::ConstantTimeEq;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::application::repos::{CreateTokenParams, RepoError, TokensRepo, UsersRepo};
use crate::domain::entities::{UserRecord, UserTokenRecord};
use crate::domain::error::ValidationErrors;
use crate::domain::tokens::{TOKEN_LENGTH, extract_bearer, generate_token, validate_new_token};

#[derive(Debug, Error)]
pub enum TokenError {
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error("token is invalid: {0}")]
    Validation(ValidationErrors),
    #[error("token not found")]
    NotFound,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ApiAuthError {
    #[error("missing api token")]
    Missing,
    #[error("invalid api token")]
    Invalid,
    #[error("expired api token")]
    Expired,
    #[error("token lookup failed")]
    Unavailable,
}

/// The user behind a request's bearer token.
#[derive(Debug, Clone)]
pub struct ApiPrincipal {
    pub user: UserRecord,
    pub token_id: Uuid,
}

#[derive(Clone)]
pub struct TokenService {
    tokens: Arc<dyn TokensRepo>,
    users: Arc<dyn UsersRepo>,
}

impl TokenService {
    pub fn new(tokens: Arc<dyn TokensRepo>, users: Arc<dyn UsersRepo>) -> Self {
        Self { tokens, users }
    }

    pub async fn issue(
        &self,
        user: &UserRecord,
        name: &str,
        expires_at: Option<OffsetDateTime>,
    ) -> Result<UserTokenRecord, TokenError> {
        let name = name.trim();
        validate_new_token(name, expires_at, OffsetDateTime::now_utc())
            .into_result()
            .map_err(TokenError::Validation)?;

        let record = self
            .tokens
            .create_token(CreateTokenParams {
                user_id: user.id,
                name: name.to_string(),
                token: generate_token(),
                expires_at,
            })
            .await?;

        tracing::info!(
            target = "willow::application::tokens",
            user_id = %user.id,
            token_id = %record.id,
            "Issued API token"
        );
        Ok(record)
    }

    pub async fn list(&self, user: &UserRecord) -> Result<Vec<UserTokenRecord>, TokenError> {
        Ok(self.tokens.list_tokens(user.id).await?)
    }

    pub async fn revoke(&self, user: &UserRecord, id: Uuid) -> Result<(), TokenError> {
        if self.tokens.delete_token(user.id, id).await? {
            Ok(())
        } else {
            Err(TokenError::NotFound)
        }
    }

    /// Resolve the user behind an `Authorization` header value.
    pub async fn authenticate(&self, header: Option<&str>) -> Result<ApiPrincipal, ApiAuthError> {
        let token = header.and_then(extract_bearer).ok_or(ApiAuthError::Missing)?;
        if token.len() != TOKEN_LENGTH {
            return Err(ApiAuthError::Invalid);
        }

        let record = self
            .tokens
            .find_by_token(token)
            .await
            .map_err(|_| ApiAuthError::Unavailable)?
            .ok_or(ApiAuthError::Invalid)?;
        if record.token.as_bytes().ct_eq(token.as_bytes()).unwrap_u8() == 0 {
            return Err(ApiAuthError::Invalid);
        }
        if !record.is_active(OffsetDateTime::now_utc()) {
            return Err(ApiAuthError::Expired);
        }

        let user = self
            .users
            .find_user_by_id(record.user_id)
            .await
            .map_err(|_| ApiAuthError::Unavailable)?
            .ok_or(ApiAuthError::Invalid)?;
        Ok(ApiPrincipal {
            user,
            token_id: record.id,
        })
    }

    /// Remove tokens whose expiry has passed. Returns how many were deleted.
    pub async fn purge_expired(&self) -> Result<u64, TokenError> {
        Ok(self.tokens.purge_expired(OffsetDateTime::now_utc()).await?)
    }
}
