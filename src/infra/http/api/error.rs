use axum::Json;
use axum::http::{HeaderValue, StatusCode, header::RETRY_AFTER};
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::application::error::ErrorReport;
use crate::application::posts::PostWriteError;
use crate::application::repos::RepoError;
use crate::application::uploads::UploadError;
use crate::domain::error::ValidationErrors;

pub mod codes {
    pub const BAD_REQUEST: &str = "bad_request";
    pub const UNAUTHORIZED: &str = "unauthorized";
    pub const FORBIDDEN: &str = "forbidden";
    pub const NOT_FOUND: &str = "not_found";
    pub const RATE_LIMITED: &str = "rate_limited";
    pub const VALIDATION: &str = "validation_failed";
    pub const DUPLICATE: &str = "duplicate";
    pub const DB_TIMEOUT: &str = "db_timeout";
    pub const REPO: &str = "repo_error";
    pub const UPLOAD: &str = "upload_error";
}

/// JSON error bodies: `{"error": "..."}` or `{"errors": [...]}` for validation failures.
#[derive(Debug, Serialize)]
#[serde(untagged)]
pub enum ApiErrorBody {
    Message { error: String },
    Validation { errors: Vec<String> },
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    body: ApiErrorBody,
    detail: Option<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            body: ApiErrorBody::Message {
                error: message.into(),
            },
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, codes::BAD_REQUEST, message)
    }

    pub fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, codes::UNAUTHORIZED, "Unauthorized")
    }

    pub fn forbidden() -> Self {
        Self::new(
            StatusCode::FORBIDDEN,
            codes::FORBIDDEN,
            "You don't have permission to access this post",
        )
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, codes::NOT_FOUND, message)
    }

    pub fn validation(errors: &ValidationErrors) -> Self {
        Self {
            status: StatusCode::UNPROCESSABLE_ENTITY,
            code: codes::VALIDATION,
            body: ApiErrorBody::Validation {
                errors: errors.full_messages(),
            },
            detail: None,
        }
    }

    pub fn internal(code: &'static str, detail: impl Into<String>) -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            code,
            "Internal server error",
        )
        .with_detail(detail)
    }

    pub fn rate_limited(retry_after: u64) -> Response {
        let body = ApiErrorBody::Message {
            error: "Rate limit exceeded".to_string(),
        };
        let mut response = (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            response.headers_mut().insert(RETRY_AFTER, value);
        }
        ErrorReport::from_message(
            "infra::http::api::rate_limit",
            StatusCode::TOO_MANY_REQUESTS,
            format!("{}: retry_after={retry_after}", codes::RATE_LIMITED),
        )
        .attach(&mut response);
        response
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let summary = match &self.body {
            ApiErrorBody::Message { error } => error.clone(),
            ApiErrorBody::Validation { errors } => errors.join("; "),
        };
        let detail = self.detail.unwrap_or(summary);
        let mut response = (self.status, Json(self.body)).into_response();
        ErrorReport::from_message(
            "infra::http::api",
            self.status,
            format!("{}: {detail}", self.code),
        )
        .attach(&mut response);
        response
    }
}

impl From<RepoError> for ApiError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::NotFound => ApiError::not_found("Not found"),
            RepoError::Duplicate { constraint } => {
                ApiError::new(StatusCode::CONFLICT, codes::DUPLICATE, "Duplicate record")
                    .with_detail(constraint)
            }
            RepoError::InvalidInput { message } => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, codes::VALIDATION, "Invalid input")
                    .with_detail(message)
            }
            RepoError::Timeout => ApiError::new(
                StatusCode::SERVICE_UNAVAILABLE,
                codes::DB_TIMEOUT,
                "Database timeout",
            ),
            other => ApiError::internal(codes::REPO, other.to_string()),
        }
    }
}

impl From<PostWriteError> for ApiError {
    fn from(err: PostWriteError) -> Self {
        match err {
            PostWriteError::Validation(errors) => ApiError::validation(&errors),
            PostWriteError::NotFound => ApiError::not_found("Post not found"),
            PostWriteError::Forbidden => ApiError::forbidden(),
            PostWriteError::NoBlog => {
                let mut errors = ValidationErrors::new();
                errors.add("blog", "must exist");
                ApiError::validation(&errors)
            }
            PostWriteError::Frontmatter(err) => {
                let mut errors = ValidationErrors::new();
                errors.add_base(err.to_string());
                ApiError::validation(&errors)
            }
            PostWriteError::SlugExhausted(base) => {
                let mut errors = ValidationErrors::new();
                errors.add("slug", "has already been taken");
                ApiError::validation(&errors).with_detail(format!("slug space exhausted for `{base}`"))
            }
            PostWriteError::Repo(err) => err.into(),
        }
    }
}

impl From<UploadError> for ApiError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Validation(errors) => ApiError::validation(&errors),
            UploadError::Signature(err) => {
                ApiError::new(StatusCode::FORBIDDEN, codes::FORBIDDEN, "Upload link is not valid")
                    .with_detail(err.to_string())
            }
            UploadError::NotFound => ApiError::not_found("Blob not found"),
            err @ UploadError::SizeMismatch { .. } => {
                ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, codes::UPLOAD, err.to_string())
            }
            UploadError::Repo(err) => err.into(),
            UploadError::Storage(err) => ApiError::internal(codes::UPLOAD, err.to_string()),
        }
    }
}
