use std::error::Error as StdError;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use thiserror::Error;

use crate::infra::error::InfraError;

/// Diagnostic payload carried in response extensions for the logging middleware.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub status: StatusCode,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, status: StatusCode, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self {
            source,
            status,
            messages,
        }
    }

    pub fn from_message(
        source: &'static str,
        status: StatusCode,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source,
            status,
            messages: vec![message.into()],
        }
    }

    pub fn attach(self, response: &mut Response) {
        response.extensions_mut().insert(self);
    }
}

/// Plain-text failure for the public blog surface.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    public_message: &'static str,
    report: ErrorReport,
}

impl HttpError {
    pub fn new(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            status,
            public_message,
            report: ErrorReport::from_message(source, status, detail),
        }
    }

    pub fn from_error(
        source: &'static str,
        status: StatusCode,
        public_message: &'static str,
        error: &dyn StdError,
    ) -> Self {
        Self {
            status,
            public_message,
            report: ErrorReport::from_error(source, status, error),
        }
    }

    pub fn internal(source: &'static str, error: &dyn StdError) -> Self {
        Self::from_error(
            source,
            StatusCode::INTERNAL_SERVER_ERROR,
            "Internal server error",
            error,
        )
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let mut response = (self.status, self.public_message).into_response();
        self.report.attach(&mut response);
        response
    }
}

/// Failure of a CLI command or of server bootstrap.
#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("record not found")]
    NotFound,
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("{0}")]
    Unexpected(String),
}

impl AppError {
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// sysexits(3) codes so scripts driving the CLI can tell bad input from an outage.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Validation(_) => 65,
            AppError::NotFound => 66,
            AppError::Infra(InfraError::Database { .. } | InfraError::Jobs { .. }) => 69,
            AppError::Infra(InfraError::Configuration { .. }) => 78,
            AppError::Infra(_) | AppError::Unexpected(_) => 1,
        }
    }
}
