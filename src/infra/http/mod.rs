pub mod api;
mod middleware;
mod public;
mod uploads;

pub use api::rate_limit::ApiRateLimiter;
pub use api::{ApiState, build_api_router};
pub use public::{CurrentBlog, HttpState, Tenant, build_router};
pub use uploads::build_uploads_router;

use axum::Router;
use axum::extract::FromRef;
use axum::http::StatusCode;
use axum::middleware as axum_middleware;
use axum::response::{IntoResponse, Response};

use crate::application::error::{ErrorReport, HttpError};
use crate::application::repos::RepoError;

fn health_response(result: Result<(), RepoError>) -> Response {
    match result {
        Ok(()) => (StatusCode::OK, "OK").into_response(),
        Err(err) => {
            let mut response = (StatusCode::SERVICE_UNAVAILABLE, "Unavailable").into_response();
            ErrorReport::from_error(
                "infra::http::health",
                StatusCode::SERVICE_UNAVAILABLE,
                &err,
            )
            .attach(&mut response);
            response
        }
    }
}

/// Public pages only read, so a repository failure is either a miss, a slow database or a bug.
pub fn repo_error_to_http(source: &'static str, err: RepoError) -> HttpError {
    let (status, public_message) = match &err {
        RepoError::NotFound => (StatusCode::NOT_FOUND, "Not found"),
        RepoError::Timeout => (StatusCode::SERVICE_UNAVAILABLE, "Service unavailable"),
        _ => (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error"),
    };
    HttpError::from_error(source, status, public_message, &err)
}

#[derive(Clone)]
pub struct RouterState {
    pub http: HttpState,
    pub api: ApiState,
}

impl FromRef<RouterState> for HttpState {
    fn from_ref(state: &RouterState) -> Self {
        state.http.clone()
    }
}

impl FromRef<RouterState> for ApiState {
    fn from_ref(state: &RouterState) -> Self {
        state.api.clone()
    }
}

/// The complete application: public blogs, uploads and the token API behind request logging.
pub fn build_app(state: RouterState, max_request_bytes: usize) -> Router {
    build_api_router(state.clone())
        .merge(build_uploads_router(max_request_bytes))
        .merge(build_router())
        .with_state(state)
        .layer(axum_middleware::from_fn(middleware::log_responses))
        .layer(axum_middleware::from_fn(middleware::assign_request_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn health_response_reports_database_state() {
        assert_eq!(health_response(Ok(())).status(), StatusCode::OK);
        let failed = health_response(Err(RepoError::Timeout));
        assert_eq!(failed.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(failed.extensions().get::<ErrorReport>().is_some());
    }

    #[test]
    fn repo_errors_map_to_statuses() {
        let err = repo_error_to_http("test", RepoError::NotFound);
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        let err = repo_error_to_http("test", RepoError::Timeout);
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);
        let err = repo_error_to_http("test", RepoError::Persistence("boom".into()));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
