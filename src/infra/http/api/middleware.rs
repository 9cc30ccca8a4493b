use axum::body::Body;
use axum::extract::{MatchedPath, State};
use axum::http::{Request, header::AUTHORIZATION};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use tracing::warn;

use crate::application::tokens::{ApiAuthError, ApiPrincipal};

use super::error::{ApiError, codes};
use super::rate_limit::Decision;
use super::state::ApiState;

pub async fn api_auth(
    State(state): State<ApiState>,
    mut request: Request<Body>,
    next: Next,
) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let principal = match state.tokens.authenticate(header).await {
        Ok(principal) => principal,
        Err(ApiAuthError::Unavailable) => {
            return ApiError::internal(codes::REPO, "token lookup failed").into_response();
        }
        Err(err) => {
            metrics::counter!("willow_api_requests_rejected_total", "reason" => "unauthorized")
                .increment(1);
            return ApiError::unauthorized()
                .with_detail(err.to_string())
                .into_response();
        }
    };

    request.extensions_mut().insert(principal.clone());
    let mut response = next.run(request).await;
    response.extensions_mut().insert(principal);
    response
}

pub async fn api_rate_limit(
    State(state): State<ApiState>,
    request: Request<Body>,
    next: Next,
) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|matched| matched.as_str().to_string())
        .unwrap_or_else(|| request.uri().path().to_string());
    let Some(principal) = request.extensions().get::<ApiPrincipal>() else {
        warn!(
            target = "willow::api::ratelimit",
            "missing principal in rate limit middleware"
        );
        return ApiError::unauthorized().into_response();
    };

    match state.rate_limiter.check(principal.token_id, &route) {
        Decision::Allowed { .. } => next.run(request).await,
        Decision::Limited { retry_after } => {
            metrics::counter!("willow_api_requests_rejected_total", "reason" => "rate_limited")
                .increment(1);
            ApiError::rate_limited(retry_after)
        }
    }
}
