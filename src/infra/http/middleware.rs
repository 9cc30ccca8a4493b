use std::time::Instant;

use axum::{
    body::Body,
    http::{HeaderValue, Request, StatusCode, header::HOST},
    middleware::Next,
    response::Response,
};
use uuid::Uuid;

use crate::application::{error::ErrorReport, tokens::ApiPrincipal};

const REQUEST_ID_HEADER: &str = "x-request-id";

/// Per-request id, echoed back in `x-request-id`.
#[derive(Debug, Clone)]
pub struct RequestId(pub Uuid);

pub async fn assign_request_id(mut request: Request<Body>, next: Next) -> Response {
    let id = RequestId(Uuid::new_v4());
    request.extensions_mut().insert(id.clone());

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id.0.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// What the access log knows about a finished request.
struct Outcome {
    status: StatusCode,
    method: String,
    host: String,
    path: String,
    elapsed_ms: u128,
    request_id: String,
    user_id: String,
    source: &'static str,
    messages: Vec<String>,
}

impl Outcome {
    fn detail(&self) -> &str {
        self.messages
            .first()
            .map(String::as_str)
            .unwrap_or("no diagnostic available")
    }

    fn emit(&self) {
        if self.status.is_server_error() {
            tracing::error!(
                target = "willow::http::response",
                status = self.status.as_u16(),
                method = %self.method,
                host = %self.host,
                path = %self.path,
                elapsed_ms = self.elapsed_ms,
                request_id = %self.request_id,
                user_id = %self.user_id,
                source = self.source,
                detail = self.detail(),
                chain = ?self.messages,
                "request failed",
            );
        } else if self.status.is_client_error() {
            tracing::warn!(
                target = "willow::http::response",
                status = self.status.as_u16(),
                method = %self.method,
                host = %self.host,
                path = %self.path,
                elapsed_ms = self.elapsed_ms,
                request_id = %self.request_id,
                user_id = %self.user_id,
                source = self.source,
                detail = self.detail(),
                "request rejected",
            );
        } else {
            tracing::debug!(
                target = "willow::http::response",
                status = self.status.as_u16(),
                method = %self.method,
                host = %self.host,
                path = %self.path,
                elapsed_ms = self.elapsed_ms,
                request_id = %self.request_id,
                "request served",
            );
        }
    }
}

/// Access log: successes at `debug`, 4xx at `warn`, 5xx at `error` with the handler's `ErrorReport`.
pub async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let started = Instant::now();
    let method = request.method().to_string();
    let path = request.uri().path().to_string();
    let host = request
        .headers()
        .get(HOST)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let request_id = request
        .extensions()
        .get::<RequestId>()
        .map(|id| id.0.to_string())
        .unwrap_or_default();

    let mut response = next.run(request).await;

    let (source, messages) = response
        .extensions_mut()
        .remove::<ErrorReport>()
        .map(|report| (report.source, report.messages))
        .unwrap_or(("unknown", Vec::new()));
    // The API auth layer copies the principal onto its responses.
    let user_id = response
        .extensions()
        .get::<ApiPrincipal>()
        .map(|principal| principal.user.id.to_string())
        .unwrap_or_default();

    Outcome {
        status: response.status(),
        method,
        host,
        path,
        elapsed_ms: started.elapsed().as_millis(),
        request_id,
        user_id,
        source,
        messages,
    }
    .emit();

    response
}
