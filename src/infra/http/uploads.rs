//! Signed direct-upload target and stored file serving.

use axum::{
    Router,
    body::{Body, Bytes},
    extract::{DefaultBodyLimit, Path, Query, State},
    http::{
        HeaderValue, StatusCode,
        header::{CACHE_CONTROL, CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE},
    },
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::Deserialize;

use crate::{
    application::uploads::{ServedBlob, UploadError},
    domain::{types::ImageVariant, uploads::UploadSignature},
};

use super::{RouterState, api::error::ApiError, public::HttpState};

const STORED_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

pub fn build_uploads_router(max_request_bytes: usize) -> Router<RouterState> {
    Router::new()
        .route(
            "/uploads/direct/{key}",
            put(receive_upload).layer(DefaultBodyLimit::max(max_request_bytes)),
        )
        .route("/uploads/{key}", get(serve_upload))
}

#[derive(Debug, Default, Deserialize)]
struct VariantQuery {
    #[serde(default)]
    variant: Option<ImageVariant>,
}

async fn receive_upload(
    State(state): State<HttpState>,
    Path(key): Path<String>,
    Query(signature): Query<UploadSignature>,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    state.uploads.receive_upload(&key, &signature, body).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn serve_upload(
    State(state): State<HttpState>,
    Path(key): Path<String>,
    Query(query): Query<VariantQuery>,
) -> Response {
    match state.uploads.serve(&key, query.variant).await {
        Ok(blob) => stored_response(blob),
        Err(UploadError::NotFound) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => ApiError::from(err).into_response(),
    }
}

fn stored_response(blob: ServedBlob) -> Response {
    let length = blob.bytes.len();
    let mut response = Response::new(Body::from(blob.bytes));
    let headers = response.headers_mut();
    if let Ok(value) = HeaderValue::from_str(&blob.content_type) {
        headers.insert(CONTENT_TYPE, value);
    }
    if let Ok(value) = HeaderValue::from_str(&length.to_string()) {
        headers.insert(CONTENT_LENGTH, value);
    }
    let disposition = format!(
        "inline; filename=\"{}\"",
        blob.filename.replace(['"', '\\', '\r', '\n'], "_")
    );
    if let Ok(value) = HeaderValue::from_str(&disposition) {
        headers.insert(CONTENT_DISPOSITION, value);
    }
    headers.insert(CACHE_CONTROL, HeaderValue::from_static(STORED_CACHE_CONTROL));
    response
}
