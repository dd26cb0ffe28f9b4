//! HTTP handlers for the merchant API.
//!
//! Each module owns one path prefix and exposes a `*_routes()` builder that
//! the top-level router nests under `/api/v1`.

pub mod jobs;
pub mod payments;
pub mod refunds;
pub mod webhooks;

use axum::{
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::ServiceError;
use crate::ApiResponse;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Request header carrying the caller's idempotency key.
pub const IDEMPOTENCY_KEY_HEADER: &str = "Idempotency-Key";

/// Response header marking an admission served from the idempotency cache.
pub const IDEMPOTENT_REPLAY_HEADER: &str = "X-Idempotent-Replay";

/// Pulls a non-empty idempotency key out of the request headers.
pub(crate) fn idempotency_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(IDEMPOTENCY_KEY_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// 201 wrapper for a fresh admission.
pub(crate) fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::success(data))).into_response()
}

/// 201 wrapper replaying a stored admission body byte-for-byte.
///
/// The stored body is embedded as a raw JSON fragment so the replayed
/// response is identical to the one the first admission produced.
pub(crate) fn replayed_response(body: String) -> Result<Response, ServiceError> {
    let raw = serde_json::value::RawValue::from_string(body)?;
    let mut response = (StatusCode::CREATED, Json(ApiResponse::success(raw))).into_response();
    response
        .headers_mut()
        .insert(IDEMPOTENT_REPLAY_HEADER, HeaderValue::from_static("true"));
    Ok(response)
}
