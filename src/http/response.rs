//! Response bodies and rate limit headers.

use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::ratelimit::Decision;

/// Requests left in the current window.
pub const X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
/// Maximum requests per window.
pub const X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
/// Epoch second at which the window ends.
pub const X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");
/// Per-request correlation id.
pub const X_REQUEST_ID: HeaderName = HeaderName::from_static("x-request-id");

/// JSON body of every error response: `{"data": ..., "error": "<status>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub data: String,
    pub error: String,
}

/// Build an error response with the status code echoed in the body.
pub fn error_response(status: StatusCode, message: &str) -> Response {
    let body = ErrorBody {
        data: message.to_string(),
        error: status.as_u16().to_string(),
    };
    (status, Json(body)).into_response()
}

/// 429 for a caller over its budget.
pub fn rate_limited() -> Response {
    error_response(StatusCode::TOO_MANY_REQUESTS, "You hit the rate limit")
}

/// 503 for a fail-closed limiter whose store is down.
pub fn limiter_unavailable() -> Response {
    error_response(StatusCode::SERVICE_UNAVAILABLE, "Rate limiter unavailable")
}

/// 401 for missing or rejected credentials.
pub fn unauthorized() -> Response {
    let mut response = error_response(StatusCode::UNAUTHORIZED, "Unauthorized access");
    response.headers_mut().insert(
        axum::http::header::WWW_AUTHENTICATE,
        HeaderValue::from_static("Basic realm=\"Authentication Required\""),
    );
    response
}

/// 500 for failures that are bugs rather than runtime conditions.
pub fn internal_error() -> Response {
    error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error")
}

/// Attach the `X-RateLimit-*` headers for `decision`.
pub fn apply_rate_headers(headers: &mut HeaderMap, decision: &Decision) {
    headers.insert(X_RATELIMIT_REMAINING, HeaderValue::from(decision.remaining));
    headers.insert(X_RATELIMIT_LIMIT, HeaderValue::from(decision.limit));
    headers.insert(X_RATELIMIT_RESET, HeaderValue::from(decision.reset_at));
}
