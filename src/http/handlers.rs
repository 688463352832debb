//! Route handlers.

use axum::response::IntoResponse;
use axum::Json;

/// Liveness check; never rate limited.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Demo route for checking the limiter end to end.
pub async fn rate_limited() -> impl IntoResponse {
    Json(serde_json::json!({
        "response": "This is a rate-limited response"
    }))
}
