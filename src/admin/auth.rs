use axum::{
    extract::{Request, State},
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::http::error::ApiError;
use crate::http::server::AppState;

/// Require `Authorization: Bearer {admin.api_key}`.
pub async fn admin_auth_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Response {
    let expected = &state.config.admin.api_key;

    let presented = request
        .headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match presented {
        Some(key) if !expected.is_empty() && key == expected => next.run(request).await,
        _ => ApiError::Unauthorized.into_response(),
    }
}
