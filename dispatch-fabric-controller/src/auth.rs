//! Bearer-token guard for the `/internal/workers/*` routes.
//!
//! Simplified from the teacher's `control/auth.rs` `AuthRegistry` (which
//! supports multiple auth modes and providers) down to the single
//! shared-token model the fabric's configuration surface actually
//! specifies: when no token is configured the routes are open.

use crate::state::AppState;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

pub async fn require_internal_token(
    State(state): State<AppState>,
    request: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.internal_token.as_deref() else {
        return next.run(request).await;
    };

    let provided = request
        .headers()
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));

    match provided {
        Some(token) if token == expected => next.run(request).await,
        _ => (StatusCode::UNAUTHORIZED, "missing or invalid bearer token").into_response(),
    }
}
