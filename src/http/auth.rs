//! Shared-secret bearer authentication for the management API.

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::{header, HeaderMap};
use axum::middleware::Next;
use axum::response::Response;
use subtle::ConstantTimeEq;
use tracing::debug;

use super::handler::ApiError;
use crate::AppState;

/// Middleware guarding every `/api` route, including unknown ones, so the
/// answer never reveals whether a resource exists.
///
/// No bearer credential → 401 with a challenge; wrong credential → 403.
pub async fn require_bearer(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let token = bearer_token(request.headers()).ok_or(ApiError::Unauthorized)?;

    if !bool::from(token.as_bytes().ct_eq(state.api_token.as_bytes())) {
        debug!("rejected API request with mismatched bearer token");
        return Err(ApiError::Forbidden);
    }

    Ok(next.run(request).await)
}

/// The credential from `Authorization: Bearer <token>`, scheme matched
/// case-insensitively.
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}
