//! Router and management API handlers.
//!
//! Routes (all under bearer auth, see [`super::auth`]):
//! - `POST /api/repos`            - create a repository
//! - `GET  /api/repos/{id}`       - look up a repository
//! - `GET  /api/repos/{id}/hook`  - read the webhook URL
//! - `POST /api/repos/{id}/hook`  - replace the webhook URL
//!
//! Anything outside `/api` falls through to `git http-backend`.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode, Uri},
    middleware,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, instrument};

use crate::repo::{validate_name, RepoView, Repository};
use crate::webhook::target;
use crate::AppState;

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the axum [`Router`] with all HTTP routes and shared state.
pub fn create_router(state: Arc<AppState>) -> Router {
    let api = Router::new()
        .route("/repos", post(create_repo))
        .route("/repos/{id}", get(get_repo))
        .route("/repos/{id}/hook", get(get_hook).post(set_hook))
        .fallback(api_not_found)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&state),
            super::auth::require_bearer,
        ));

    Router::new()
        .nest("/api", api)
        .fallback(super::cgi::handle_git)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Request / response bodies
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct NewRepoRequest {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct Webhook {
    url: String,
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// `POST /api/repos`
#[instrument(skip_all)]
async fn create_repo(
    State(state): State<Arc<AppState>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<RepoView>, ApiError> {
    let req: NewRepoRequest = parse_json(&body)?;
    validate_name(&req.name).map_err(|e| ApiError::BadRequest(e.to_string()))?;

    let repo = state.store.create(&req.name).await?;
    Ok(Json(RepoView::new(&repo, request_host(&uri, &headers))))
}

/// `GET /api/repos/{id}`
#[instrument(skip(state, uri, headers))]
async fn get_repo(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    uri: Uri,
    headers: HeaderMap,
) -> Result<Json<RepoView>, ApiError> {
    let repo = resolve(&state, &id).await?;
    Ok(Json(RepoView::new(&repo, request_host(&uri, &headers))))
}

/// `GET /api/repos/{id}/hook`
#[instrument(skip(state))]
async fn get_hook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Webhook>, ApiError> {
    let repo = resolve(&state, &id).await?;
    let url = target::get(&repo).await.unwrap_or_default();
    Ok(Json(Webhook { url }))
}

/// `POST /api/repos/{id}/hook`
#[instrument(skip(state, body))]
async fn set_hook(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<Json<Webhook>, ApiError> {
    let repo = resolve(&state, &id).await?;
    let hook: Webhook = parse_json(&body)?;
    target::validate_url(&hook.url).map_err(ApiError::BadRequest)?;

    let url = hook.url.trim().to_string();
    target::set(&repo, &url).await?;
    Ok(Json(Webhook { url }))
}

async fn api_not_found() -> ApiError {
    ApiError::NotFound
}

// ---------------------------------------------------------------------------
// Internal helpers
// ---------------------------------------------------------------------------

async fn resolve(state: &AppState, id: &str) -> Result<Repository, ApiError> {
    state.store.resolve_by_id(id).await?.ok_or_else(|| {
        debug!(repo_id = %id, "repository not found");
        ApiError::NotFound
    })
}

/// Decode a JSON body whatever its declared content type.
fn parse_json<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Host the client used to reach us, for building clone URLs.
fn request_host<'a>(uri: &'a Uri, headers: &'a HeaderMap) -> &'a str {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.authority().map(|a| a.as_str()))
        .unwrap_or("localhost")
}

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

/// Application-level error type that maps cleanly to HTTP responses.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("missing bearer credential")]
    Unauthorized,
    #[error("invalid bearer credential")]
    Forbidden,
    #[error("not found")]
    NotFound,
    #[error("{0}")]
    BadRequest(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                [(header::WWW_AUTHENTICATE, "Bearer")],
            )
                .into_response(),
            ApiError::Forbidden => StatusCode::FORBIDDEN.into_response(),
            ApiError::NotFound => StatusCode::NOT_FOUND.into_response(),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg).into_response(),
            ApiError::Internal(err) => {
                error!(error = %format!("{err:#}"), "internal server error");
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error").into_response()
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
