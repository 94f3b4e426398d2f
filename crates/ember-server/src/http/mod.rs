//! HTTP surface: the boot chain (token-gated, no cookies) and the
//! operator JSON API (session-gated).

pub mod api;
pub mod boot;
pub mod files;
pub mod middleware;
pub mod routes;

use crate::auth::AuthError;
use crate::state::StateError;
use crate::store::StoreError;
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Uniform error responses for the JSON API
#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    Unauthorized,
    Forbidden,
    NotFound(&'static str),
    Conflict(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized => {
                (StatusCode::UNAUTHORIZED, "authentication required".to_string())
            }
            ApiError::Forbidden => (StatusCode::FORBIDDEN, "forbidden".to_string()),
            ApiError::NotFound(what) => (StatusCode::NOT_FOUND, format!("{} not found", what)),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error".to_string())
            }
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::InvalidMac(mac) => ApiError::BadRequest(format!("invalid MAC address: {}", mac)),
            StoreError::NotFound(what) => ApiError::NotFound(what),
            StoreError::TransitionConflict { expected, actual } => ApiError::Conflict(format!(
                "state transition failed: expected {}, got {}",
                expected, actual
            )),
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<StateError> for ApiError {
    fn from(e: StateError) -> Self {
        ApiError::BadRequest(e.to_string())
    }
}

impl From<AuthError> for ApiError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::InvalidPassword => ApiError::Forbidden,
            AuthError::EmptyPassword | AuthError::AlreadySet => ApiError::BadRequest(e.to_string()),
            AuthError::Hashing(msg) => ApiError::Internal(msg),
            AuthError::Store(e) => e.into(),
        }
    }
}

/// The request's Host, for deriving the server URL when none is pinned
pub fn request_host(headers: &HeaderMap) -> String {
    headers
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost")
        .to_string()
}

/// Validate the `tok=` query parameter against the request path.
/// Accepts everything while no signing key exists (auth not configured).
pub fn token_valid(key: Option<&[u8]>, uri: &Uri) -> bool {
    let Some(token) = crate::signer::token_from_query(uri.query()) else {
        // No token: only acceptable with auth disabled
        return key.is_none() || key.map(|k| k.is_empty()).unwrap_or(true);
    };
    crate::signer::verify_token(key, uri.path(), &token)
}
