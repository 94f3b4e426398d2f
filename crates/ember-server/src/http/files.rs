//! Signed artifact serving: image files, profile overlays, rendered
//! installer configs, and the provisioning callback.

use crate::http::{request_host, token_valid, ApiError};
use crate::profiles::{build_vars, render_config_template, TemplateVars};
use crate::store::Transition;
use crate::AppState;
use axum::body::Body;
use axum::extract::{Path as AxumPath, State};
use axum::http::{header, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::path::Path;
use tokio_util::io::ReaderStream;
use tracing::warn;

/// Reduce a requested filename to its base name; dot segments are out
fn safe_file_name(name: &str) -> Option<String> {
    let base = Path::new(name).file_name()?.to_string_lossy().to_string();
    if base == "." || base == ".." {
        return None;
    }
    Some(base)
}

async fn stream_file(path: &Path) -> Response {
    match tokio::fs::File::open(path).await {
        Ok(file) => {
            let stream = ReaderStream::new(file);
            (
                [(header::CONTENT_TYPE, "application/octet-stream")],
                Body::from_stream(stream),
            )
                .into_response()
        }
        Err(_) => (StatusCode::NOT_FOUND, "file not found").into_response(),
    }
}

async fn require_token(state: &AppState, uri: &Uri) -> Result<(), ApiError> {
    let key = state.signing_key().await;
    if token_valid(key.as_deref(), uri) {
        Ok(())
    } else {
        Err(ApiError::Forbidden)
    }
}

/// GET /images/{id}/file/{name}?tok=…
pub async fn serve_image_file(
    State(state): State<AppState>,
    AxumPath((id, name)): AxumPath<(i64, String)>,
    uri: Uri,
) -> Result<Response, ApiError> {
    require_token(&state, &uri).await?;

    let name = safe_file_name(&name).ok_or(ApiError::BadRequest("invalid filename".to_string()))?;
    let path = state
        .config
        .data_dir
        .join("images")
        .join(id.to_string())
        .join(name);
    Ok(stream_file(&path).await)
}

/// GET /profiles/{id}/overlay/{name}?tok=…
pub async fn serve_overlay_file(
    State(state): State<AppState>,
    AxumPath((id, name)): AxumPath<(i64, String)>,
    uri: Uri,
) -> Result<Response, ApiError> {
    require_token(&state, &uri).await?;

    let name = safe_file_name(&name).ok_or(ApiError::BadRequest("invalid filename".to_string()))?;
    let path = state
        .config
        .data_dir
        .join("profiles")
        .join(id.to_string())
        .join(name);
    Ok(stream_file(&path).await)
}

/// GET /config/{id}?tok=… serves the per-machine installer config
pub async fn serve_config(
    State(state): State<AppState>,
    AxumPath(id): AxumPath<i64>,
    headers: HeaderMap,
    uri: Uri,
) -> Result<Response, ApiError> {
    require_token(&state, &uri).await?;

    let sys = state
        .store
        .get_system(id)
        .await?
        .ok_or(ApiError::NotFound("system"))?;
    let profile_id = sys.profile_id.ok_or(ApiError::NotFound("profile"))?;
    let profile = state
        .store
        .get_profile(profile_id)
        .await?
        .ok_or(ApiError::NotFound("profile"))?;

    let server_url = state.server_url(&request_host(&headers));
    let key = state.signing_key().await;

    let vars = build_vars(&profile.default_vars, &sys.vars)
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let tv = TemplateVars {
        MAC: sys.mac.clone(),
        Hostname: sys.hostname.clone(),
        IP: sys.ip_addr.clone(),
        SystemID: sys.id,
        ImageID: sys.image_id.unwrap_or_default(),
        ServerURL: server_url.clone(),
        ConfigURL: crate::signer::sign_url(key.as_deref(), &format!("{}/config/{}", server_url, sys.id)),
        CallbackURL: crate::signer::sign_url(
            key.as_deref(),
            &format!("{}/api/v1/systems/{}/callback", server_url, sys.mac),
        ),
        Vars: vars,
    };

    let rendered = render_config_template(&profile.config_template, &tv)
        .map_err(|e| ApiError::Internal(format!("template render error: {}", e)))?;

    Ok(([(header::CONTENT_TYPE, "text/plain")], rendered).into_response())
}

/// POST /api/v1/systems/{mac}/callback?tok=… is how the installer reports
/// completion. Idempotent: an already-ready machine answers ok again
/// without a second event.
pub async fn callback(
    State(state): State<AppState>,
    AxumPath(mac): AxumPath<String>,
    uri: Uri,
) -> Result<Response, ApiError> {
    require_token(&state, &uri).await?;

    if mac.is_empty() {
        return Err(ApiError::BadRequest("MAC address required".to_string()));
    }

    let transition = state
        .store
        .transition_system_state(&mac, "provisioning", "ready")
        .await?;

    if transition == Transition::Applied {
        match state.store.get_system_by_mac(&mac).await {
            Ok(Some(sys)) => state.events.fire(crate::events::Event::system(&sys, "ready")),
            Ok(None) => {}
            Err(e) => warn!(mac = %mac, error = %e, "callback system re-read failed"),
        }
    }

    Ok(Json(json!({ "status": "ok" })).into_response())
}
