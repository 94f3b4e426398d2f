//! Operator JSON API
//!
//! Everything the operator surface needs: machine/image/profile/webhook
//! CRUD, the guarded state actions, catalog pulls, settings and auth.
//! Cookie-gated once a password is set (see `middleware::require_operator`).

use crate::catalog;
use crate::events::Event;
use crate::http::ApiError;
use crate::session;
use crate::state::{apply_action, OperatorAction};
use crate::store::KEY_CONFIRM_REIMAGE;
use crate::AppState;
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{info, warn};

// --- Health ---

/// GET /healthz
pub async fn healthz(State(state): State<AppState>) -> Response {
    match state.store.get_stats().await {
        Ok(stats) => Json(json!({ "status": "healthy", "stats": stats })).into_response(),
        Err(e) => {
            warn!(error = %e, "healthz stats failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "status": "error" })),
            )
                .into_response()
        }
    }
}

// --- Systems ---

pub async fn list_systems(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(Json(state.store.list_systems().await?).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CreateSystemRequest {
    pub mac: String,
    #[serde(default)]
    pub hostname: String,
}

pub async fn create_system(
    State(state): State<AppState>,
    Json(req): Json<CreateSystemRequest>,
) -> Result<Response, ApiError> {
    if req.mac.is_empty() {
        return Err(ApiError::BadRequest("MAC address is required".to_string()));
    }
    let sys = state.store.create_system(&req.mac, &req.hostname).await?;
    state.events.fire(Event::system(&sys, "discovered"));
    Ok((StatusCode::CREATED, Json(sys)).into_response())
}

#[derive(Debug, Deserialize)]
pub struct UpdateSystemRequest {
    pub mac: String,
    #[serde(default)]
    pub hostname: String,
    #[serde(default)]
    pub vars: String,
    #[serde(default)]
    pub image_id: Option<i64>,
    #[serde(default)]
    pub profile_id: Option<i64>,
}

pub async fn update_system(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateSystemRequest>,
) -> Result<Response, ApiError> {
    state.store.update_system_info(id, &req.mac, &req.hostname).await?;
    state.store.update_system_vars(id, &req.vars).await?;
    // 0 clears an assignment, same as null
    let image_id = req.image_id.filter(|id| *id != 0);
    let profile_id = req.profile_id.filter(|id| *id != 0);
    state.store.update_system_image(id, image_id).await?;
    state.store.update_system_profile(id, profile_id).await?;

    let sys = state
        .store
        .get_system(id)
        .await?
        .ok_or(ApiError::NotFound("system"))?;
    Ok(Json(sys).into_response())
}

pub async fn delete_system(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    state.store.delete_system(id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
pub struct StateActionRequest {
    pub action: OperatorAction,
}

/// POST /api/v1/systems/{id}/state runs the guarded operator transitions
pub async fn system_state_action(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<StateActionRequest>,
) -> Result<Response, ApiError> {
    let sys = state
        .store
        .get_system(id)
        .await?
        .ok_or(ApiError::NotFound("system"))?;

    let new_state = apply_action(&sys, req.action)?;
    state.store.update_system_state(id, new_state.as_str()).await?;
    state.events.fire(Event::system(&sys, new_state.as_str()));

    let sys = state
        .store
        .get_system(id)
        .await?
        .ok_or(ApiError::NotFound("system"))?;
    Ok(Json(sys).into_response())
}

// --- Images ---

pub async fn list_images(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(Json(state.store.list_images().await?).into_response())
}

pub async fn get_image(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let img = state
        .store
        .get_image(id)
        .await?
        .ok_or(ApiError::NotFound("image"))?;
    Ok(Json(img).into_response())
}

#[derive(Debug, Deserialize)]
pub struct UpdateImageRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub boot_flavor: String,
    #[serde(default)]
    pub cmdline: String,
    #[serde(default)]
    pub ipxe_script: String,
}

pub async fn update_image(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<UpdateImageRequest>,
) -> Result<Response, ApiError> {
    if req.name.is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    let boot_flavor = if req.boot_flavor.is_empty() {
        "linux"
    } else {
        req.boot_flavor.as_str()
    };
    state
        .store
        .update_image(id, &req.name, &req.description, boot_flavor, &req.cmdline, &req.ipxe_script)
        .await?;
    let img = state
        .store
        .get_image(id)
        .await?
        .ok_or(ApiError::NotFound("image"))?;
    Ok(Json(img).into_response())
}

pub async fn delete_image(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    state.store.delete_image(id).await?;
    let dir = state.config.data_dir.join("images").join(id.to_string());
    let _ = tokio::fs::remove_dir_all(dir).await;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// --- Profiles ---

pub async fn list_profiles(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(Json(state.store.list_profiles().await?).into_response())
}

pub async fn get_profile(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let p = state
        .store
        .get_profile(id)
        .await?
        .ok_or(ApiError::NotFound("profile"))?;
    Ok(Json(p).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ProfileRequest {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub os_family: String,
    #[serde(default)]
    pub config_template: String,
    #[serde(default)]
    pub kernel_params: String,
    #[serde(default)]
    pub default_vars: String,
    #[serde(default)]
    pub overlay_file: String,
    #[serde(default)]
    pub var_schema: String,
}

pub async fn create_profile(
    State(state): State<AppState>,
    Json(req): Json<ProfileRequest>,
) -> Result<Response, ApiError> {
    if req.name.is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    let id = state
        .store
        .create_profile(
            &req.name,
            &req.description,
            &req.os_family,
            &req.config_template,
            &req.kernel_params,
            &req.default_vars,
            &req.overlay_file,
            &req.var_schema,
            "",
        )
        .await?;
    let p = state
        .store
        .get_profile(id)
        .await?
        .ok_or(ApiError::NotFound("profile"))?;
    Ok((StatusCode::CREATED, Json(p)).into_response())
}

pub async fn update_profile(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ProfileRequest>,
) -> Result<Response, ApiError> {
    if req.name.is_empty() {
        return Err(ApiError::BadRequest("name is required".to_string()));
    }
    state
        .store
        .update_profile(
            id,
            &req.name,
            &req.description,
            &req.os_family,
            &req.config_template,
            &req.kernel_params,
            &req.default_vars,
            &req.overlay_file,
            &req.var_schema,
        )
        .await?;
    let p = state
        .store
        .get_profile(id)
        .await?
        .ok_or(ApiError::NotFound("profile"))?;
    Ok(Json(p).into_response())
}

pub async fn delete_profile(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    state.store.delete_profile(id).await?;
    let dir = state.config.data_dir.join("profiles").join(id.to_string());
    let _ = tokio::fs::remove_dir_all(dir).await;
    Ok(StatusCode::NO_CONTENT.into_response())
}

// --- Webhooks ---

pub async fn list_webhooks(State(state): State<AppState>) -> Result<Response, ApiError> {
    Ok(Json(state.store.list_webhooks().await?).into_response())
}

#[derive(Debug, Deserialize)]
pub struct CreateWebhookRequest {
    pub url: String,
    #[serde(default)]
    pub secret: String,
    #[serde(default)]
    pub events: String,
}

pub async fn create_webhook(
    State(state): State<AppState>,
    Json(req): Json<CreateWebhookRequest>,
) -> Result<Response, ApiError> {
    let url = req.url.trim();
    if url.is_empty() {
        return Err(ApiError::BadRequest("URL is required".to_string()));
    }
    let id = state.store.create_webhook(url, &req.secret, &req.events).await?;
    let wh = state
        .store
        .get_webhook(id)
        .await?
        .ok_or(ApiError::NotFound("webhook"))?;
    Ok((StatusCode::CREATED, Json(wh)).into_response())
}

pub async fn delete_webhook(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    state.store.delete_webhook(id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

#[derive(Debug, Deserialize)]
pub struct ToggleWebhookRequest {
    pub enabled: bool,
}

pub async fn toggle_webhook(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(req): Json<ToggleWebhookRequest>,
) -> Result<Response, ApiError> {
    state.store.set_webhook_enabled(id, req.enabled).await?;
    let wh = state
        .store
        .get_webhook(id)
        .await?
        .ok_or(ApiError::NotFound("webhook"))?;
    Ok(Json(wh).into_response())
}

/// POST /api/v1/webhooks/{id}/test does a synchronous delivery; the error
/// propagates to the operator
pub async fn test_webhook(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Response, ApiError> {
    let wh = state
        .store
        .get_webhook(id)
        .await?
        .ok_or(ApiError::NotFound("webhook"))?;
    crate::events::deliver_single(&wh, Event::test())
        .await
        .map_err(|e| ApiError::BadRequest(format!("delivery failed: {}", e)))?;
    Ok(Json(json!({ "status": "delivered" })).into_response())
}

// --- Catalog ---

#[derive(Debug, Deserialize)]
pub struct CatalogPullRequest {
    pub catalog_id: String,
    #[serde(default)]
    pub force: bool,
}

/// POST /api/v1/catalog/pull
pub async fn catalog_pull(
    State(state): State<AppState>,
    Json(req): Json<CatalogPullRequest>,
) -> Result<Response, ApiError> {
    if req.catalog_id.is_empty() {
        return Err(ApiError::BadRequest("catalog_id required".to_string()));
    }
    if state.config.catalog_url.is_empty() {
        return Err(ApiError::BadRequest("no catalog configured".to_string()));
    }

    let manifest = catalog::fetch(&state.config.catalog_url)
        .await
        .map_err(|e| ApiError::Internal(format!("fetch catalog: {}", e)))?;

    let entry = manifest
        .entries
        .into_iter()
        .find(|e| e.id == req.catalog_id)
        .ok_or(ApiError::NotFound("catalog entry"))?;

    let result = catalog::pull(&state.store, &state.config.data_dir, entry.clone(), req.force).await;

    // Profile auto-creation applies on success and on the no-op path
    if matches!(result, Ok(_) | Err(catalog::CatalogError::AlreadyPulled)) {
        if let Some(pd) = catalog::profile_data_from_entry(&entry) {
            match state.store.get_profile_by_catalog_id(&entry.id).await {
                Ok(None) => {
                    match state
                        .store
                        .create_profile(
                            &pd.name,
                            &pd.description,
                            &pd.os_family,
                            &pd.config_template,
                            &pd.kernel_params,
                            &pd.default_vars,
                            "",
                            &pd.var_schema,
                            &entry.id,
                        )
                        .await
                    {
                        Ok(_) => info!(catalog_id = %entry.id, "auto-created profile"),
                        Err(e) => warn!(catalog_id = %entry.id, error = %e, "profile auto-create failed"),
                    }
                }
                Ok(Some(_)) => {}
                Err(e) => warn!(catalog_id = %entry.id, error = %e, "profile lookup failed"),
            }
        }
    }

    match result {
        Ok(id) => {
            let img = state
                .store
                .get_image(id)
                .await?
                .ok_or(ApiError::NotFound("image"))?;
            Ok(Json(img).into_response())
        }
        Err(catalog::CatalogError::AlreadyPulled)
        | Err(catalog::CatalogError::AlreadyDownloading) => {
            Ok(StatusCode::NO_CONTENT.into_response())
        }
        Err(catalog::CatalogError::Store(e)) => Err(e.into()),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

// --- Settings ---

#[derive(Debug, Deserialize)]
pub struct ConfirmReimageRequest {
    pub value: bool,
}

pub async fn set_confirm_reimage(
    State(state): State<AppState>,
    Json(req): Json<ConfirmReimageRequest>,
) -> Result<Response, ApiError> {
    let value = if req.value { "1" } else { "0" };
    state.store.set_setting(KEY_CONFIRM_REIMAGE, value).await?;
    Ok(Json(json!({ "confirm_reimage": req.value })).into_response())
}

// --- Auth ---

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub password: String,
}

/// POST /api/v1/auth/login
pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<Response, ApiError> {
    state.auth.verify_password(&state.store, &req.password).await?;
    let key = state.auth.ensure_signing_key(&state.store).await?;
    let cookie = session::session_cookie_header(&session::create_session_value(&key));

    Ok((
        [(header::SET_COOKIE, cookie)],
        Json(json!({ "status": "ok" })),
    )
        .into_response())
}

/// POST /api/v1/auth/logout
pub async fn logout() -> Response {
    (
        [(header::SET_COOKIE, session::clear_session_cookie_header())],
        Json(json!({ "status": "ok" })),
    )
        .into_response()
}

#[derive(Debug, Deserialize)]
pub struct SetPasswordRequest {
    pub password: String,
}

pub async fn set_password(
    State(state): State<AppState>,
    Json(req): Json<SetPasswordRequest>,
) -> Result<Response, ApiError> {
    state.auth.set_password(&state.store, &req.password).await?;
    // First password set also mints the signing key
    state.auth.ensure_signing_key(&state.store).await?;
    Ok(Json(json!({ "status": "ok" })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct ChangePasswordRequest {
    pub current: String,
    pub password: String,
}

pub async fn change_password(
    State(state): State<AppState>,
    Json(req): Json<ChangePasswordRequest>,
) -> Result<Response, ApiError> {
    state
        .auth
        .change_password(&state.store, &req.current, &req.password)
        .await?;
    Ok(Json(json!({ "status": "ok" })).into_response())
}

#[derive(Debug, Deserialize)]
pub struct RemovePasswordRequest {
    pub current: String,
}

pub async fn remove_password(
    State(state): State<AppState>,
    Json(req): Json<RemovePasswordRequest>,
) -> Result<Response, ApiError> {
    state.auth.remove_password(&state.store, &req.current).await?;
    Ok(Json(json!({ "status": "ok" })).into_response())
}

/// POST /api/v1/auth/rotate-key: one step invalidates every session
/// cookie and every issued URL token
pub async fn rotate_key(State(state): State<AppState>) -> Result<Response, ApiError> {
    state.auth.rotate_signing_key(&state.store).await?;
    Ok(Json(json!({ "status": "ok" })).into_response())
}
