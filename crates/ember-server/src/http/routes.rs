//! Route table
//!
//! Two surfaces share one router: the boot chain (no cookies, some
//! endpoints token-gated) and the operator JSON API under `/api/v1`
//! (session-gated once a password exists).

use crate::http::{api, boot, files, middleware};
use crate::AppState;
use axum::middleware::from_fn_with_state;
use axum::routing::{delete, get, post, put};
use axum::Router;
use tower_http::catch_panic::CatchPanicLayer;
use tower_http::trace::TraceLayer;

/// Build the full application router
pub fn router(state: AppState) -> Router {
    // Machine-facing: no cookie auth anywhere on these
    let boot_chain = Router::new()
        .route("/boot.ipxe", get(boot::boot_script))
        .route("/ipxe.efi", get(boot::serve_ipxe_efi))
        .route("/ipxe-arm64.efi", get(boot::serve_ipxe_arm64))
        .route("/undionly.kpxe", get(boot::serve_undionly))
        .route("/images/{id}/file/{name}", get(files::serve_image_file))
        .route("/profiles/{id}/overlay/{name}", get(files::serve_overlay_file))
        .route("/config/{id}", get(files::serve_config))
        .route("/api/v1/systems/{id}/callback", post(files::callback))
        .route("/api/v1/auth/login", post(api::login))
        .route("/api/v1/auth/logout", post(api::logout))
        .route("/healthz", get(api::healthz));

    // Operator API, session-gated once auth is configured
    let operator = Router::new()
        .route("/systems", get(api::list_systems).post(api::create_system))
        .route("/systems/{id}", put(api::update_system).delete(api::delete_system))
        .route("/systems/{id}/state", post(api::system_state_action))
        .route("/images", get(api::list_images))
        .route("/images/{id}", get(api::get_image).put(api::update_image).delete(api::delete_image))
        .route("/profiles", get(api::list_profiles).post(api::create_profile))
        .route(
            "/profiles/{id}",
            get(api::get_profile).put(api::update_profile).delete(api::delete_profile),
        )
        .route("/webhooks", get(api::list_webhooks).post(api::create_webhook))
        .route("/webhooks/{id}", delete(api::delete_webhook))
        .route("/webhooks/{id}/test", post(api::test_webhook))
        .route("/webhooks/{id}/toggle", put(api::toggle_webhook))
        .route("/catalog/pull", post(api::catalog_pull))
        .route("/settings/confirm-reimage", put(api::set_confirm_reimage))
        .route("/auth/password", post(api::set_password).put(api::change_password).delete(api::remove_password))
        .route("/auth/rotate-key", post(api::rotate_key))
        .layer(from_fn_with_state(state.clone(), middleware::require_operator));

    Router::new()
        .merge(boot_chain)
        .nest("/api/v1", operator)
        .layer(from_fn_with_state(state.clone(), middleware::https_redirect))
        .layer(CatchPanicLayer::new())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
