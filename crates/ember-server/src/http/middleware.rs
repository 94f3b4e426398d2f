//! Request middleware: operator session gate and the HTTPS redirect.

use crate::AppState;
use axum::extract::{Request, State};
use axum::http::{header, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde_json::json;
use tracing::debug;

/// Gate for the operator API: open until a password is set, then a valid
/// session cookie is required.
pub async fn require_operator(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    let snap = state.auth.snapshot(&state.store).await;
    if !snap.auth_enabled() {
        return next.run(req).await;
    }

    let cookie = req
        .headers()
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok());
    if snap.has_valid_session(cookie) {
        return next.run(req).await;
    }

    (
        StatusCode::UNAUTHORIZED,
        Json(json!({ "error": "authentication required" })),
    )
        .into_response()
}

/// Paths a booting machine or installer hits; never redirected to HTTPS
/// (firmware HTTP stacks and installers don't do TLS trust stores)
fn is_boot_chain_path(path: &str) -> bool {
    path.starts_with("/api/")
        || path.starts_with("/config/")
        || path.starts_with("/images/")
        || (path.starts_with("/profiles/") && path.contains("/overlay/"))
        || path == "/boot.ipxe"
        || path == "/ipxe.efi"
        || path == "/ipxe-arm64.efi"
        || path == "/undionly.kpxe"
}

/// Redirect browser traffic to HTTPS when enabled. iPXE user agents and
/// the boot chain are exempt.
pub async fn https_redirect(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Response {
    if !state.config.https_redirect {
        return next.run(req).await;
    }

    let user_agent = req
        .headers()
        .get(header::USER_AGENT)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if user_agent.contains("iPXE") {
        return next.run(req).await;
    }

    if is_boot_chain_path(req.uri().path()) {
        return next.run(req).await;
    }

    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("localhost");
    // Strip any port, then attach the HTTPS one if nonstandard
    let bare_host = host.rsplit_once(':').map(|(h, _)| h).unwrap_or(host);
    let https_port = state.config.https_port();
    let target_host = if https_port == 443 {
        bare_host.to_string()
    } else {
        format!("{}:{}", bare_host, https_port)
    };

    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");
    let target = format!("https://{}{}", target_host, path_and_query);
    debug!(target = %target, "redirecting to HTTPS");
    Redirect::permanent(&target).into_response()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_boot_chain_paths_exempt() {
        for path in [
            "/boot.ipxe",
            "/ipxe.efi",
            "/ipxe-arm64.efi",
            "/undionly.kpxe",
            "/images/3/file/vmlinuz",
            "/config/7",
            "/profiles/2/overlay/site.img",
            "/api/v1/systems/aa:bb:cc:dd:ee:ff/callback",
        ] {
            assert!(is_boot_chain_path(path), "{} should be exempt", path);
        }
    }

    #[test]
    fn test_operator_paths_not_exempt() {
        for path in ["/", "/healthz", "/profiles/2"] {
            assert!(!is_boot_chain_path(path), "{} should redirect", path);
        }
    }
}
