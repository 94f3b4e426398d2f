//! Boot-script dispatch
//!
//! `GET /boot.ipxe?mac=…` is the hinge of the whole system: it
//! auto-registers unknown machines, decides whether this machine boots
//! an installer or falls through to local disk, renders the
//! personalised script with signed artifact URLs, and flips the machine
//! into `provisioning`.
//!
//! The default answer for anything unrecognised or unready is the exit
//! script: boot locally. A machine must never hang at the firmware
//! prompt because of us.

use crate::http::request_host;
use crate::profiles::{build_vars, render_kernel_params, render_template, TemplateVars};
use crate::store::{Image, Profile, System, Transition, KEY_CONFIRM_REIMAGE};
use crate::AppState;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use ember_ipxe::{exit_script, render_boot_script, wrap_with_confirmation, BootFlavor, ExtraFileUrls, ScriptParams};
use serde::Deserialize;
use std::net::SocketAddr;
use tracing::{error, warn};

#[derive(Debug, Deserialize)]
pub struct BootQuery {
    #[serde(default)]
    mac: String,
}

fn script_response(body: String) -> Response {
    ([(header::CONTENT_TYPE, "text/plain")], body).into_response()
}

/// GET /boot.ipxe
pub async fn boot_script(
    State(state): State<AppState>,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    Query(query): Query<BootQuery>,
) -> Response {
    if query.mac.is_empty() {
        return script_response(exit_script());
    }

    let client_ip = peer.ip().to_string();

    // Creates if unknown (firing `discovered`), touches if known
    let (sys, is_new) = match state.store.auto_register(&query.mac, &client_ip).await {
        Ok(r) => r,
        Err(e) => {
            warn!(mac = %query.mac, error = %e, "boot auto-register failed");
            return script_response(exit_script());
        }
    };
    if is_new {
        state.events.fire(crate::events::Event::system(&sys, "discovered"));
    }

    // Not queued for provisioning: boot locally (also the first-contact
    // path, since a just-registered machine is `discovered`)
    if sys.state != "queued" || sys.image_id.is_none() || sys.hostname.is_empty() {
        return script_response(exit_script());
    }

    let image_id = sys.image_id.unwrap_or_default();
    let img = match state.store.get_image(image_id).await {
        Ok(Some(img)) => img,
        Ok(None) => {
            warn!(mac = %sys.mac, image_id, "assigned image missing");
            return script_response(exit_script());
        }
        Err(e) => {
            warn!(mac = %sys.mac, error = %e, "boot image lookup failed");
            return script_response(exit_script());
        }
    };

    // An image still downloading (or errored) has no files to serve
    if img.status != "ready" {
        warn!(mac = %sys.mac, image = %img.name, status = %img.status, "assigned image not ready");
        return script_response(exit_script());
    }

    let profile = match sys.profile_id {
        Some(pid) => match state.store.get_profile(pid).await {
            Ok(p) => p,
            Err(e) => {
                // Graceful degradation: boot with the image's own cmdline
                warn!(mac = %sys.mac, error = %e, "boot profile lookup failed");
                None
            }
        },
        None => None,
    };

    let server_url = state.server_url(&request_host(&headers));
    let key = state.signing_key().await;

    let script = match assemble_script(&sys, &img, profile.as_ref(), &server_url, key.as_deref()) {
        Ok(script) => script,
        Err(e) => {
            error!(mac = %sys.mac, error = %e, "boot script render failed");
            return (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response();
        }
    };

    let script = match state.store.get_setting(KEY_CONFIRM_REIMAGE).await {
        Ok(Some(v)) if v == "1" => wrap_with_confirmation(&script, &sys.hostname, &sys.mac),
        _ => script,
    };

    // The machine is booting the installer now. If the transition fails
    // the script is still served; the operator sees it stuck in
    // `queued` and can retry.
    match state
        .store
        .transition_system_state(&sys.mac, "queued", "provisioning")
        .await
    {
        Ok(Transition::Applied) => {
            state.events.fire(crate::events::Event::system(&sys, "provisioning"));
        }
        Ok(Transition::AlreadyInTarget) => {}
        Err(e) => {
            error!(mac = %sys.mac, error = %e, "boot state transition failed");
        }
    }

    script_response(script)
}

/// Build the flavour-specific script with signed URLs and the merged
/// kernel command line
fn assemble_script(
    sys: &System,
    img: &Image,
    profile: Option<&Profile>,
    server_url: &str,
    key: Option<&[u8]>,
) -> Result<String, String> {
    let flavor = BootFlavor::parse(&img.boot_flavor).map_err(|e| e.to_string())?;

    let image_file_url = |filename: &str| {
        crate::signer::sign_url(
            key,
            &format!("{}/images/{}/file/{}", server_url, img.id, filename),
        )
    };

    let mut params = ScriptParams {
        cmdline: img.cmdline.clone(),
        ..Default::default()
    };

    match flavor {
        BootFlavor::Linux => {
            params.kernel_url = image_file_url("vmlinuz");
            params.initrd_url = image_file_url("initrd.img");
        }
        BootFlavor::Wimboot => {
            params.kernel_url = image_file_url("wimboot");
            params.extra = ExtraFileUrls {
                bcd: image_file_url("BCD"),
                boot_sdi: image_file_url("boot.sdi"),
                boot_wim: image_file_url("boot.wim"),
                ..Default::default()
            };
        }
        BootFlavor::Esxi => {
            params.kernel_url = image_file_url("mboot.efi");
            params.extra.boot_cfg = image_file_url("boot.cfg");
        }
        BootFlavor::Iso => {
            params.kernel_url = image_file_url("memdisk");
            params.extra.boot_iso = image_file_url("boot.iso");
        }
        BootFlavor::Custom => {}
    }

    // Profile contributions: rendered kernel params appended to the
    // cmdline, plus the overlay initrd. A template failure degrades to
    // the image's own cmdline.
    let template_vars = template_vars_for(sys, img, server_url, key, profile);

    if let Some(profile) = profile {
        if !profile.kernel_params.is_empty() {
            match template_vars
                .as_ref()
                .map_err(|e| e.clone())
                .and_then(|tv| render_kernel_params(&profile.kernel_params, tv).map_err(|e| e.to_string()))
            {
                Ok(rendered) if !rendered.is_empty() => {
                    params.cmdline = format!("{} {}", params.cmdline, rendered).trim().to_string();
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(mac = %sys.mac, error = %e, "kernel params render failed, using image cmdline");
                }
            }
        }

        if !profile.overlay_file.is_empty() {
            params.overlay_urls.push(crate::signer::sign_url(
                key,
                &format!("{}/profiles/{}/overlay/{}", server_url, profile.id, profile.overlay_file),
            ));
        }
    }

    if flavor == BootFlavor::Custom && !img.ipxe_script.is_empty() {
        // Operator scripts get the same context as config templates
        match template_vars
            .as_ref()
            .map_err(|e| e.clone())
            .and_then(|tv| render_template(&img.ipxe_script, tv).map_err(|e| e.to_string()))
        {
            Ok(rendered) => params.custom_script = rendered,
            Err(e) => return Err(format!("render custom script: {}", e)),
        }
    }

    render_boot_script(flavor, &params).map_err(|e| e.to_string())
}

/// The template context shared by kernel-params, config and custom
/// script rendering
fn template_vars_for(
    sys: &System,
    img: &Image,
    server_url: &str,
    key: Option<&[u8]>,
    profile: Option<&Profile>,
) -> Result<TemplateVars, String> {
    let default_vars = profile.map(|p| p.default_vars.as_str()).unwrap_or("{}");
    let vars = build_vars(default_vars, &sys.vars).map_err(|e| e.to_string())?;

    Ok(TemplateVars {
        MAC: sys.mac.clone(),
        Hostname: sys.hostname.clone(),
        IP: sys.ip_addr.clone(),
        SystemID: sys.id,
        ImageID: img.id,
        ServerURL: server_url.to_string(),
        ConfigURL: crate::signer::sign_url(key, &format!("{}/config/{}", server_url, sys.id)),
        CallbackURL: crate::signer::sign_url(
            key,
            &format!("{}/api/v1/systems/{}/callback", server_url, sys.mac),
        ),
        Vars: vars,
    })
}

/// GET /ipxe.efi
pub async fn serve_ipxe_efi(State(state): State<AppState>) -> Response {
    serve_chainloader(&state, "ipxe.efi", "application/efi")
}

/// GET /ipxe-arm64.efi
pub async fn serve_ipxe_arm64(State(state): State<AppState>) -> Response {
    serve_chainloader(&state, "ipxe-arm64.efi", "application/efi")
}

/// GET /undionly.kpxe
pub async fn serve_undionly(State(state): State<AppState>) -> Response {
    serve_chainloader(&state, "undionly.kpxe", "application/octet-stream")
}

fn serve_chainloader(state: &AppState, name: &str, content_type: &'static str) -> Response {
    match state.chainloaders.get(name) {
        Some(bytes) => ([(header::CONTENT_TYPE, content_type)], bytes).into_response(),
        None => (StatusCode::NOT_FOUND, "chainloader not available").into_response(),
    }
}
