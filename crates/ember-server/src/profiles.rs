//! Per-machine template rendering
//!
//! Profiles carry operator-supplied templates (installer config, kernel
//! params) rendered against a fixed context per machine. Variables are
//! two layered maps: profile defaults underneath, per-system overrides
//! on top, last writer wins.

use minijinja::Environment;
use serde::Serialize;
use std::collections::HashMap;
use thiserror::Error;

/// Context bound into every operator template
#[derive(Debug, Clone, Default, Serialize)]
#[allow(non_snake_case)]
pub struct TemplateVars {
    pub MAC: String,
    pub Hostname: String,
    pub IP: String,
    pub SystemID: i64,
    pub ImageID: i64,
    pub ServerURL: String,
    pub ConfigURL: String,
    pub CallbackURL: String,
    pub Vars: HashMap<String, String>,
}

/// Error type for template operations
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("parse profile default_vars: {0}")]
    DefaultVars(serde_json::Error),

    #[error("parse system vars: {0}")]
    SystemVars(serde_json::Error),

    #[error("render template: {0}")]
    Template(#[from] minijinja::Error),
}

/// Merge profile defaults and system overrides into one variable map
pub fn build_vars(
    default_vars_json: &str,
    system_vars_json: &str,
) -> Result<HashMap<String, String>, RenderError> {
    let mut merged: HashMap<String, String> = HashMap::new();

    if !default_vars_json.is_empty() && default_vars_json != "{}" {
        merged = serde_json::from_str(default_vars_json).map_err(RenderError::DefaultVars)?;
    }

    if !system_vars_json.is_empty() && system_vars_json != "{}" {
        let overrides: HashMap<String, String> =
            serde_json::from_str(system_vars_json).map_err(RenderError::SystemVars)?;
        for (k, v) in overrides {
            merged.insert(k, v);
        }
    }

    Ok(merged)
}

/// Render one template string against the context
pub fn render_template(template: &str, vars: &TemplateVars) -> Result<String, RenderError> {
    let mut env = Environment::new();
    env.add_template("t", template)?;
    let tmpl = env.get_template("t")?;
    Ok(tmpl.render(vars)?)
}

/// Render the installer config template
pub fn render_config_template(template: &str, vars: &TemplateVars) -> Result<String, RenderError> {
    render_template(template, vars)
}

/// Render kernel params; an empty template renders to nothing
pub fn render_kernel_params(kernel_params: &str, vars: &TemplateVars) -> Result<String, RenderError> {
    if kernel_params.is_empty() {
        return Ok(String::new());
    }
    render_template(kernel_params, vars)
}
