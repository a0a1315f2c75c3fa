//! Scanner properties rendering.
//!
//! The scanner image ships a properties template with `{{.Field}}`
//! placeholders. Rendering substitutes every placeholder with the matching
//! [`RunConfig`] value and writes the result where the scanner expects it.
//!
//! `{{if .Field}}...{{end}}` keeps its body only when the field is non-empty.
//! Sections do not nest. Any other `{{ ... }}` action is rejected.

use std::path::Path;
use std::sync::LazyLock;

use regex::{Captures, Regex};

use crate::config::RunConfig;
use crate::error::{Result, RunError};

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\{\{\s*\.([A-Za-z][A-Za-z0-9]*)\s*\}\}").expect("placeholder regex")
});

static SECTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)\{\{\s*if\s+\.([A-Za-z][A-Za-z0-9]*)\s*\}\}(.*?)\{\{\s*end\s*\}\}")
        .expect("section regex")
});

static ACTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\{\{.*?\}\}").expect("action regex"));

/// Value of a template field, or `None` for unknown fields.
///
/// Unset optional fields render as the empty string.
fn field_value(config: &RunConfig, field: &str) -> Option<String> {
    let opt = |v: &Option<String>| v.clone().unwrap_or_default();
    let value = match field {
        "Host" => config.base_url().to_string(),
        "Token" => opt(&config.token),
        "Key" => config.normalized_key(),
        "ProjectKey" => config.project_key(),
        "Name" => config.name.clone(),
        "Version" => opt(&config.version),
        "Sources" => config.sources.clone(),
        "Inclusions" => opt(&config.inclusions),
        "Exclusions" => opt(&config.exclusions),
        "Language" => opt(&config.language),
        "Profile" => opt(&config.profile),
        "Encoding" => config.encoding.clone(),
        "Remote" => opt(&config.remote),
        "Branch" => opt(&config.branch),
        "Quality" => config.quality.clone(),
        _ => return None,
    };
    Some(value)
}

/// Reject unsupported actions, expand `if` sections, then substitute every
/// placeholder in `template`.
pub fn render_properties(template: &str, config: &RunConfig) -> Result<String> {
    let bare = SECTION.replace_all(template, "$2");
    let mut unsupported: Vec<String> = ACTION
        .find_iter(&PLACEHOLDER.replace_all(&bare, ""))
        .map(|m| m.as_str().to_string())
        .collect();
    if !unsupported.is_empty() {
        unsupported.dedup();
        return Err(RunError::ConfigRender(format!(
            "unsupported template actions: {}",
            unsupported.join(", ")
        )));
    }

    let mut unknown: Vec<String> = Vec::new();
    let expanded = SECTION.replace_all(template, |caps: &Captures| {
        let field = &caps[1];
        match field_value(config, field) {
            Some(value) if !value.trim().is_empty() => caps[2].to_string(),
            Some(_) => String::new(),
            None => {
                unknown.push(field.to_string());
                String::new()
            }
        }
    });

    let rendered = PLACEHOLDER.replace_all(&expanded, |caps: &Captures| {
        let field = &caps[1];
        field_value(config, field).unwrap_or_else(|| {
            unknown.push(field.to_string());
            String::new()
        })
    });

    if !unknown.is_empty() {
        unknown.sort();
        unknown.dedup();
        return Err(RunError::ConfigRender(format!(
            "unknown template fields: {}",
            unknown.join(", ")
        )));
    }

    Ok(rendered.into_owned())
}

/// Read the template at `config.template_path`, render it and write it to
/// `config.properties_path`.
pub async fn write_properties(config: &RunConfig) -> Result<()> {
    let template = read_template(&config.template_path).await?;
    let rendered = render_properties(&template, config)?;

    let target = &config.properties_path;
    if let Some(parent) = target.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| {
            RunError::ConfigRender(format!("failed to create {}: {e}", parent.display()))
        })?;
    }
    tokio::fs::write(target, rendered).await.map_err(|e| {
        RunError::ConfigRender(format!("failed to write {}: {e}", target.display()))
    })?;

    tracing::info!(path = %target.display(), "scanner properties written");
    Ok(())
}

async fn read_template(path: &Path) -> Result<String> {
    tokio::fs::read_to_string(path).await.map_err(|e| {
        RunError::ConfigRender(format!("failed to read template {}: {e}", path.display()))
    })
}
