pub mod batch;
pub mod eval;
pub mod init;
pub mod score;
pub mod validate;

use std::path::Path;

use anyhow::{Context, Result};
use leadscore_core::model::{Answers, Submission};

/// Read a lead submission. A bare answers object is accepted too.
pub(crate) fn read_submission(path: &Path) -> Result<Submission> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read lead: {}", path.display()))?;
    if let Ok(submission) = serde_json::from_str::<Submission>(&content) {
        return Ok(submission);
    }
    let answers: Answers = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse lead JSON: {}", path.display()))?;
    Ok(Submission {
        lead_id: None,
        external_lead_id: None,
        answers,
    })
}

/// Load a tenant, log its validation issues and build an engine for it.
pub(crate) fn load_engine(
    config_path: &Path,
    mode: Option<leadscore_core::model::SelectionMode>,
    strict: bool,
    settings: &leadscore_core::settings::Settings,
) -> Result<(leadscore_core::model::TenantConfig, leadscore_core::Engine)> {
    use leadscore_core::tenant;

    let config = tenant::parse_tenant(config_path)?;
    if strict {
        tenant::ensure_valid(&config, settings.max_depth)
            .with_context(|| format!("invalid tenant: {}", config_path.display()))?;
    } else {
        for issue in tenant::validate(&config, settings.max_depth) {
            tracing::warn!(tenant = %config.id, "{issue}");
        }
    }

    let mut options = settings.engine_options();
    if mode.is_some() {
        options.selection_mode = mode;
    }
    let engine = leadscore_core::Engine::new(config.clone(), options);
    Ok((config, engine))
}
