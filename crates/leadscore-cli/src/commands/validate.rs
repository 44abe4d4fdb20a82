//! The `leadscore validate` command.

use std::path::PathBuf;

use anyhow::Result;
use leadscore_core::settings::load_settings_from;
use leadscore_core::tenant::{self, Severity};

pub fn execute(config_path: PathBuf, settings_path: Option<PathBuf>) -> Result<()> {
    let settings = load_settings_from(settings_path.as_deref())?;
    let tenants = if config_path.is_dir() {
        tenant::load_tenant_directory(&config_path)?
    } else {
        vec![tenant::parse_tenant(&config_path)?]
    };

    let mut total_errors = 0;
    let mut total_warnings = 0;

    for config in &tenants {
        println!(
            "Tenant: {} v{} ({} questions, {} scoring models, {} recommendations)",
            config.name,
            config.version,
            config.questions.len(),
            config.scoring_models.len(),
            config.recommendations.len(),
        );

        for issue in tenant::validate(config, settings.max_depth) {
            match issue.severity {
                Severity::Error => {
                    println!("  ERROR: {issue}");
                    total_errors += 1;
                }
                Severity::Warning => {
                    println!("  WARNING: {issue}");
                    total_warnings += 1;
                }
            }
        }
    }

    if total_errors == 0 && total_warnings == 0 {
        println!("All tenant configurations valid.");
    } else {
        println!("\n{total_errors} error(s), {total_warnings} warning(s) found.");
    }

    anyhow::ensure!(
        total_errors == 0,
        "{total_errors} validation error(s) in {}",
        config_path.display()
    );
    Ok(())
}
