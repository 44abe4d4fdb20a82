//! The `leadscore eval` command: try a rule or formula against answers.

use std::path::PathBuf;

use anyhow::{Context, Result};
use leadscore_core::expr::{evaluate_with_limits, parse_with_depth};
use leadscore_core::model::Answers;
use leadscore_core::settings::load_settings_from;
use leadscore_core::tenant::parse_tenant;
use leadscore_core::build_context;

pub fn execute(
    expr_text: String,
    answers_path: Option<PathBuf>,
    config_path: Option<PathBuf>,
    settings_path: Option<PathBuf>,
) -> Result<()> {
    let settings = load_settings_from(settings_path.as_deref())?;

    let expr = parse_with_depth(&expr_text, settings.max_depth)
        .with_context(|| format!("failed to parse expression: {expr_text}"))?;

    let answers = match &answers_path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read answers: {}", path.display()))?;
            serde_json::from_str::<Answers>(&content)
                .with_context(|| format!("failed to parse answers JSON: {}", path.display()))?
                .normalize()
        }
        None => Answers::new(),
    };

    let questions = match &config_path {
        Some(path) => parse_tenant(path)?.questions,
        None => Vec::new(),
    };

    let ctx = build_context(&questions, &answers, None, chrono::Utc::now().date_naive());
    let value = evaluate_with_limits(&expr, &ctx, &settings.limits())
        .with_context(|| format!("failed to evaluate: {expr}"))?;

    println!("Parsed: {expr}");
    println!("Result: {value}");
    println!("Matches: {}", value.is_truthy());
    Ok(())
}
