//! The `leadscore score` command.

use std::path::PathBuf;

use anyhow::Result;
use comfy_table::{Cell, Table};
use leadscore_core::model::SelectionMode;
use leadscore_core::settings::load_settings_from;
use leadscore_core::ScoredLead;

pub fn execute(
    config_path: PathBuf,
    lead_path: PathBuf,
    mode: Option<SelectionMode>,
    format: String,
    strict: bool,
    settings_path: Option<PathBuf>,
) -> Result<()> {
    let settings = load_settings_from(settings_path.as_deref())?;
    let (_, engine) = super::load_engine(&config_path, mode, strict, &settings)?;
    let submission = super::read_submission(&lead_path)?;

    let scored = engine.score(&submission)?;

    match format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&scored)?),
        "table" => print_tables(&scored),
        other => anyhow::bail!("unknown format: '{other}' (expected json or table)"),
    }

    for failure in &scored.rule_failures {
        eprintln!(
            "Warning: rule '{}' failed ({}): {}",
            failure.rule_id, failure.expression, failure.error
        );
    }

    Ok(())
}

fn print_tables(scored: &ScoredLead) {
    let mut scores = Table::new();
    scores.set_header(vec!["Lead", "X axis", "Y axis", "Total"]);
    scores.add_row(vec![
        Cell::new(scored.lead_id),
        Cell::new(format!("{:.2}", scored.x_axis)),
        Cell::new(format!("{:.2}", scored.y_axis)),
        Cell::new(format!("{:.2}", scored.total_score)),
    ]);
    println!("{scores}");

    if !scored.answers.is_empty() {
        let mut contributions = Table::new();
        contributions.set_header(vec!["Model", "Field", "Response", "Points", "Weighted"]);
        for c in &scored.answers {
            contributions.add_row(vec![
                Cell::new(&c.model_id),
                Cell::new(&c.field_name),
                Cell::new(&c.response),
                Cell::new(format!("{:.2}", c.points)),
                Cell::new(format!("{:.2}", c.weighted)),
            ]);
        }
        println!("{contributions}");
    }

    if scored.recommendations.is_empty() {
        println!("No recommendations matched.");
    } else {
        let mut recommendations = Table::new();
        recommendations.set_header(vec!["Recommendation", "Response", "Redirect"]);
        for r in &scored.recommendations {
            recommendations.add_row(vec![
                Cell::new(&r.id),
                Cell::new(&r.response_text),
                Cell::new(r.redirect_url.as_deref().unwrap_or("-")),
            ]);
        }
        println!("{recommendations}");
    }
}
