//! The `leadscore batch` command.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use comfy_table::{Cell, Table};
use futures::stream::{FuturesUnordered, StreamExt};
use leadscore_core::model::{SelectionMode, Submission};
use leadscore_core::report::{BatchReport, LeadFailure, TenantSummary};
use leadscore_core::settings::load_settings_from;
use tokio::sync::Semaphore;

pub async fn execute(
    config_path: PathBuf,
    leads_path: PathBuf,
    parallelism: Option<usize>,
    output: Option<PathBuf>,
    mode: Option<SelectionMode>,
    settings_path: Option<PathBuf>,
) -> Result<()> {
    let settings = load_settings_from(settings_path.as_deref())?;
    let parallelism = parallelism.unwrap_or(settings.parallelism);
    anyhow::ensure!(parallelism >= 1, "parallelism must be at least 1");
    let output = output.unwrap_or_else(|| settings.output_dir.clone());

    let (config, engine) = super::load_engine(&config_path, mode, false, &settings)?;
    let engine = Arc::new(engine);

    let content = std::fs::read_to_string(&leads_path)
        .with_context(|| format!("failed to read leads: {}", leads_path.display()))?;
    let submissions: Vec<Submission> = serde_json::from_str(&content)
        .with_context(|| format!("failed to parse leads JSON: {}", leads_path.display()))?;

    eprintln!(
        "leadscore v{} | Scoring {} leads for tenant '{}' (parallelism {parallelism})",
        env!("CARGO_PKG_VERSION"),
        submissions.len(),
        config.id,
    );

    let start = Instant::now();
    let semaphore = Arc::new(Semaphore::new(parallelism));
    let mut futures = FuturesUnordered::new();

    for (index, submission) in submissions.into_iter().enumerate() {
        let engine = Arc::clone(&engine);
        let semaphore = Arc::clone(&semaphore);
        futures.push(async move {
            let permit = semaphore
                .acquire_owned()
                .await
                .map_err(|_| anyhow::anyhow!("semaphore closed"))?;
            let lead_id = submission.lead_id;
            let outcome = tokio::task::spawn_blocking(move || {
                let _permit = permit;
                engine.score(&submission)
            })
            .await
            .context("scoring task panicked")?;
            Ok::<_, anyhow::Error>((index, lead_id, outcome))
        });
    }

    let mut results = Vec::new();
    let mut failures = Vec::new();
    while let Some(joined) = futures.next().await {
        let (index, lead_id, outcome) = joined?;
        match outcome {
            Ok(scored) => results.push((index, scored)),
            Err(e) => {
                tracing::error!(index, error = %e, "lead could not be scored");
                failures.push(LeadFailure {
                    index,
                    lead_id,
                    error: e.to_string(),
                });
            }
        }
    }

    results.sort_by_key(|(index, _)| *index);
    failures.sort_by_key(|f| f.index);
    let results = results.into_iter().map(|(_, scored)| scored).collect();

    let report = BatchReport::new(
        TenantSummary::from(&config),
        results,
        failures,
        start.elapsed().as_millis() as u64,
    );

    print_summary(&report);

    std::fs::create_dir_all(&output)
        .with_context(|| format!("failed to create output directory: {}", output.display()))?;
    let path = output.join(report.file_name());
    report.save_json(&path)?;
    eprintln!("Report saved to: {}", path.display());

    Ok(())
}

fn print_summary(report: &BatchReport) {
    let summary = &report.summary;

    let mut table = Table::new();
    table.set_header(vec![
        "Leads",
        "Failed",
        "Avg X",
        "Avg Y",
        "Avg Total",
        "Low",
        "Medium",
        "High",
    ]);
    table.add_row(vec![
        Cell::new(summary.total_leads),
        Cell::new(report.failures.len()),
        Cell::new(format!("{:.2}", summary.avg_x_axis)),
        Cell::new(format!("{:.2}", summary.avg_y_axis)),
        Cell::new(format!("{:.2}", summary.avg_total_score)),
        Cell::new(summary.distribution.low),
        Cell::new(summary.distribution.medium),
        Cell::new(summary.distribution.high),
    ]);
    eprintln!("\n{table}");

    if !report.recommendation_triggers.is_empty() {
        let mut triggers = Table::new();
        triggers.set_header(vec!["Recommendation", "Leads"]);
        for t in &report.recommendation_triggers {
            triggers.add_row(vec![Cell::new(&t.recommendation_id), Cell::new(t.leads)]);
        }
        eprintln!("{triggers}");
    }

    let grades: Vec<String> = report
        .qualification
        .iter()
        .map(|(grade, count)| format!("{grade}: {count}"))
        .collect();
    if !grades.is_empty() {
        eprintln!("Qualification: {}", grades.join(", "));
    }
}
