//! End-to-end batch scoring: concurrent scoring, failure isolation and the
//! JSON report written to the output directory.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn leadscore() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("leadscore").unwrap()
}

fn run_batch(output: &std::path::Path, extra: &[&str]) -> serde_json::Value {
    leadscore()
        .arg("batch")
        .arg("--config")
        .arg("../../tenants/acme-lending.toml")
        .arg("--leads")
        .arg("../../leads/lending-batch.json")
        .arg("--output")
        .arg(output)
        .args(extra)
        .assert()
        .success()
        .stderr(predicate::str::contains("Report saved to"));

    let reports: Vec<_> = std::fs::read_dir(output)
        .unwrap()
        .map(|e| e.unwrap().path())
        .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
        .collect();
    assert_eq!(reports.len(), 1);
    let content = std::fs::read_to_string(&reports[0]).unwrap();
    serde_json::from_str(&content).unwrap()
}

#[test]
fn batch_report_summarizes_results() {
    let dir = TempDir::new().unwrap();
    let report = run_batch(dir.path(), &["--parallelism", "2"]);

    assert_eq!(report["tenant"]["id"], "acme-lending");
    assert_eq!(report["results"].as_array().unwrap().len(), 3);
    assert_eq!(report["summary"]["total_leads"], 3);
    assert_eq!(report["summary"]["avg_total_score"], 25.0);
    assert_eq!(report["summary"]["distribution"]["low"], 1);
    assert_eq!(report["summary"]["distribution"]["medium"], 2);
    assert_eq!(report["summary"]["distribution"]["high"], 0);
}

#[test]
fn batch_keeps_input_order() {
    let dir = TempDir::new().unwrap();
    let report = run_batch(dir.path(), &["--parallelism", "4"]);

    let external: Vec<&str> = report["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["external_lead_id"].as_str().unwrap())
        .collect();
    assert_eq!(external, vec!["crm-42", "crm-43", "crm-44"]);
}

#[test]
fn batch_isolates_failed_leads() {
    let dir = TempDir::new().unwrap();
    let report = run_batch(dir.path(), &[]);

    let failures = report["failures"].as_array().unwrap();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0]["index"], 3);
    assert!(failures[0]["error"].as_str().unwrap().contains("employment"));
}

#[test]
fn batch_counts_recommendation_triggers() {
    let dir = TempDir::new().unwrap();
    let report = run_batch(dir.path(), &[]);

    let triggers: Vec<(String, u64)> = report["recommendation_triggers"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| {
            (
                t["recommendation_id"].as_str().unwrap().to_string(),
                t["leads"].as_u64().unwrap(),
            )
        })
        .collect();
    assert_eq!(
        triggers,
        vec![("high_total".to_string(), 2), ("prime".to_string(), 1)]
    );
}

#[test]
fn batch_first_mode_limits_matches() {
    let dir = TempDir::new().unwrap();
    let report = run_batch(dir.path(), &["--mode", "first"]);

    for result in report["results"].as_array().unwrap() {
        assert!(result["recommendations"].as_array().unwrap().len() <= 1);
    }
}

#[test]
fn batch_rejects_zero_parallelism() {
    let dir = TempDir::new().unwrap();
    leadscore()
        .arg("batch")
        .arg("--config")
        .arg("../../tenants/acme-lending.toml")
        .arg("--leads")
        .arg("../../leads/lending-batch.json")
        .arg("--output")
        .arg(dir.path())
        .arg("--parallelism")
        .arg("0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("parallelism must be at least 1"));
}

#[test]
fn batch_rejects_non_array_input() {
    let dir = TempDir::new().unwrap();
    leadscore()
        .arg("batch")
        .arg("--config")
        .arg("../../tenants/acme-lending.toml")
        .arg("--leads")
        .arg("../../leads/lending.json")
        .arg("--output")
        .arg(dir.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse leads JSON"));
}
