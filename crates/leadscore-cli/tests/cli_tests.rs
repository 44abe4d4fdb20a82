//! CLI integration tests using assert_cmd.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn leadscore() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("leadscore").unwrap()
}

fn score_json(extra: &[&str]) -> serde_json::Value {
    let output = leadscore()
        .arg("score")
        .arg("--config")
        .arg("../../tenants/acme-lending.toml")
        .arg("--lead")
        .arg("../../leads/lending.json")
        .args(extra)
        .output()
        .unwrap();
    assert!(output.status.success());
    serde_json::from_slice(&output.stdout).unwrap()
}

fn recommendation_ids(scored: &serde_json::Value) -> Vec<String> {
    scored["recommendations"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["id"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn validate_valid_tenant() {
    leadscore()
        .arg("validate")
        .arg("--config")
        .arg("../../tenants/acme-lending.toml")
        .assert()
        .success()
        .stdout(predicate::str::contains("Acme Lending v1"))
        .stdout(predicate::str::contains("4 questions"))
        .stdout(predicate::str::contains("All tenant configurations valid"));
}

#[test]
fn validate_directory() {
    leadscore()
        .arg("validate")
        .arg("--config")
        .arg("../../tenants")
        .assert()
        .success()
        .stdout(predicate::str::contains("Acme Lending"))
        .stdout(predicate::str::contains("Home Insurance Quotes"));
}

#[test]
fn validate_reports_errors_and_fails() {
    leadscore()
        .arg("validate")
        .arg("--config")
        .arg("tests/fixtures/invalid-tenant.toml")
        .assert()
        .failure()
        .stdout(predicate::str::contains("ERROR"))
        .stdout(predicate::str::contains("savings"))
        .stdout(predicate::str::contains("bad_rule"))
        .stderr(predicate::str::contains("validation error"));
}

#[test]
fn validate_nonexistent_file() {
    leadscore()
        .arg("validate")
        .arg("--config")
        .arg("nonexistent.toml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn score_lending_lead_as_json() {
    let scored = score_json(&[]);
    assert_eq!(scored["x_axis"], 23.0);
    assert_eq!(scored["y_axis"], 10.5);
    assert_eq!(scored["total_score"], 33.5);
    assert_eq!(scored["external_lead_id"], "crm-42");
    assert_eq!(recommendation_ids(&scored), vec!["prime", "high_total"]);
}

#[test]
fn score_mode_flag_overrides_tenant() {
    let scored = score_json(&["--mode", "first"]);
    assert_eq!(recommendation_ids(&scored), vec!["prime"]);
}

#[test]
fn score_as_table() {
    leadscore()
        .arg("score")
        .arg("--config")
        .arg("../../tenants/acme-lending.toml")
        .arg("--lead")
        .arg("../../leads/lending.json")
        .arg("--format")
        .arg("table")
        .assert()
        .success()
        .stdout(predicate::str::contains("33.50"))
        .stdout(predicate::str::contains("credit_score"))
        .stdout(predicate::str::contains("https://example.com/prime"));
}

#[test]
fn score_unknown_format_fails() {
    leadscore()
        .arg("score")
        .arg("--config")
        .arg("../../tenants/acme-lending.toml")
        .arg("--lead")
        .arg("../../leads/lending.json")
        .arg("--format")
        .arg("xml")
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown format"));
}

#[test]
fn score_strict_rejects_invalid_tenant() {
    leadscore()
        .arg("score")
        .arg("--config")
        .arg("tests/fixtures/invalid-tenant.toml")
        .arg("--lead")
        .arg("../../leads/lending.json")
        .arg("--strict")
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid tenant"));
}

#[test]
fn score_lenient_isolates_malformed_rule() {
    leadscore()
        .arg("score")
        .arg("--config")
        .arg("tests/fixtures/invalid-tenant.toml")
        .arg("--lead")
        .arg("../../leads/lending.json")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"rule_failures\""))
        .stderr(predicate::str::contains("rule 'bad_rule' failed"));
}

#[test]
fn score_bare_answers_object() {
    let dir = TempDir::new().unwrap();
    let lead = dir.path().join("lead.json");
    std::fs::write(
        &lead,
        r#"{"income": 60000, "credit_score": 750, "employment_years": 3, "employment": "Full Time"}"#,
    )
    .unwrap();

    let output = leadscore()
        .arg("score")
        .arg("--config")
        .arg("../../tenants/acme-lending.toml")
        .arg("--lead")
        .arg(&lead)
        .output()
        .unwrap();
    assert!(output.status.success());
    let scored: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(scored["total_score"], 33.5);
}

#[test]
fn eval_arithmetic() {
    leadscore()
        .arg("eval")
        .arg("--expr")
        .arg("2 + 3 * 4")
        .assert()
        .success()
        .stdout(predicate::str::contains("Result: 14"))
        .stdout(predicate::str::contains("Matches: true"));
}

#[test]
fn eval_rule_against_answers() {
    leadscore()
        .arg("eval")
        .arg("--expr")
        .arg("{credit_score} > 700 and count({products}) == 2")
        .arg("--answers")
        .arg("../../leads/answers.json")
        .assert()
        .success()
        .stdout(predicate::str::contains("Result: true"));
}

#[test]
fn eval_missing_field_short_circuits() {
    leadscore()
        .arg("eval")
        .arg("--expr")
        .arg("{missing} > 5 or 1 == 1")
        .assert()
        .success()
        .stdout(predicate::str::contains("Result: true"));
}

#[test]
fn eval_syntax_error() {
    leadscore()
        .arg("eval")
        .arg("--expr")
        .arg("{income} >")
        .assert()
        .failure()
        .stderr(predicate::str::contains("failed to parse expression"));
}

#[test]
fn eval_division_by_zero() {
    leadscore()
        .arg("eval")
        .arg("--expr")
        .arg("10 / (5 - 5)")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn init_creates_files() {
    let dir = TempDir::new().unwrap();

    leadscore()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("Created leadscore.toml"))
        .stdout(predicate::str::contains("Created tenant.toml"))
        .stdout(predicate::str::contains("Created leads/sample.json"));

    assert!(dir.path().join("leadscore.toml").exists());
    assert!(dir.path().join("tenant.toml").exists());
    assert!(dir.path().join("leads/sample.json").exists());
}

#[test]
fn init_skips_existing() {
    let dir = TempDir::new().unwrap();

    leadscore().current_dir(dir.path()).arg("init").assert().success();

    leadscore()
        .current_dir(dir.path())
        .arg("init")
        .assert()
        .success()
        .stdout(predicate::str::contains("already exists"));
}

#[test]
fn init_output_scores_end_to_end() {
    let dir = TempDir::new().unwrap();
    leadscore().current_dir(dir.path()).arg("init").assert().success();

    leadscore()
        .current_dir(dir.path())
        .arg("validate")
        .arg("--config")
        .arg("tenant.toml")
        .assert()
        .success();

    let output = leadscore()
        .current_dir(dir.path())
        .arg("score")
        .arg("--config")
        .arg("tenant.toml")
        .arg("--lead")
        .arg("leads/sample.json")
        .output()
        .unwrap();
    assert!(output.status.success());
    let scored: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(scored["total_score"], 33.5);
}
