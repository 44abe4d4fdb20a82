//! TOML tenant configuration loader.
//!
//! Loads tenant configurations from TOML files and directories, and validates
//! them before they are handed to an engine.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::context::{is_reserved, X_AXIS_SCORE, Y_AXIS_SCORE};
use crate::error::{ConfigError, ExprError};
use crate::expr::lexer::is_identifier;
use crate::expr::{parse_with_depth, Expr};
use crate::model::{
    Choice, Question, QuestionType, Recommendation, ScoringModel, SelectionMode, TenantConfig,
};

/// Intermediate TOML structure for tenant files.
#[derive(Debug, Deserialize)]
struct TomlTenantFile {
    tenant: TomlTenantHeader,
    #[serde(default)]
    questions: Vec<TomlQuestion>,
    #[serde(default)]
    scoring_models: Vec<ScoringModel>,
    #[serde(default)]
    recommendations: Vec<Recommendation>,
}

#[derive(Debug, Deserialize)]
struct TomlTenantHeader {
    id: String,
    name: String,
    #[serde(default = "default_version")]
    version: u32,
    #[serde(default)]
    selection_mode: Option<String>,
    #[serde(default)]
    total_formula: Option<String>,
}

fn default_version() -> u32 {
    1
}

#[derive(Debug, Deserialize)]
struct TomlQuestion {
    #[serde(default)]
    id: Option<String>,
    number: u32,
    field_name: String,
    text: String,
    #[serde(rename = "type")]
    question_type: String,
    #[serde(default)]
    multiple_values: bool,
    #[serde(default)]
    min_value: Option<f64>,
    #[serde(default)]
    max_value: Option<f64>,
    #[serde(default)]
    choices: Vec<Choice>,
}

/// Parse a single TOML file into a `TenantConfig`.
pub fn parse_tenant(path: &Path) -> Result<TenantConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read tenant file: {}", path.display()))?;

    parse_tenant_str(&content, path)
}

/// Parse a TOML string into a `TenantConfig` (useful for testing).
pub fn parse_tenant_str(content: &str, source_path: &Path) -> Result<TenantConfig> {
    let parsed: TomlTenantFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;

    let selection_mode = parsed
        .tenant
        .selection_mode
        .map(|m| m.parse::<SelectionMode>().map_err(|e| anyhow::anyhow!("{e}")))
        .transpose()?;

    let questions = parsed
        .questions
        .into_iter()
        .map(|q| {
            let question_type: QuestionType = q
                .question_type
                .parse()
                .map_err(|e: String| anyhow::anyhow!("question '{}': {e}", q.field_name))?;
            Ok(Question {
                id: q.id,
                number: q.number,
                field_name: q.field_name,
                text: q.text,
                question_type,
                multiple_values: q.multiple_values,
                min_value: q.min_value,
                max_value: q.max_value,
                choices: q.choices,
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(TenantConfig {
        id: parsed.tenant.id,
        name: parsed.tenant.name,
        version: parsed.tenant.version,
        questions,
        scoring_models: parsed.scoring_models,
        recommendations: parsed.recommendations,
        total_formula: parsed.tenant.total_formula,
        selection_mode,
    })
}

/// Recursively load all `.toml` tenant files from a directory.
pub fn load_tenant_directory(dir: &Path) -> Result<Vec<TenantConfig>> {
    let mut tenants = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            tenants.extend(load_tenant_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_tenant(&path) {
                Ok(tenant) => tenants.push(tenant),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    Ok(tenants)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

/// A problem found while validating a tenant configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub severity: Severity,
    /// What the issue is about, e.g. `question 'income'`.
    pub subject: Option<String>,
    pub message: String,
}

impl ValidationIssue {
    fn error(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            subject: Some(subject.into()),
            message: message.into(),
        }
    }

    fn warning(subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            subject: Some(subject.into()),
            message: message.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.severity == Severity::Error
    }
}

impl fmt::Display for ValidationIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.subject {
            Some(subject) => write!(f, "{subject}: {}", self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

/// Check a tenant configuration. Errors make the configuration unusable;
/// warnings point at things that probably do not do what was intended.
pub fn validate(config: &TenantConfig, max_depth: usize) -> Vec<ValidationIssue> {
    let mut issues = Vec::new();

    if config.id.trim().is_empty() {
        issues.push(ValidationIssue {
            severity: Severity::Error,
            subject: None,
            message: "tenant id is empty".into(),
        });
    }

    validate_questions(&config.questions, &mut issues);
    let fields: HashSet<&str> = config
        .questions
        .iter()
        .map(|q| q.field_name.as_str())
        .collect();
    validate_models(config, &fields, max_depth, &mut issues);
    validate_recommendations(&config.recommendations, &fields, max_depth, &mut issues);

    if let Some(formula) = &config.total_formula {
        let subject = "total_formula";
        match parse_with_depth(formula, max_depth) {
            Ok(expr) => {
                for name in expr.field_refs() {
                    if name != X_AXIS_SCORE && name != Y_AXIS_SCORE {
                        issues.push(ValidationIssue::warning(
                            subject,
                            format!("references {{{name}}}, which is never set for the total"),
                        ));
                    }
                }
            }
            Err(e) => issues.push(ValidationIssue::error(subject, e.to_string())),
        }
    }

    issues
}

/// Reject configurations with validation errors. Warnings are logged.
pub fn ensure_valid(config: &TenantConfig, max_depth: usize) -> Result<(), ConfigError> {
    let (errors, warnings): (Vec<_>, Vec<_>) = validate(config, max_depth)
        .into_iter()
        .partition(ValidationIssue::is_error);

    for warning in &warnings {
        tracing::warn!(tenant = %config.id, "{warning}");
    }
    if errors.is_empty() {
        Ok(())
    } else {
        Err(ConfigError {
            issues: errors.iter().map(ToString::to_string).collect(),
        })
    }
}

fn validate_questions(questions: &[Question], issues: &mut Vec<ValidationIssue>) {
    let mut seen_fields = HashSet::new();
    let mut seen_numbers = HashSet::new();

    for q in questions {
        let subject = format!("question '{}'", q.field_name);

        if !is_identifier(&q.field_name) {
            issues.push(ValidationIssue::error(
                &subject,
                "field_name must match ^[a-zA-Z_][a-zA-Z0-9_]*$",
            ));
        }
        if !seen_fields.insert(q.field_name.as_str()) {
            issues.push(ValidationIssue::error(&subject, "duplicate field_name"));
        }
        if is_reserved(&q.field_name) {
            issues.push(ValidationIssue::warning(
                &subject,
                "uses a reserved derived-score name; rules will see the derived score instead",
            ));
        }
        if q.number == 0 {
            issues.push(ValidationIssue::error(&subject, "number must be at least 1"));
        } else if !seen_numbers.insert(q.number) {
            issues.push(ValidationIssue::error(
                &subject,
                format!("duplicate question number {}", q.number),
            ));
        }

        if q.question_type.is_numeric() {
            if let (Some(min), Some(max)) = (q.min_value, q.max_value) {
                if min > max {
                    issues.push(ValidationIssue::error(
                        &subject,
                        format!("min_value {min} is greater than max_value {max}"),
                    ));
                }
            }
            if q.question_type == QuestionType::Slider
                && (q.min_value.is_none() || q.max_value.is_none())
            {
                issues.push(ValidationIssue::error(
                    &subject,
                    "slider questions need both min_value and max_value",
                ));
            }
        }

        if q.question_type.has_choices() {
            if q.choices.is_empty() {
                issues.push(ValidationIssue::error(&subject, "has no choices"));
            }
            let mut texts = HashSet::new();
            for choice in &q.choices {
                if !texts.insert(choice.text.as_str()) {
                    issues.push(ValidationIssue::error(
                        &subject,
                        format!("duplicate choice '{}'", choice.text),
                    ));
                }
            }
        } else if !q.choices.is_empty() {
            issues.push(ValidationIssue::warning(
                &subject,
                format!("choices are ignored for type {}", q.question_type),
            ));
        }
    }
}

fn validate_models(
    config: &TenantConfig,
    fields: &HashSet<&str>,
    max_depth: usize,
    issues: &mut Vec<ValidationIssue>,
) {
    let mut seen_ids = HashSet::new();
    let mut per_field: HashMap<&str, usize> = HashMap::new();

    for model in &config.scoring_models {
        let subject = format!("scoring model '{}'", model.id);

        if !seen_ids.insert(model.id.as_str()) {
            issues.push(ValidationIssue::error(&subject, "duplicate scoring model id"));
        }
        if !fields.contains(model.field_name.as_str()) {
            issues.push(ValidationIssue::error(
                &subject,
                format!("no question with field_name '{}'", model.field_name),
            ));
        }
        let count = per_field.entry(model.field_name.as_str()).or_default();
        *count += 1;
        if *count == 2 {
            issues.push(ValidationIssue::error(
                &subject,
                format!("question '{}' already has a scoring model", model.field_name),
            ));
        }
        if !model.weight.is_finite() || model.weight < 0.0 {
            issues.push(ValidationIssue::error(
                &subject,
                format!("weight must be a non-negative number, got {}", model.weight),
            ));
        }
        if !model.x_axis && !model.y_axis {
            issues.push(ValidationIssue::warning(
                &subject,
                "contributes to neither axis",
            ));
        }

        for (i, range) in model.ranges.iter().enumerate() {
            if range.end.is_some_and(|end| end <= range.start) {
                issues.push(ValidationIssue::error(
                    &subject,
                    format!("range {} ends before it starts", i + 1),
                ));
            }
            for (j, earlier) in model.ranges[..i].iter().enumerate() {
                if range.overlaps(earlier) {
                    issues.push(ValidationIssue::warning(
                        &subject,
                        format!("range {} overlaps range {}; range {} wins", i + 1, j + 1, j + 1),
                    ));
                }
            }
        }
        for (i, range) in model.date_ranges.iter().enumerate() {
            if range.end.is_some_and(|end| end <= range.start) {
                issues.push(ValidationIssue::error(
                    &subject,
                    format!("date range {} ends before it starts", i + 1),
                ));
            }
            for (j, earlier) in model.date_ranges[..i].iter().enumerate() {
                if range.overlaps(earlier) {
                    issues.push(ValidationIssue::warning(
                        &subject,
                        format!(
                            "date range {} overlaps date range {}; date range {} wins",
                            i + 1,
                            j + 1,
                            j + 1
                        ),
                    ));
                }
            }
        }

        if let Some(question) = config.question(&model.field_name) {
            if question.question_type.has_choices()
                && model.formula.is_none()
                && (!model.ranges.is_empty() || !model.date_ranges.is_empty())
            {
                issues.push(ValidationIssue::warning(
                    &subject,
                    "ranges are ignored; choice questions score by choice points",
                ));
            }
        }

        if let Some(formula) = &model.formula {
            match parse_with_depth(formula, max_depth) {
                Ok(expr) => {
                    if expr.uses_aggregates() {
                        issues.push(ValidationIssue::error(
                            &subject,
                            "aggregate functions are not allowed in scoring formulas",
                        ));
                    }
                    check_field_refs(&expr, fields, &subject, false, issues);
                }
                Err(e) => issues.push(ValidationIssue::error(&subject, e.to_string())),
            }
        }
    }
}

fn validate_recommendations(
    recommendations: &[Recommendation],
    fields: &HashSet<&str>,
    max_depth: usize,
    issues: &mut Vec<ValidationIssue>,
) {
    let mut seen_ids = HashSet::new();

    for rec in recommendations {
        let subject = format!("recommendation '{}'", rec.id);

        if !seen_ids.insert(rec.id.as_str()) {
            issues.push(ValidationIssue::error(&subject, "duplicate recommendation id"));
        }
        if rec.response_text.trim().is_empty() {
            issues.push(ValidationIssue::warning(&subject, "response_text is empty"));
        }
        match parse_with_depth(&rec.rule, max_depth) {
            Ok(expr) => check_field_refs(&expr, fields, &subject, true, issues),
            Err(ExprError::Syntax(e)) => issues.push(ValidationIssue::error(
                &subject,
                format!("rule `{}`: {e}", rec.rule),
            )),
            Err(e) => issues.push(ValidationIssue::error(&subject, e.to_string())),
        }
    }
}

fn check_field_refs(
    expr: &Expr,
    fields: &HashSet<&str>,
    subject: &str,
    scores_available: bool,
    issues: &mut Vec<ValidationIssue>,
) {
    for name in expr.field_refs() {
        if is_reserved(name) {
            if !scores_available {
                issues.push(ValidationIssue::warning(
                    subject,
                    format!("{{{name}}} is not available in scoring formulas"),
                ));
            }
        } else if !fields.contains(name) {
            issues.push(ValidationIssue::error(
                subject,
                format!("{{{name}}} does not match any question"),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::expr::DEFAULT_MAX_DEPTH;

    const VALID_TOML: &str = r#"
[tenant]
id = "acme-lending"
name = "Acme Lending"
version = 3
selection_mode = "all"

[[questions]]
number = 1
field_name = "income"
text = "What is your annual income?"
type = "I"

[[questions]]
number = 2
field_name = "employment"
text = "Employment status"
type = "CH"

[[questions.choices]]
text = "Full Time"
slug = "full_time"
points = 8

[[questions.choices]]
text = "Part Time"
points = 3

[[scoring_models]]
id = "income"
field_name = "income"
weight = 1.0
x_axis = true

[[scoring_models.ranges]]
start = 0
end = 50000
points = 5

[[scoring_models.ranges]]
start = 50000
points = 15

[[recommendations]]
id = "premium"
rule = "{income} >= 100000"
response_text = "Premium card"
affiliate_name = "Acme Bank"
priority = 1
"#;

    fn load(toml: &str) -> TenantConfig {
        parse_tenant_str(toml, &PathBuf::from("test.toml")).unwrap()
    }

    fn messages(config: &TenantConfig) -> Vec<String> {
        validate(config, DEFAULT_MAX_DEPTH)
            .iter()
            .map(ToString::to_string)
            .collect()
    }

    #[test]
    fn parse_valid_toml() {
        let config = load(VALID_TOML);
        assert_eq!(config.id, "acme-lending");
        assert_eq!(config.version, 3);
        assert_eq!(config.selection_mode, Some(SelectionMode::AllMatches));
        assert_eq!(config.questions.len(), 2);
        assert_eq!(config.questions[1].question_type, QuestionType::Choices);
        assert_eq!(config.questions[1].choices[0].slug.as_deref(), Some("full_time"));
        assert_eq!(config.scoring_models[0].ranges.len(), 2);
        assert_eq!(config.scoring_models[0].ranges[1].end, None);
        assert_eq!(
            config.recommendations[0].affiliate_name.as_deref(),
            Some("Acme Bank")
        );
        assert!(validate(&config, DEFAULT_MAX_DEPTH).is_empty());
    }

    #[test]
    fn parse_missing_optional_fields() {
        let config = load(
            r#"
[tenant]
id = "minimal"
name = "Minimal"
"#,
        );
        assert_eq!(config.version, 1);
        assert!(config.selection_mode.is_none());
        assert!(config.questions.is_empty());
        assert!(config.total_formula.is_none());
    }

    #[test]
    fn parse_malformed_toml() {
        let result = parse_tenant_str("this is not [valid toml }{", &PathBuf::from("bad.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn unknown_question_type_names_the_question() {
        let result = parse_tenant_str(
            r#"
[tenant]
id = "t"
name = "T"

[[questions]]
number = 1
field_name = "color"
text = "Favourite colour"
type = "Z"
"#,
            &PathBuf::from("t.toml"),
        );
        let err = format!("{:#}", result.unwrap_err());
        assert!(err.contains("color"));
        assert!(err.contains("unknown question type"));
    }

    #[test]
    fn validate_duplicates_and_bad_names() {
        let mut config = load(VALID_TOML);
        let mut dupe = config.questions[0].clone();
        dupe.number = 1;
        config.questions.push(dupe);
        config.questions[1].field_name = "bad-name".into();
        let msgs = messages(&config);
        assert!(msgs.iter().any(|m| m.contains("duplicate field_name")));
        assert!(msgs.iter().any(|m| m.contains("duplicate question number 1")));
        assert!(msgs.iter().any(|m| m.contains("field_name must match")));
    }

    #[test]
    fn validate_overlapping_ranges_is_a_warning() {
        let mut config = load(VALID_TOML);
        config.scoring_models[0].ranges[0].end = Some(60_000.0);
        let issues = validate(&config, DEFAULT_MAX_DEPTH);
        let overlap = issues
            .iter()
            .find(|i| i.message.contains("overlaps"))
            .unwrap();
        assert_eq!(overlap.severity, Severity::Warning);
        assert!(ensure_valid(&config, DEFAULT_MAX_DEPTH).is_ok());
    }

    #[test]
    fn validate_bad_rule_is_an_error() {
        let mut config = load(VALID_TOML);
        config.recommendations[0].rule = "{income} >= ".into();
        let err = ensure_valid(&config, DEFAULT_MAX_DEPTH).unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert!(err.issues[0].contains("recommendation 'premium'"));
        assert!(err.issues[0].contains("syntax error"));
    }

    #[test]
    fn validate_unknown_field_reference_is_an_error() {
        let mut config = load(VALID_TOML);
        config.recommendations[0].rule = "{incme} > 1 or {total_score} > 10".into();
        let issues = validate(&config, DEFAULT_MAX_DEPTH);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].severity, Severity::Error);
        assert!(issues[0].message.contains("{incme}"));

        let err = ensure_valid(&config, DEFAULT_MAX_DEPTH).unwrap_err();
        assert_eq!(err.issues.len(), 1);
        assert!(err.issues[0].contains("recommendation 'premium'"));
    }

    #[test]
    fn validate_unknown_field_in_formula_is_an_error() {
        let mut config = load(VALID_TOML);
        config.scoring_models[0].formula = Some("{income} / {savngs}".into());
        assert!(ensure_valid(&config, DEFAULT_MAX_DEPTH)
            .unwrap_err()
            .issues
            .iter()
            .any(|m| m.contains("{savngs}")));
    }

    #[test]
    fn validate_reserved_question_name_warns() {
        let mut config = load(VALID_TOML);
        config.questions[0].field_name = "total_score".into();
        config.scoring_models[0].field_name = "total_score".into();
        let issues = validate(&config, DEFAULT_MAX_DEPTH);
        assert!(issues
            .iter()
            .any(|i| i.severity == Severity::Warning && i.message.contains("reserved")));
    }

    #[test]
    fn validate_model_problems() {
        let mut config = load(VALID_TOML);
        let mut second = config.scoring_models[0].clone();
        second.id = "income_again".into();
        second.weight = -1.0;
        second.formula = Some("max({income})".into());
        config.scoring_models.push(second);
        let mut orphan = config.scoring_models[0].clone();
        orphan.id = "orphan".into();
        orphan.field_name = "nothing".into();
        config.scoring_models.push(orphan);
        let msgs = messages(&config);
        assert!(msgs.iter().any(|m| m.contains("already has a scoring model")));
        assert!(msgs.iter().any(|m| m.contains("weight must be")));
        assert!(msgs.iter().any(|m| m.contains("aggregate functions")));
        assert!(msgs.iter().any(|m| m.contains("no question with field_name 'nothing'")));
    }

    #[test]
    fn validate_slider_bounds() {
        let mut config = load(VALID_TOML);
        config.questions[0].question_type = QuestionType::Slider;
        assert!(messages(&config)
            .iter()
            .any(|m| m.contains("need both min_value and max_value")));
        config.questions[0].min_value = Some(10.0);
        config.questions[0].max_value = Some(1.0);
        assert!(messages(&config)
            .iter()
            .any(|m| m.contains("greater than max_value")));
    }

    #[test]
    fn load_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("acme.toml"), VALID_TOML).unwrap();
        std::fs::write(dir.path().join("broken.toml"), "not [ toml").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "ignored").unwrap();

        let tenants = load_tenant_directory(dir.path()).unwrap();
        assert_eq!(tenants.len(), 1);
        assert_eq!(tenants[0].id, "acme-lending");
    }
}
