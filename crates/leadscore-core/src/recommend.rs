//! Recommendation selection.
//!
//! Rules are evaluated in ascending priority against a context that already
//! holds the derived scores. A rule that cannot be parsed or evaluated is
//! logged, recorded as a failure, and skipped; it never aborts the selection.

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::cache::CompiledExpr;
use crate::context::Context;
use crate::expr::EvalLimits;
use crate::model::{Recommendation, SelectionMode};

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub recommendation: Recommendation,
    pub expr: CompiledExpr,
}

/// A rule that was skipped because it failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleFailure {
    pub rule_id: String,
    pub expression: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selection {
    /// Matching recommendations in evaluation order.
    pub matched: Vec<Recommendation>,
    pub failures: Vec<RuleFailure>,
}

impl Selection {
    pub fn matched_ids(&self) -> Vec<&str> {
        self.matched.iter().map(|r| r.id.as_str()).collect()
    }
}

pub fn select_recommendations(
    ctx: &Context,
    rules: &[CompiledRule],
    mode: SelectionMode,
    limits: &EvalLimits,
) -> Selection {
    let mut ordered: Vec<&CompiledRule> = rules.iter().collect();
    ordered.sort_by_key(|r| r.recommendation.priority);

    let mut selection = Selection::default();
    for rule in ordered {
        let id = &rule.recommendation.id;
        match rule.expr.evaluate(ctx, limits) {
            Ok(value) => {
                let matched = value.is_truthy();
                debug!(rule_id = %id, matched, "evaluated recommendation rule");
                if matched {
                    selection.matched.push(rule.recommendation.clone());
                    if mode == SelectionMode::FirstMatch {
                        break;
                    }
                }
            }
            Err(e) => {
                error!(
                    rule_id = %id,
                    rule = %rule.expr.source,
                    "recommendation rule failed: {e}"
                );
                selection.failures.push(RuleFailure {
                    rule_id: id.clone(),
                    expression: rule.expr.source.clone(),
                    error: e.to_string(),
                });
            }
        }
    }
    selection
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::expr::{Value, DEFAULT_MAX_DEPTH};

    fn rule(id: &str, text: &str, priority: i32) -> CompiledRule {
        CompiledRule {
            recommendation: Recommendation {
                id: id.into(),
                rule: text.into(),
                response_text: format!("Offer {id}"),
                redirect_url: None,
                affiliate_name: None,
                affiliate_image: None,
                affiliate_link: None,
                priority,
            },
            expr: CompiledExpr::parse(format!("rule:{id}"), text, DEFAULT_MAX_DEPTH),
        }
    }

    fn ctx() -> Context {
        let mut ctx = Context::new(NaiveDate::from_ymd_opt(2024, 7, 1).unwrap());
        ctx.insert("credit_score", Value::Number(750.0));
        ctx.insert("employment_years", Value::Number(3.0));
        ctx.insert("total_score", Value::Number(33.5));
        ctx
    }

    fn select(rules: &[CompiledRule], mode: SelectionMode) -> Selection {
        select_recommendations(&ctx(), rules, mode, &EvalLimits::default())
    }

    fn abc() -> Vec<CompiledRule> {
        vec![
            rule("A", "{credit_score} > 700", 0),
            rule("B", "{total_score} >= 30", 0),
            rule("C", "{credit_score} > 800", 0),
        ]
    }

    #[test]
    fn first_match_returns_only_the_first() {
        let selection = select(&abc(), SelectionMode::FirstMatch);
        assert_eq!(selection.matched_ids(), vec!["A"]);
        assert!(selection.failures.is_empty());
    }

    #[test]
    fn all_matches_returns_every_match_in_order() {
        let selection = select(&abc(), SelectionMode::AllMatches);
        assert_eq!(selection.matched_ids(), vec!["A", "B"]);
    }

    #[test]
    fn priority_orders_evaluation() {
        let rules = vec![
            rule("low", "true", 10),
            rule("high", "true", 1),
            rule("also_high", "true", 1),
        ];
        let selection = select(&rules, SelectionMode::AllMatches);
        assert_eq!(selection.matched_ids(), vec!["high", "also_high", "low"]);
        let selection = select(&rules, SelectionMode::FirstMatch);
        assert_eq!(selection.matched_ids(), vec!["high"]);
    }

    #[test]
    fn malformed_rule_is_isolated() {
        let rules = vec![
            rule("A", "{credit_score} > 700", 0),
            rule("broken", "{credit_score} >> 700", 0),
            rule("B", "{employment_years} >= 2", 0),
        ];
        let selection = select(&rules, SelectionMode::AllMatches);
        assert_eq!(selection.matched_ids(), vec!["A", "B"]);
        assert_eq!(selection.failures.len(), 1);
        assert_eq!(selection.failures[0].rule_id, "broken");
        assert_eq!(selection.failures[0].expression, "{credit_score} >> 700");
    }

    #[test]
    fn evaluation_error_is_recorded_and_skipped() {
        let rules = vec![
            rule("divides", "{credit_score} / 0 > 1", 0),
            rule("ok", "{employment_years} >= 2", 0),
        ];
        let selection = select(&rules, SelectionMode::FirstMatch);
        assert_eq!(selection.matched_ids(), vec!["ok"]);
        assert_eq!(selection.failures.len(), 1);
        assert!(selection.failures[0].error.contains("division by zero"));
    }

    #[test]
    fn rule_over_missing_field_does_not_match() {
        let rules = vec![rule("missing", "{bankruptcies} == 0", 0)];
        let selection = select(&rules, SelectionMode::AllMatches);
        assert!(selection.matched.is_empty());
        assert!(selection.failures.is_empty());
    }

    #[test]
    fn leading_if_is_accepted() {
        let rules = vec![rule("doc", "If {credit_score} > 700 and {employment_years} >= 2", 0)];
        let selection = select(&rules, SelectionMode::FirstMatch);
        assert_eq!(selection.matched_ids(), vec!["doc"]);
    }
}
