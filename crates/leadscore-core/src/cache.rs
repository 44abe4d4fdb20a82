//! Parsed-expression cache and compiled tenant snapshots.
//!
//! Parsing happens once per distinct (id, text) pair. A [`CompiledConfig`] is
//! immutable after construction and is shared behind an `Arc`, so a reload
//! never changes the rules an in-flight evaluation is using.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::context::Context;
use crate::error::{ExprError, SyntaxError};
use crate::expr::{evaluate_with_limits, parse_with_depth, EvalLimits, Expr, Value};
use crate::model::{SelectionMode, TenantConfig};
use crate::recommend::CompiledRule;
use crate::scoring::CompiledModel;

/// An expression with its origin. Text that failed to parse is kept along
/// with the error, which surfaces whenever the expression is used.
#[derive(Debug, Clone)]
pub struct CompiledExpr {
    pub id: String,
    pub source: String,
    parsed: Result<Arc<Expr>, ExprError>,
}

impl CompiledExpr {
    /// Parse without going through a cache.
    pub fn parse(id: impl Into<String>, source: impl Into<String>, max_depth: usize) -> Self {
        let source = source.into();
        let parsed = parse_with_depth(&source, max_depth).map(Arc::new);
        Self {
            id: id.into(),
            source,
            parsed,
        }
    }

    pub fn expr(&self) -> Result<&Expr, &ExprError> {
        self.parsed.as_deref()
    }

    pub fn error(&self) -> Option<&ExprError> {
        self.parsed.as_ref().err()
    }

    pub fn evaluate(&self, ctx: &Context, limits: &EvalLimits) -> Result<Value, ExprError> {
        let expr = self.parsed.as_ref().map_err(Clone::clone)?;
        evaluate_with_limits(expr, ctx, limits)
    }

    /// Scoring formulas see one lead's answers, never a collection of leads.
    fn forbid_aggregates(mut self) -> Self {
        if matches!(&self.parsed, Ok(expr) if expr.uses_aggregates()) {
            self.parsed = Err(SyntaxError::new(
                0,
                "aggregate functions are not allowed in scoring formulas",
            )
            .into());
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CacheKey {
    id: String,
    text_hash: u64,
}

impl CacheKey {
    fn new(id: &str, source: &str, max_depth: usize) -> Self {
        let mut hasher = DefaultHasher::new();
        source.hash(&mut hasher);
        max_depth.hash(&mut hasher);
        Self {
            id: id.to_string(),
            text_hash: hasher.finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: usize,
    pub misses: usize,
}

/// Parsed expressions keyed by expression id and a hash of the text.
#[derive(Debug, Default)]
pub struct ExpressionCache {
    entries: RwLock<HashMap<CacheKey, Result<Arc<Expr>, ExprError>>>,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl ExpressionCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the cached parse of `source`, parsing on a miss.
    pub fn compile(&self, id: &str, source: &str, max_depth: usize) -> CompiledExpr {
        let key = CacheKey::new(id, source, max_depth);

        let cached = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        let parsed = match cached {
            Some(parsed) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                parsed
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                let parsed = parse_with_depth(source, max_depth).map(Arc::new);
                self.entries
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .insert(key, parsed.clone());
                parsed
            }
        };

        CompiledExpr {
            id: id.to_string(),
            source: source.to_string(),
            parsed,
        }
    }

    /// Drop every entry not produced by `live`.
    fn retain(&self, live: &HashSet<CacheKey>) {
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let before = entries.len();
        entries.retain(|key, _| live.contains(key));
        let pruned = before - entries.len();
        if pruned > 0 {
            debug!(pruned, "pruned stale expressions from cache");
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self
                .entries
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .len(),
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
        }
    }
}

/// Everything needed to score a lead, parsed and ordered.
#[derive(Debug, Clone)]
pub struct CompiledConfig {
    pub config: TenantConfig,
    pub models: Vec<CompiledModel>,
    /// Recommendation rules in evaluation order.
    pub rules: Vec<CompiledRule>,
    pub total_formula: Option<CompiledExpr>,
    pub selection_mode: SelectionMode,
    pub compiled_at: DateTime<Utc>,
}

impl CompiledConfig {
    /// Compile `config`, reusing parses from `cache` and pruning entries the
    /// new configuration no longer uses.
    ///
    /// Malformed expressions do not fail compilation: a bad rule is skipped
    /// when recommendations are selected, a bad formula fails the leads it
    /// scores. Use [`crate::tenant::validate`] to reject such configurations
    /// up front.
    pub fn compile(
        config: TenantConfig,
        cache: &ExpressionCache,
        max_depth: usize,
        mode_override: Option<SelectionMode>,
    ) -> Self {
        let mut live = HashSet::new();
        let mut compile = |id: String, source: &str| {
            live.insert(CacheKey::new(&id, source, max_depth));
            cache.compile(&id, source, max_depth)
        };

        let models = config
            .scoring_models
            .iter()
            .map(|model| CompiledModel {
                formula: model.formula.as_deref().map(|f| {
                    compile(format!("model:{}", model.id), f).forbid_aggregates()
                }),
                model: model.clone(),
            })
            .collect();

        let mut ordered: Vec<_> = config.recommendations.iter().collect();
        ordered.sort_by_key(|r| r.priority);
        let rules: Vec<CompiledRule> = ordered
            .into_iter()
            .map(|rec| CompiledRule {
                expr: compile(format!("rule:{}", rec.id), &rec.rule),
                recommendation: rec.clone(),
            })
            .collect();

        let total_formula = config
            .total_formula
            .as_deref()
            .map(|f| compile("total_formula".to_string(), f));

        cache.retain(&live);

        for rule in &rules {
            if let Some(err) = rule.expr.error() {
                warn!(
                    tenant = %config.id,
                    rule_id = %rule.recommendation.id,
                    rule = %rule.expr.source,
                    "recommendation rule does not parse and will be skipped: {err}"
                );
            }
        }

        let selection_mode = mode_override
            .or(config.selection_mode)
            .unwrap_or_default();

        Self {
            models,
            rules,
            total_formula,
            selection_mode,
            compiled_at: Utc::now(),
            config,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::DEFAULT_MAX_DEPTH;
    use crate::model::{Recommendation, ScoringModel};

    fn rec(id: &str, rule: &str, priority: i32) -> Recommendation {
        Recommendation {
            id: id.into(),
            rule: rule.into(),
            response_text: format!("text for {id}"),
            redirect_url: None,
            affiliate_name: None,
            affiliate_image: None,
            affiliate_link: None,
            priority,
        }
    }

    fn config(recommendations: Vec<Recommendation>) -> TenantConfig {
        TenantConfig {
            id: "t".into(),
            name: "Tenant".into(),
            version: 1,
            questions: vec![],
            scoring_models: vec![],
            recommendations,
            total_formula: None,
            selection_mode: None,
        }
    }

    #[test]
    fn cache_hits_on_same_id_and_text() {
        let cache = ExpressionCache::new();
        let a = cache.compile("rule:a", "{x} > 1", DEFAULT_MAX_DEPTH);
        let b = cache.compile("rule:a", "{x} > 1", DEFAULT_MAX_DEPTH);
        assert!(a.expr().is_ok());
        assert_eq!(a.expr().unwrap(), b.expr().unwrap());
        let stats = cache.stats();
        assert_eq!((stats.entries, stats.hits, stats.misses), (1, 1, 1));

        cache.compile("rule:a", "{x} > 2", DEFAULT_MAX_DEPTH);
        assert_eq!(cache.stats().misses, 2);
    }

    #[test]
    fn malformed_text_is_kept_with_its_error() {
        let cache = ExpressionCache::new();
        let compiled = cache.compile("rule:bad", "{x} >", DEFAULT_MAX_DEPTH);
        assert!(matches!(compiled.error(), Some(ExprError::Syntax(_))));
        let ctx = Context::today();
        assert!(compiled.evaluate(&ctx, &EvalLimits::default()).is_err());
    }

    #[test]
    fn recompiling_reuses_unchanged_rules_and_prunes_stale_ones() {
        let cache = ExpressionCache::new();
        CompiledConfig::compile(
            config(vec![rec("a", "{x} > 1", 0), rec("b", "{y} > 1", 0)]),
            &cache,
            DEFAULT_MAX_DEPTH,
            None,
        );
        assert_eq!(cache.stats().misses, 2);

        CompiledConfig::compile(
            config(vec![rec("a", "{x} > 1", 0), rec("c", "{z} > 1", 0)]),
            &cache,
            DEFAULT_MAX_DEPTH,
            None,
        );
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 3);
        assert_eq!(stats.entries, 2);
    }

    #[test]
    fn rules_are_ordered_by_priority_then_declaration() {
        let compiled = CompiledConfig::compile(
            config(vec![
                rec("late", "true", 5),
                rec("first", "true", 1),
                rec("second", "true", 1),
            ]),
            &ExpressionCache::new(),
            DEFAULT_MAX_DEPTH,
            None,
        );
        let ids: Vec<&str> = compiled
            .rules
            .iter()
            .map(|r| r.recommendation.id.as_str())
            .collect();
        assert_eq!(ids, vec!["first", "second", "late"]);
    }

    #[test]
    fn aggregates_are_rejected_in_formulas() {
        let mut cfg = config(vec![]);
        cfg.scoring_models.push(ScoringModel {
            id: "kids".into(),
            field_name: "kids".into(),
            weight: 1.0,
            x_axis: true,
            y_axis: false,
            formula: Some("sum({kids})".into()),
            ranges: vec![],
            date_ranges: vec![],
        });
        let compiled =
            CompiledConfig::compile(cfg, &ExpressionCache::new(), DEFAULT_MAX_DEPTH, None);
        let formula = compiled.models[0].formula.as_ref().unwrap();
        assert!(formula
            .error()
            .unwrap()
            .to_string()
            .contains("aggregate functions are not allowed"));
    }

    #[test]
    fn selection_mode_override_wins() {
        let mut cfg = config(vec![]);
        cfg.selection_mode = Some(SelectionMode::AllMatches);
        let cache = ExpressionCache::new();
        let compiled = CompiledConfig::compile(cfg.clone(), &cache, DEFAULT_MAX_DEPTH, None);
        assert_eq!(compiled.selection_mode, SelectionMode::AllMatches);
        let compiled = CompiledConfig::compile(
            cfg,
            &cache,
            DEFAULT_MAX_DEPTH,
            Some(SelectionMode::FirstMatch),
        );
        assert_eq!(compiled.selection_mode, SelectionMode::FirstMatch);
    }
}
