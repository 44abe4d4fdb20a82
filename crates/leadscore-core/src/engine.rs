//! Central lead-scoring engine.
//!
//! Runs the per-lead pipeline (normalize answers, score, build the context,
//! select recommendations) against an immutable compiled snapshot of the
//! tenant configuration. `reload` swaps the snapshot atomically.

use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::cache::{CacheStats, CompiledConfig, ExpressionCache};
use crate::context::build_context;
use crate::error::EngineError;
use crate::expr::EvalLimits;
use crate::model::{Answers, Lead, Recommendation, SelectionMode, Submission, TenantConfig};
use crate::recommend::{select_recommendations, RuleFailure, Selection};
use crate::scoring::{compute_scores, Contribution, ScoreCard};
use crate::settings::Settings;

/// Configuration for the engine.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EngineOptions {
    pub limits: EvalLimits,
    /// Overrides the tenant's selection mode.
    pub selection_mode: Option<SelectionMode>,
    /// Reject submissions missing an answer for any question.
    pub require_all_answers: bool,
    /// Reject answers for fields no question defines.
    pub reject_unknown_fields: bool,
}

/// A matched recommendation as shown to the lead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchedRecommendation {
    pub id: String,
    pub response_text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliate_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliate_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub affiliate_link: Option<String>,
}

impl From<&Recommendation> for MatchedRecommendation {
    fn from(rec: &Recommendation) -> Self {
        Self {
            id: rec.id.clone(),
            response_text: rec.response_text.clone(),
            redirect_url: rec.redirect_url.clone(),
            affiliate_name: rec.affiliate_name.clone(),
            affiliate_image: rec.affiliate_image.clone(),
            affiliate_link: rec.affiliate_link.clone(),
        }
    }
}

/// The result of scoring one submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredLead {
    pub lead_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_lead_id: Option<String>,
    pub x_axis: f64,
    pub y_axis: f64,
    pub total_score: f64,
    pub timestamp: DateTime<Utc>,
    /// Tenant configuration version the lead was scored against.
    pub tenant_version: u32,
    /// Per-field contributions.
    pub answers: Vec<Contribution>,
    pub recommendations: Vec<MatchedRecommendation>,
    #[serde(default)]
    pub rule_failures: Vec<RuleFailure>,
}

impl ScoredLead {
    /// The storable lead for this result.
    pub fn to_lead(&self, answers: Answers) -> Lead {
        Lead {
            id: self.lead_id,
            external_lead_id: self.external_lead_id.clone(),
            answers,
            x_axis: self.x_axis,
            y_axis: self.y_axis,
            total_score: self.total_score,
            matched_recommendations: self.recommendations.iter().map(|r| r.id.clone()).collect(),
            created_at: self.timestamp,
            rescored_at: None,
        }
    }
}

/// Scores and recommendations for one set of answers.
struct Outcome {
    card: ScoreCard,
    selection: Selection,
}

/// The lead-scoring engine for one tenant.
pub struct Engine {
    snapshot: RwLock<Arc<CompiledConfig>>,
    /// Held for the whole compile-and-swap of a reload.
    reload_lock: Mutex<()>,
    cache: ExpressionCache,
    options: EngineOptions,
}

impl Engine {
    /// Build an engine. Malformed rules do not prevent construction; validate
    /// with [`crate::tenant::ensure_valid`] first to reject them.
    pub fn new(config: TenantConfig, options: EngineOptions) -> Self {
        let cache = ExpressionCache::new();
        let compiled = CompiledConfig::compile(
            config,
            &cache,
            options.limits.max_depth,
            options.selection_mode,
        );
        info!(
            tenant = %compiled.config.id,
            version = compiled.config.version,
            rules = compiled.rules.len(),
            models = compiled.models.len(),
            "engine ready"
        );
        Self {
            snapshot: RwLock::new(Arc::new(compiled)),
            reload_lock: Mutex::new(()),
            cache,
            options,
        }
    }

    pub fn from_settings(config: TenantConfig, settings: &Settings) -> Self {
        Self::new(config, settings.engine_options())
    }

    pub fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// The current compiled configuration.
    pub fn snapshot(&self) -> Arc<CompiledConfig> {
        Arc::clone(&self.snapshot.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Compile `config` and make it current. Evaluations already running keep
    /// the snapshot they started with.
    pub fn reload(&self, config: TenantConfig) {
        let _reloading = self.reload_lock.lock().unwrap_or_else(PoisonError::into_inner);
        let compiled = Arc::new(CompiledConfig::compile(
            config,
            &self.cache,
            self.options.limits.max_depth,
            self.options.selection_mode,
        ));
        let previous = {
            let mut current = self.snapshot.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *current, Arc::clone(&compiled))
        };
        info!(
            tenant = %compiled.config.id,
            from_version = previous.config.version,
            to_version = compiled.config.version,
            "tenant configuration reloaded"
        );
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Score a submission against the current configuration, dated today.
    pub fn score(&self, submission: &Submission) -> Result<ScoredLead, EngineError> {
        self.score_at(submission, Utc::now().date_naive())
    }

    /// Score with an explicit reference date for `today()` and `days()`.
    pub fn score_at(
        &self,
        submission: &Submission,
        reference_date: NaiveDate,
    ) -> Result<ScoredLead, EngineError> {
        let snapshot = self.snapshot();
        let answers = submission.answers.clone().normalize();
        let outcome = self.run(&snapshot, &answers, reference_date)?;

        let lead_id = submission.lead_id.unwrap_or_else(Uuid::new_v4);
        debug!(
            %lead_id,
            total = outcome.card.total,
            matched = outcome.selection.matched.len(),
            "lead scored"
        );

        Ok(ScoredLead {
            lead_id,
            external_lead_id: submission.external_lead_id.clone(),
            x_axis: outcome.card.x_axis,
            y_axis: outcome.card.y_axis,
            total_score: outcome.card.total,
            timestamp: Utc::now(),
            tenant_version: snapshot.config.version,
            answers: outcome.card.contributions,
            recommendations: outcome
                .selection
                .matched
                .iter()
                .map(MatchedRecommendation::from)
                .collect(),
            rule_failures: outcome.selection.failures,
        })
    }

    /// Recompute a stored lead against the current configuration. The input
    /// is left untouched; the result keeps its identity and answers.
    /// Indexed answers are folded the same way [`score`](Self::score) does.
    pub fn rescore(&self, lead: &Lead) -> Result<Lead, EngineError> {
        let snapshot = self.snapshot();
        let answers = lead.answers.clone().normalize();
        let outcome = self.run(&snapshot, &answers, Utc::now().date_naive())?;
        info!(
            lead_id = %lead.id,
            old_total = lead.total_score,
            new_total = outcome.card.total,
            "lead rescored"
        );

        Ok(Lead {
            id: lead.id,
            external_lead_id: lead.external_lead_id.clone(),
            answers: lead.answers.clone(),
            x_axis: outcome.card.x_axis,
            y_axis: outcome.card.y_axis,
            total_score: outcome.card.total,
            matched_recommendations: outcome
                .selection
                .matched
                .iter()
                .map(|r| r.id.clone())
                .collect(),
            created_at: lead.created_at,
            rescored_at: Some(Utc::now()),
        })
    }

    fn run(
        &self,
        snapshot: &CompiledConfig,
        answers: &Answers,
        reference_date: NaiveDate,
    ) -> Result<Outcome, EngineError> {
        let questions = &snapshot.config.questions;

        if self.options.reject_unknown_fields {
            if let Some(unknown) = answers
                .iter()
                .find(|a| snapshot.config.question(&a.field_name).is_none())
            {
                return Err(EngineError::UnknownField(unknown.field_name.clone()));
            }
        }

        if self.options.require_all_answers {
            let missing: Vec<String> = questions
                .iter()
                .filter(|q| answers.get(&q.field_name).is_none_or(|r| r.is_empty()))
                .map(|q| q.field_name.clone())
                .collect();
            if !missing.is_empty() {
                return Err(EngineError::MissingAnswers(missing));
            }
        }

        let limits = &self.options.limits;
        let card = compute_scores(
            questions,
            &snapshot.models,
            answers,
            snapshot.total_formula.as_ref(),
            limits,
            reference_date,
        )?;

        let ctx = build_context(questions, answers, Some(&card.derived()), reference_date);
        let selection =
            select_recommendations(&ctx, &snapshot.rules, snapshot.selection_mode, limits);

        Ok(Outcome { card, selection })
    }
}
