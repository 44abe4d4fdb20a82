//! Batch scoring report with JSON persistence.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::ScoredLead;
use crate::model::TenantConfig;
use crate::statistics::{
    qualification_counts, recommendation_effectiveness, summarize_leads, LeadSummary,
    Qualification, RecommendationTrigger,
};

/// The outcome of scoring a batch of submissions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchReport {
    /// Unique report identifier.
    pub id: Uuid,
    pub created_at: DateTime<Utc>,
    pub tenant: TenantSummary,
    pub results: Vec<ScoredLead>,
    /// Submissions that could not be scored.
    pub failures: Vec<LeadFailure>,
    pub summary: LeadSummary,
    pub qualification: BTreeMap<Qualification, usize>,
    pub recommendation_triggers: Vec<RecommendationTrigger>,
    /// Total wall-clock duration in milliseconds.
    pub duration_ms: u64,
}

/// Summary of the tenant (without the full configuration).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TenantSummary {
    pub id: String,
    pub name: String,
    pub version: u32,
}

impl From<&TenantConfig> for TenantSummary {
    fn from(config: &TenantConfig) -> Self {
        Self {
            id: config.id.clone(),
            name: config.name.clone(),
            version: config.version,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadFailure {
    /// Position of the submission in the input.
    pub index: usize,
    #[serde(default)]
    pub lead_id: Option<Uuid>,
    pub error: String,
}

impl BatchReport {
    pub fn new(
        tenant: TenantSummary,
        results: Vec<ScoredLead>,
        failures: Vec<LeadFailure>,
        duration_ms: u64,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            created_at: Utc::now(),
            tenant,
            summary: summarize_leads(&results),
            qualification: qualification_counts(&results),
            recommendation_triggers: recommendation_effectiveness(&results),
            results,
            failures,
            duration_ms,
        }
    }

    /// Default file name inside an output directory.
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}.json",
            self.tenant.id,
            self.created_at.format("%Y%m%dT%H%M%S")
        )
    }

    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: BatchReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }
}
