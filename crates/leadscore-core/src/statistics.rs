//! Lead analytics: averages, score distribution, qualification categories,
//! recommendation triggers and answer distribution.

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::engine::ScoredLead;
use crate::model::Lead;

/// Upper bound (exclusive) of the `low` bucket.
pub const LOW_THRESHOLD: f64 = 20.0;
/// Upper bound (exclusive) of the `medium` bucket.
pub const HIGH_THRESHOLD: f64 = 40.0;

/// Anything that carries lead scores.
pub trait ScoredRecord {
    fn x_axis(&self) -> f64;
    fn y_axis(&self) -> f64;
    fn total_score(&self) -> f64;
    fn recommendation_ids(&self) -> Vec<&str>;
    /// `(field_name, value)` pairs, one per answered item.
    fn answer_values(&self) -> Vec<(&str, String)>;
}

impl ScoredRecord for Lead {
    fn x_axis(&self) -> f64 {
        self.x_axis
    }
    fn y_axis(&self) -> f64 {
        self.y_axis
    }
    fn total_score(&self) -> f64 {
        self.total_score
    }
    fn recommendation_ids(&self) -> Vec<&str> {
        self.matched_recommendations.iter().map(String::as_str).collect()
    }
    fn answer_values(&self) -> Vec<(&str, String)> {
        self.answers
            .iter()
            .flat_map(|a| {
                a.response
                    .items(false)
                    .into_iter()
                    .map(move |item| (a.field_name.as_str(), item.to_string()))
            })
            .collect()
    }
}

impl ScoredRecord for ScoredLead {
    fn x_axis(&self) -> f64 {
        self.x_axis
    }
    fn y_axis(&self) -> f64 {
        self.y_axis
    }
    fn total_score(&self) -> f64 {
        self.total_score
    }
    fn recommendation_ids(&self) -> Vec<&str> {
        self.recommendations.iter().map(|r| r.id.as_str()).collect()
    }
    fn answer_values(&self) -> Vec<(&str, String)> {
        self.answers
            .iter()
            .flat_map(|c| {
                let items = match &c.response {
                    serde_json::Value::Array(items) => items.clone(),
                    serde_json::Value::Null => Vec::new(),
                    other => vec![other.clone()],
                };
                items.into_iter().map(move |item| {
                    let value = match item {
                        serde_json::Value::String(s) => s,
                        other => other.to_string(),
                    };
                    (c.field_name.as_str(), value)
                })
            })
            .collect()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreDistribution {
    pub low: usize,
    pub medium: usize,
    pub high: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LeadSummary {
    pub total_leads: usize,
    pub avg_x_axis: f64,
    pub avg_y_axis: f64,
    pub avg_total_score: f64,
    pub distribution: ScoreDistribution,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Bucket a total score: `low < 20 <= medium < 40 <= high`.
pub fn bucket(total: f64, distribution: &mut ScoreDistribution) {
    if total < LOW_THRESHOLD {
        distribution.low += 1;
    } else if total < HIGH_THRESHOLD {
        distribution.medium += 1;
    } else {
        distribution.high += 1;
    }
}

/// Averages (rounded to two decimals) and the total-score distribution.
pub fn summarize_leads<R: ScoredRecord>(leads: &[R]) -> LeadSummary {
    let mut distribution = ScoreDistribution::default();
    for lead in leads {
        bucket(lead.total_score(), &mut distribution);
    }

    let n = leads.len().max(1) as f64;
    let avg = |f: fn(&R) -> f64| round2(leads.iter().map(f).sum::<f64>() / n);

    LeadSummary {
        total_leads: leads.len(),
        avg_x_axis: avg(R::x_axis),
        avg_y_axis: avg(R::y_axis),
        avg_total_score: avg(R::total_score),
        distribution,
    }
}

/// Qualification category from the X/Y matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Qualification {
    A,
    B,
    C,
    D,
}

impl Qualification {
    /// Decided on the weaker axis: both >= 80 is `A`, >= 60 `B`, >= 40 `C`.
    pub fn from_axes(x_axis: f64, y_axis: f64) -> Self {
        let weaker = x_axis.min(y_axis);
        if weaker >= 80.0 {
            Qualification::A
        } else if weaker >= 60.0 {
            Qualification::B
        } else if weaker >= 40.0 {
            Qualification::C
        } else {
            Qualification::D
        }
    }
}

impl fmt::Display for Qualification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Qualification::A => "A",
            Qualification::B => "B",
            Qualification::C => "C",
            Qualification::D => "D",
        };
        f.write_str(label)
    }
}

pub fn qualification_counts<R: ScoredRecord>(leads: &[R]) -> BTreeMap<Qualification, usize> {
    let mut counts = BTreeMap::new();
    for lead in leads {
        *counts
            .entry(Qualification::from_axes(lead.x_axis(), lead.y_axis()))
            .or_default() += 1;
    }
    counts
}

/// How many leads triggered each recommendation, most triggered first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationTrigger {
    pub recommendation_id: String,
    pub leads: usize,
}

pub fn recommendation_effectiveness<R: ScoredRecord>(leads: &[R]) -> Vec<RecommendationTrigger> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for lead in leads {
        for id in lead.recommendation_ids() {
            *counts.entry(id).or_default() += 1;
        }
    }

    let mut triggers: Vec<RecommendationTrigger> = counts
        .into_iter()
        .map(|(id, leads)| RecommendationTrigger {
            recommendation_id: id.to_string(),
            leads,
        })
        .collect();
    triggers.sort_by(|a, b| {
        b.leads
            .cmp(&a.leads)
            .then_with(|| a.recommendation_id.cmp(&b.recommendation_id))
    });
    triggers
}

/// Per field, how often each answer value was given.
pub fn answer_distribution<R: ScoredRecord>(
    leads: &[R],
) -> BTreeMap<String, BTreeMap<String, usize>> {
    let mut distribution: BTreeMap<String, BTreeMap<String, usize>> = BTreeMap::new();
    for lead in leads {
        for (field, value) in lead.answer_values() {
            *distribution
                .entry(field.to_string())
                .or_default()
                .entry(value)
                .or_default() += 1;
        }
    }
    distribution
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use uuid::Uuid;

    use super::*;
    use crate::model::{Answers, Response};

    fn lead(x: f64, y: f64, recs: &[&str], answers: Answers) -> Lead {
        Lead {
            id: Uuid::new_v4(),
            external_lead_id: None,
            answers,
            x_axis: x,
            y_axis: y,
            total_score: x + y,
            matched_recommendations: recs.iter().map(|r| r.to_string()).collect(),
            created_at: Utc::now(),
            rescored_at: None,
        }
    }

    #[test]
    fn summary_averages_and_buckets() {
        let leads = vec![
            lead(5.0, 5.0, &[], Answers::new()),
            lead(10.0, 10.0, &[], Answers::new()),
            lead(20.0, 19.999, &[], Answers::new()),
            lead(30.0, 10.0, &[], Answers::new()),
        ];
        let summary = summarize_leads(&leads);
        assert_eq!(summary.total_leads, 4);
        assert_eq!(summary.avg_x_axis, 16.25);
        assert_eq!(summary.avg_y_axis, 11.25);
        assert_eq!(summary.avg_total_score, 27.5);
        assert_eq!(
            summary.distribution,
            ScoreDistribution {
                low: 1,
                medium: 2,
                high: 1
            }
        );
    }

    #[test]
    fn empty_summary() {
        let summary = summarize_leads::<Lead>(&[]);
        assert_eq!(summary.total_leads, 0);
        assert_eq!(summary.avg_total_score, 0.0);
    }

    #[test]
    fn qualification_matrix() {
        assert_eq!(Qualification::from_axes(85.0, 90.0), Qualification::A);
        assert_eq!(Qualification::from_axes(85.0, 79.9), Qualification::B);
        assert_eq!(Qualification::from_axes(40.0, 100.0), Qualification::C);
        assert_eq!(Qualification::from_axes(100.0, 39.0), Qualification::D);

        let leads = vec![
            lead(90.0, 90.0, &[], Answers::new()),
            lead(10.0, 90.0, &[], Answers::new()),
            lead(5.0, 5.0, &[], Answers::new()),
        ];
        let counts = qualification_counts(&leads);
        assert_eq!(counts.get(&Qualification::A), Some(&1));
        assert_eq!(counts.get(&Qualification::D), Some(&2));
    }

    #[test]
    fn recommendation_triggers_sorted_by_count() {
        let leads = vec![
            lead(0.0, 0.0, &["b", "a"], Answers::new()),
            lead(0.0, 0.0, &["a"], Answers::new()),
            lead(0.0, 0.0, &["c"], Answers::new()),
        ];
        let triggers = recommendation_effectiveness(&leads);
        let flat: Vec<(&str, usize)> = triggers
            .iter()
            .map(|t| (t.recommendation_id.as_str(), t.leads))
            .collect();
        assert_eq!(flat, vec![("a", 2), ("b", 1), ("c", 1)]);
    }

    #[test]
    fn answer_distribution_counts_items() {
        let leads = vec![
            lead(
                0.0,
                0.0,
                &[],
                Answers::new()
                    .with("state", Response::Text("CA".into()))
                    .with(
                        "products",
                        Response::List(vec![
                            Response::Text("Loan".into()),
                            Response::Text("Card".into()),
                        ]),
                    ),
            ),
            lead(
                0.0,
                0.0,
                &[],
                Answers::new().with("state", Response::Text("CA".into())),
            ),
        ];
        let distribution = answer_distribution(&leads);
        assert_eq!(distribution["state"]["CA"], 2);
        assert_eq!(distribution["products"]["Loan"], 1);
        assert_eq!(distribution["products"]["Card"], 1);
    }
}
