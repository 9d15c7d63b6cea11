use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One configurable evaluation dimension.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Criterion {
    pub id: String,
    pub name: String,
    #[serde(default = "default_weight")]
    pub weight: f64,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub prompt: String,
    #[serde(default = "default_max_score")]
    pub max_score: f64,
}

fn default_weight() -> f64 {
    1.0
}

fn default_enabled() -> bool {
    true
}

fn default_max_score() -> f64 {
    10.0
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CriterionScore {
    pub criterion_id: String,
    pub score: f64,
    pub weight: f64,
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Rating {
    pub id: i64,
    pub content_item_id: i64,
    pub total_score: f64,
    pub scores: Vec<CriterionScore>,
    pub rated_at: DateTime<Utc>,
}

/// `Σ score × weight`.
pub fn weighted_total(scores: &[CriterionScore]) -> f64 {
    scores.iter().map(|s| s.score * s.weight).sum()
}
