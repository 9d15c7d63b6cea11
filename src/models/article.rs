use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Article {
    pub id: i64,
    pub campaign_id: i64,
    pub content_item_id: Option<i64>,
    pub is_manual: bool,
    pub headline: String,
    pub content: String,
    pub word_count: i64,
    pub rank: Option<i64>,
    pub is_active: bool,
    pub skipped: bool,
    pub fact_check_score: Option<f64>,
    pub fact_check_details: Option<serde_json::Value>,
    pub review_position: Option<i64>,
    pub final_position: Option<i64>,
    pub created_at: DateTime<Utc>,
}

impl Article {
    /// Active and not skipped by an editor.
    pub fn is_sendable(&self) -> bool {
        self.is_active && !self.skipped
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewArticle {
    pub campaign_id: i64,
    pub content_item_id: Option<i64>,
    pub is_manual: bool,
    pub headline: String,
    pub content: String,
    pub word_count: i64,
}

impl NewArticle {
    /// An editor-written article; it skips generation and fact-checking.
    pub fn manual(campaign_id: i64, headline: String, content: String) -> Self {
        let word_count = content.split_whitespace().count() as i64;
        Self {
            campaign_id,
            content_item_id: None,
            is_manual: true,
            headline,
            content,
            word_count,
        }
    }
}

/// Fact-check result stored together with a generated article.
#[derive(Debug, Clone, PartialEq)]
pub struct FactCheckRecord {
    /// Lineup rank for a passing article; `None` keeps it inactive.
    pub rank: Option<i64>,
    pub score: Option<f64>,
    pub details: serde_json::Value,
}

impl FactCheckRecord {
    pub fn passed(rank: i64, score: f64, details: serde_json::Value) -> Self {
        Self {
            rank: Some(rank),
            score: Some(score),
            details,
        }
    }

    pub fn rejected(score: Option<f64>, details: serde_json::Value) -> Self {
        Self {
            rank: None,
            score,
            details,
        }
    }
}
