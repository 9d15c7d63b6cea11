use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::models::{ContentItem, Criterion};

/// Reply to a single-criterion evaluation.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct EvaluationReply {
    pub score: f64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GeneratedArticle {
    pub headline: String,
    pub content: String,
    #[serde(default, alias = "wordCount")]
    pub word_count: Option<i64>,
}

impl GeneratedArticle {
    pub fn effective_word_count(&self) -> i64 {
        self.word_count
            .filter(|n| *n > 0)
            .unwrap_or_else(|| self.content.split_whitespace().count() as i64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactCheckReply {
    pub accuracy: f64,
    pub timeliness: f64,
    #[serde(alias = "intentAlignment")]
    pub intent_alignment: f64,
    #[serde(default)]
    pub passed: bool,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DedupReply {
    #[serde(default)]
    pub groups: Vec<DedupReplyGroup>,
    #[serde(default, alias = "uniqueIndices")]
    pub unique_indices: Vec<usize>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct DedupReplyGroup {
    #[serde(alias = "primaryIndex")]
    pub primary_index: usize,
    #[serde(default, alias = "duplicateIndices")]
    pub duplicate_indices: Vec<usize>,
    #[serde(default)]
    pub rationale: String,
}

// The capabilities return raw model text; decoding and validation belong to
// the pipeline stage that consumes them.

#[async_trait]
pub trait Evaluator: Send + Sync {
    async fn evaluate(&self, criterion: &Criterion, item: &ContentItem) -> Result<String>;
}

#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, item: &ContentItem) -> Result<String>;

    /// One subject line for the day's lineup.
    async fn subject_line(&self, headlines: &[String]) -> Result<String>;
}

#[async_trait]
pub trait FactChecker: Send + Sync {
    async fn check(&self, article: &GeneratedArticle, source: &ContentItem) -> Result<String>;
}

#[async_trait]
pub trait Deduplicator: Send + Sync {
    async fn group(&self, items: &[ContentItem]) -> Result<String>;
}
