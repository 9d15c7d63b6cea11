//! Scripted stand-ins for the AI capabilities, shared by the pipeline tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;

use crate::ai::{Deduplicator, Evaluator, FactChecker, GeneratedArticle, Generator};
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{ContentItem, Criterion, NewContentItem};

pub fn criterion(id: &str, weight: f64) -> Criterion {
    Criterion {
        id: id.to_string(),
        name: id.to_string(),
        weight,
        enabled: true,
        prompt: format!("Rate {}", id),
        max_score: 10.0,
    }
}

pub async fn insert_item(repo: &Repository, campaign_id: i64, title: &str) -> ContentItem {
    let slug = title.to_lowercase().replace(' ', "-");
    repo.insert_content_item_if_new(
        Some(campaign_id),
        NewContentItem {
            source_id: "test-feed".to_string(),
            external_id: None,
            title: title.to_string(),
            link: format!("https://news.example/{}", slug),
            description: Some(format!("About {}", title)),
            body: None,
            author: None,
            image_url: None,
            published_at: None,
        },
        Utc::now(),
    )
    .await
    .unwrap()
    .unwrap()
}

fn unavailable() -> AppError {
    AppError::ClaudeApi("service unavailable".to_string())
}

/// Replies keyed by criterion id, or by item title.
pub struct ScriptedEvaluator {
    replies: HashMap<String, String>,
    by_title: bool,
}

impl ScriptedEvaluator {
    pub fn new(replies: &[(&str, &str)]) -> Self {
        Self {
            replies: replies
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            by_title: false,
        }
    }

    pub fn by_title(replies: &[(&str, &str)]) -> Self {
        Self {
            by_title: true,
            ..Self::new(replies)
        }
    }
}

#[async_trait]
impl Evaluator for ScriptedEvaluator {
    async fn evaluate(&self, criterion: &Criterion, item: &ContentItem) -> Result<String> {
        let key = if self.by_title { &item.title } else { &criterion.id };
        self.replies.get(key).cloned().ok_or_else(unavailable)
    }
}

/// Writes an article named after the source title. Titles in `failing`
/// get an error instead.
#[derive(Default)]
pub struct ScriptedGenerator {
    pub failing: HashSet<String>,
    pub calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Generator for ScriptedGenerator {
    async fn generate(&self, item: &ContentItem) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.failing.contains(&item.title) {
            return Err(unavailable());
        }
        Ok(serde_json::json!({
            "headline": format!("{} (rewritten)", item.title),
            "content": format!("Full story about {}.", item.title),
        })
        .to_string())
    }

    async fn subject_line(&self, headlines: &[String]) -> Result<String> {
        Ok(format!("Today: {}", headlines.first().cloned().unwrap_or_default()))
    }
}

/// Fact-check scores keyed by source title. Unlisted titles score 9/9/9.
#[derive(Default)]
pub struct ScriptedFactChecker {
    pub scores: HashMap<String, (f64, f64, f64)>,
}

impl ScriptedFactChecker {
    pub fn with(scores: &[(&str, (f64, f64, f64))]) -> Self {
        Self {
            scores: scores.iter().map(|(k, v)| (k.to_string(), *v)).collect(),
        }
    }
}

#[async_trait]
impl FactChecker for ScriptedFactChecker {
    async fn check(&self, _article: &GeneratedArticle, source: &ContentItem) -> Result<String> {
        let (accuracy, timeliness, intent) = self
            .scores
            .get(&source.title)
            .copied()
            .unwrap_or((9.0, 9.0, 9.0));
        Ok(serde_json::json!({
            "accuracy": accuracy,
            "timeliness": timeliness,
            "intent_alignment": intent,
            "passed": accuracy + timeliness + intent >= 20.0,
            "details": {"notes": "scripted"},
        })
        .to_string())
    }
}

/// Returns a fixed reply, or fails when none is set.
pub struct ScriptedDeduplicator {
    pub reply: Option<String>,
}

#[async_trait]
impl Deduplicator for ScriptedDeduplicator {
    async fn group(&self, _items: &[ContentItem]) -> Result<String> {
        self.reply.clone().ok_or_else(unavailable)
    }
}
