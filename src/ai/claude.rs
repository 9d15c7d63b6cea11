use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::{ContentItem, Criterion};

use super::capabilities::{Deduplicator, Evaluator, FactChecker, GeneratedArticle, Generator};
use super::client::{truncate_to_char_boundary, ClaudeClient, MAX_PROMPT_CONTENT};

const EVALUATE_SYSTEM: &str = r#"You are an editor scoring candidate stories for a daily local newsletter.
Score the story on the single criterion you are given.
Respond with JSON only: {"score": <number>, "reason": "<one sentence>"}"#;

const GENERATE_SYSTEM: &str = r#"You rewrite news stories for a daily email newsletter.
Write a fresh headline and a 100-150 word summary in plain, neutral language.
Use only facts present in the source. Do not invent quotes, numbers or dates.
Respond with JSON only: {"headline": "...", "content": "...", "word_count": <number>}"#;

const FACT_CHECK_SYSTEM: &str = r#"You fact-check newsletter copy against its source story.
Rate each dimension from 0 to 10:
- accuracy: every claim in the copy is supported by the source
- timeliness: the copy does not present stale events as new
- intent_alignment: the copy keeps the meaning and tone of the source
Respond with JSON only:
{"accuracy": <n>, "timeliness": <n>, "intent_alignment": <n>, "passed": <bool>, "details": {"issues": ["..."]}}"#;

const DEDUP_SYSTEM: &str = r#"You group newsletter candidates that cover the same story or the same recurring event.
Items are numbered by index. For each group pick as primary the item with the most specific
details (names, dates, places). Every index must appear exactly once: as a primary, as a duplicate,
or in unique_indices.
Respond with JSON only:
{"groups": [{"primary_index": 0, "duplicate_indices": [3], "rationale": "..."}], "unique_indices": [1, 2]}"#;

const SUBJECT_SYSTEM: &str = r#"You write email subject lines for a daily local newsletter.
Given the day's headlines, write one subject line under 60 characters that leads with the top story.
Respond with the subject line only, no quotes."#;

#[derive(Serialize)]
struct DedupCandidate<'a> {
    index: usize,
    title: &'a str,
    description: &'a str,
}

fn story_block(item: &ContentItem) -> String {
    format!(
        "Title: {}\nPublished: {}\nLink: {}\n\nContent:\n{}",
        item.title,
        item.published_at.format("%Y-%m-%d"),
        item.link,
        truncate_to_char_boundary(item.text(), MAX_PROMPT_CONTENT)
    )
}

#[async_trait]
impl Evaluator for ClaudeClient {
    async fn evaluate(&self, criterion: &Criterion, item: &ContentItem) -> Result<String> {
        let user = format!(
            "Criterion: {} (score 0 to {})\n{}\n\n{}",
            criterion.name,
            criterion.max_score,
            criterion.prompt,
            story_block(item)
        );
        self.complete(EVALUATE_SYSTEM, &user, 256).await
    }
}

#[async_trait]
impl Generator for ClaudeClient {
    async fn generate(&self, item: &ContentItem) -> Result<String> {
        self.complete(GENERATE_SYSTEM, &story_block(item), 1024).await
    }

    async fn subject_line(&self, headlines: &[String]) -> Result<String> {
        let user = headlines
            .iter()
            .enumerate()
            .map(|(i, h)| format!("{}. {}", i + 1, h))
            .collect::<Vec<_>>()
            .join("\n");
        let subject = self.complete(SUBJECT_SYSTEM, &user, 64).await?;
        Ok(subject.trim().trim_matches('"').to_string())
    }
}

#[async_trait]
impl FactChecker for ClaudeClient {
    async fn check(&self, article: &GeneratedArticle, source: &ContentItem) -> Result<String> {
        let user = format!(
            "SOURCE\n{}\n\nCOPY\nHeadline: {}\n{}",
            story_block(source),
            article.headline,
            article.content
        );
        self.complete(FACT_CHECK_SYSTEM, &user, 512).await
    }
}

#[async_trait]
impl Deduplicator for ClaudeClient {
    async fn group(&self, items: &[ContentItem]) -> Result<String> {
        let candidates: Vec<DedupCandidate> = items
            .iter()
            .enumerate()
            .map(|(index, item)| DedupCandidate {
                index,
                title: &item.title,
                description: truncate_to_char_boundary(
                    item.description.as_deref().unwrap_or(""),
                    400,
                ),
            })
            .collect();
        let user = format!(
            "Analyze these candidates for duplicates:\n\n{}",
            serde_json::to_string_pretty(&candidates)?
        );
        self.complete(DEDUP_SYSTEM, &user, 2048).await
    }
}
