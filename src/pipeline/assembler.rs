use std::cmp::Ordering;
use std::collections::HashSet;
use std::time::Instant;

use serde_json::json;

use crate::ai::{decode, FactCheckReply, FactChecker, GeneratedArticle, Generator};
use crate::db::{Repository, ScoredItem};
use crate::error::{AppError, Result};
use crate::models::{Article, FactCheckRecord, NewArticle};

/// Each fact-check dimension is scored out of this.
pub const FACT_CHECK_DIMENSION_MAX: f64 = 10.0;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct AssemblyReport {
    pub generated: usize,
    pub passed: usize,
    pub failed_fact_check: usize,
    pub generation_errors: usize,
    pub active: usize,
    /// True when the candidates ran out before the target count was reached.
    pub exhausted: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FactCheckVerdict {
    pub score: f64,
    pub passed: bool,
    pub details: serde_json::Value,
}

/// Orders candidates for selection: total score descending, then earlier
/// ingestion, then lower id.
pub fn rank_candidates(mut items: Vec<ScoredItem>) -> Vec<ScoredItem> {
    items.sort_by(|a, b| {
        b.total_score
            .partial_cmp(&a.total_score)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.item.ingested_at.cmp(&b.item.ingested_at))
            .then_with(|| a.item.id.cmp(&b.item.id))
    });
    items
}

/// Combines the three dimensions and compares against `threshold`. The
/// model's own `passed` flag is recorded but does not decide.
pub fn fact_check_verdict(reply: &FactCheckReply, threshold: f64) -> Result<FactCheckVerdict> {
    for (name, value) in [
        ("accuracy", reply.accuracy),
        ("timeliness", reply.timeliness),
        ("intent_alignment", reply.intent_alignment),
    ] {
        if !value.is_finite() || !(0.0..=FACT_CHECK_DIMENSION_MAX).contains(&value) {
            return Err(AppError::ScoreOutOfRange {
                criterion: name.to_string(),
                score: value,
                max: FACT_CHECK_DIMENSION_MAX,
            });
        }
    }

    let score = reply.accuracy + reply.timeliness + reply.intent_alignment;
    Ok(FactCheckVerdict {
        score,
        passed: score >= threshold,
        details: json!({
            "accuracy": reply.accuracy,
            "timeliness": reply.timeliness,
            "intent_alignment": reply.intent_alignment,
            "combined": score,
            "threshold": threshold,
            "model_passed": reply.passed,
            "details": reply.details,
        }),
    })
}

/// Turns ranked candidates into the day's active lineup.
pub struct Assembler<'a> {
    repo: &'a Repository,
    generator: &'a dyn Generator,
    fact_checker: &'a dyn FactChecker,
    article_count: usize,
    threshold: f64,
}

impl<'a> Assembler<'a> {
    pub fn new(
        repo: &'a Repository,
        generator: &'a dyn Generator,
        fact_checker: &'a dyn FactChecker,
        article_count: usize,
        threshold: f64,
    ) -> Self {
        Self {
            repo,
            generator,
            fact_checker,
            article_count,
            threshold,
        }
    }

    /// Walks `candidates` in order until `article_count` generated articles
    /// are active. An article is stored only with its fact-check verdict, and
    /// items that already have one are not retried, so running this again
    /// resumes rather than duplicates.
    pub async fn assemble(
        &self,
        campaign_id: i64,
        candidates: Vec<ScoredItem>,
    ) -> Result<AssemblyReport> {
        let existing = self.repo.articles_for_campaign(campaign_id).await?;
        let attempted: HashSet<i64> = existing.iter().filter_map(|a| a.content_item_id).collect();
        let generated_active: Vec<&Article> =
            existing.iter().filter(|a| a.is_active && !a.is_manual).collect();
        let mut next_rank = generated_active
            .iter()
            .filter_map(|a| a.rank)
            .max()
            .unwrap_or(0)
            + 1;

        let mut report = AssemblyReport {
            active: generated_active.len(),
            ..Default::default()
        };

        for candidate in candidates {
            if report.active >= self.article_count {
                break;
            }
            if attempted.contains(&candidate.item.id) {
                continue;
            }
            let item = &candidate.item;

            let started = Instant::now();
            let generated = match self.generator.generate(item).await {
                Ok(raw) => decode::<GeneratedArticle>(&raw),
                Err(e) => Err(e),
            };
            let generated = match generated {
                Ok(article) => article,
                Err(e) => {
                    tracing::warn!(item = item.id, error = %e, "Article generation failed");
                    report.generation_errors += 1;
                    continue;
                }
            };
            tracing::info!(
                item = item.id,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Generated article"
            );
            report.generated += 1;

            let verdict = match self.fact_checker.check(&generated, item).await {
                Ok(raw) => decode::<FactCheckReply>(&raw)
                    .and_then(|reply| fact_check_verdict(&reply, self.threshold)),
                Err(e) => Err(e),
            };
            let check = match verdict {
                Ok(verdict) if verdict.passed => {
                    FactCheckRecord::passed(next_rank, verdict.score, verdict.details)
                }
                Ok(verdict) => {
                    tracing::info!(item = item.id, score = verdict.score, threshold = self.threshold, "Article failed fact-check");
                    FactCheckRecord::rejected(Some(verdict.score), verdict.details)
                }
                Err(e) => {
                    tracing::warn!(item = item.id, error = %e, "Fact-check unusable, rejecting article");
                    FactCheckRecord::rejected(None, json!({ "error": e.to_string() }))
                }
            };

            // Stored only once the verdict is in.
            let passed = check.rank.is_some();
            let article = self
                .repo
                .insert_generated_article(
                    NewArticle {
                        campaign_id,
                        content_item_id: Some(item.id),
                        is_manual: false,
                        headline: generated.headline.trim().to_string(),
                        content: generated.content.clone(),
                        word_count: generated.effective_word_count(),
                    },
                    check,
                )
                .await?;

            if passed {
                tracing::info!(article = article.id, rank = next_rank, score = ?article.fact_check_score, "Article passed fact-check");
                next_rank += 1;
                report.passed += 1;
                report.active += 1;
            } else {
                report.failed_fact_check += 1;
            }
        }

        report.exhausted = report.active < self.article_count;
        if report.exhausted {
            tracing::warn!(
                campaign = campaign_id,
                active = report.active,
                wanted = self.article_count,
                "Ran out of candidates before filling the lineup"
            );
        }
        Ok(report)
    }

    /// Generates a subject line from the active headlines unless one is set.
    pub async fn ensure_subject_line(&self, campaign_id: i64) -> Result<Option<String>> {
        let campaign = self.repo.get_campaign(campaign_id).await?;
        if campaign.has_subject_line() {
            return Ok(campaign.subject_line);
        }

        let headlines: Vec<String> = self
            .repo
            .articles_for_campaign(campaign_id)
            .await?
            .into_iter()
            .filter(|a| a.is_active)
            .map(|a| a.headline)
            .collect();
        if headlines.is_empty() {
            return Ok(None);
        }

        let subject = self.generator.subject_line(&headlines).await?;
        let subject = subject.trim().to_string();
        if subject.is_empty() {
            return Ok(None);
        }
        self.repo.set_subject_line(campaign_id, subject.clone()).await?;
        Ok(Some(subject))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::ai::{DedupReply, DedupReplyGroup};
    use crate::models::ContentItem;
    use crate::pipeline::dedup::normalize;
    use crate::pipeline::testing::{insert_item, ScriptedFactChecker, ScriptedGenerator};

    /// Never answers, like a fact-check call cut off by a killed process.
    struct StalledFactChecker;

    #[async_trait::async_trait]
    impl FactChecker for StalledFactChecker {
        async fn check(&self, _article: &GeneratedArticle, _source: &ContentItem) -> Result<String> {
            std::future::pending().await
        }
    }

    fn scored(item: ContentItem, total_score: f64) -> ScoredItem {
        ScoredItem {
            item,
            rating_id: 0,
            total_score,
        }
    }

    async fn setup() -> (Repository, i64) {
        let repo = Repository::in_memory().await.unwrap();
        let campaign = repo
            .ensure_campaign(NaiveDate::from_ymd_opt(2026, 4, 3).unwrap())
            .await
            .unwrap();
        (repo, campaign.id)
    }

    #[tokio::test]
    async fn test_rank_candidates_breaks_ties_by_ingestion_then_id() {
        let (repo, campaign_id) = setup().await;
        let first = insert_item(&repo, campaign_id, "First").await;
        let second = insert_item(&repo, campaign_id, "Second").await;
        let top = insert_item(&repo, campaign_id, "Top").await;

        let ranked = rank_candidates(vec![
            scored(second.clone(), 10.0),
            scored(top.clone(), 12.0),
            scored(first.clone(), 10.0),
        ]);
        let ids: Vec<i64> = ranked.iter().map(|s| s.item.id).collect();
        assert_eq!(ids, vec![top.id, first.id, second.id]);
    }

    #[test]
    fn test_fact_check_threshold_is_inclusive() {
        let reply = |a, t, i| FactCheckReply {
            accuracy: a,
            timeliness: t,
            intent_alignment: i,
            passed: true,
            details: serde_json::Value::Null,
        };
        assert!(fact_check_verdict(&reply(7.0, 7.0, 6.0), 20.0).unwrap().passed);
        let low = fact_check_verdict(&reply(5.0, 5.0, 4.0), 20.0).unwrap();
        assert!(!low.passed);
        assert_eq!(low.score, 14.0);
        assert!(fact_check_verdict(&reply(11.0, 0.0, 0.0), 20.0).is_err());
    }

    #[tokio::test]
    async fn test_failed_fact_check_falls_back_to_next_eligible_not_duplicate() {
        let (repo, campaign_id) = setup().await;
        let a = insert_item(&repo, campaign_id, "Bridge closes A").await;
        let b = insert_item(&repo, campaign_id, "Bridge closes B").await;
        let c = insert_item(&repo, campaign_id, "Library opens").await;

        // B duplicates A; A outscores B and C but fails fact-check with 14/30.
        let pool = rank_candidates(vec![
            scored(a.clone(), 18.4),
            scored(b.clone(), 12.0),
            scored(c.clone(), 9.0),
        ]);
        let outcome = normalize(
            DedupReply {
                groups: vec![DedupReplyGroup {
                    primary_index: 0,
                    duplicate_indices: vec![1],
                    rationale: "same closure".to_string(),
                }],
                unique_indices: vec![2],
            },
            pool.len(),
        );
        let eligible: HashSet<usize> = outcome.eligible().into_iter().collect();
        let candidates: Vec<ScoredItem> = pool
            .into_iter()
            .enumerate()
            .filter(|(i, _)| eligible.contains(i))
            .map(|(_, s)| s)
            .collect();

        let generator = ScriptedGenerator::default();
        let checker = ScriptedFactChecker::with(&[("Bridge closes A", (5.0, 5.0, 4.0))]);
        let report = Assembler::new(&repo, &generator, &checker, 1, 20.0)
            .assemble(campaign_id, candidates)
            .await
            .unwrap();

        assert_eq!(report.active, 1);
        assert_eq!(report.failed_fact_check, 1);
        let articles = repo.articles_for_campaign(campaign_id).await.unwrap();
        let active: Vec<_> = articles.iter().filter(|a| a.is_active).collect();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].content_item_id, Some(c.id));
        assert_eq!(active[0].rank, Some(1));
        let rejected = articles
            .iter()
            .find(|article| article.content_item_id == Some(a.id))
            .unwrap();
        assert!(!rejected.is_active);
        assert_eq!(rejected.fact_check_score, Some(14.0));
        assert!(articles.iter().all(|a| a.content_item_id != Some(b.id)));
    }

    #[tokio::test]
    async fn test_rerun_resumes_without_regenerating() {
        let (repo, campaign_id) = setup().await;
        let mut candidates = Vec::new();
        for (i, title) in ["One", "Two", "Three", "Four"].iter().enumerate() {
            let item = insert_item(&repo, campaign_id, title).await;
            candidates.push(scored(item, 20.0 - i as f64));
        }
        let generator = ScriptedGenerator {
            failing: HashSet::from(["Two".to_string()]),
            ..Default::default()
        };
        let checker = ScriptedFactChecker::default();
        let assembler = Assembler::new(&repo, &generator, &checker, 2, 20.0);

        let first = assembler.assemble(campaign_id, candidates.clone()).await.unwrap();
        assert_eq!(first.active, 2);
        assert_eq!(first.generation_errors, 1);
        assert!(!first.exhausted);

        let calls_before = generator.calls();
        let second = assembler.assemble(campaign_id, candidates).await.unwrap();
        assert_eq!(second.active, 2);
        assert_eq!(second.generated, 0);
        assert_eq!(generator.calls(), calls_before);

        let ranks: Vec<Option<i64>> = repo
            .articles_for_campaign(campaign_id)
            .await
            .unwrap()
            .iter()
            .filter(|a| a.is_active)
            .map(|a| a.rank)
            .collect();
        assert_eq!(ranks, vec![Some(1), Some(2)]);
    }

    #[tokio::test]
    async fn test_subject_line_generated_once() {
        let (repo, campaign_id) = setup().await;
        let item = insert_item(&repo, campaign_id, "Park reopens").await;
        let generator = ScriptedGenerator::default();
        let checker = ScriptedFactChecker::default();
        let assembler = Assembler::new(&repo, &generator, &checker, 1, 20.0);
        assembler
            .assemble(campaign_id, vec![scored(item, 5.0)])
            .await
            .unwrap();

        let subject = assembler.ensure_subject_line(campaign_id).await.unwrap();
        assert_eq!(subject.as_deref(), Some("Today: Park reopens (rewritten)"));
        repo.set_subject_line(campaign_id, "Edited".to_string()).await.unwrap();
        let again = assembler.ensure_subject_line(campaign_id).await.unwrap();
        assert_eq!(again.as_deref(), Some("Edited"));
    }

    #[tokio::test]
    async fn test_interrupted_fact_check_leaves_item_for_next_run() {
        let (repo, campaign_id) = setup().await;
        let item = insert_item(&repo, campaign_id, "Ferry returns").await;
        let generator = ScriptedGenerator::default();

        let stalled = StalledFactChecker;
        let interrupted = tokio::time::timeout(
            std::time::Duration::from_millis(50),
            Assembler::new(&repo, &generator, &stalled, 1, 20.0)
                .assemble(campaign_id, vec![scored(item.clone(), 8.0)]),
        )
        .await;
        assert!(interrupted.is_err());
        assert!(repo.articles_for_campaign(campaign_id).await.unwrap().is_empty());

        let checker = ScriptedFactChecker::default();
        let report = Assembler::new(&repo, &generator, &checker, 1, 20.0)
            .assemble(campaign_id, vec![scored(item.clone(), 8.0)])
            .await
            .unwrap();

        assert_eq!(report.active, 1);
        let articles = repo.articles_for_campaign(campaign_id).await.unwrap();
        assert_eq!(articles.len(), 1);
        assert!(articles[0].is_active);
        assert_eq!(articles[0].content_item_id, Some(item.id));
        assert_eq!(articles[0].fact_check_score, Some(27.0));
    }
}
