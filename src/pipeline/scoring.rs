use chrono::Utc;

use crate::ai::{decode, EvaluationReply, Evaluator};
use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{weighted_total, ContentItem, Criterion, CriterionScore, Rating};

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ScoringReport {
    pub scored: usize,
    pub failed: usize,
}

/// Rates content items against the enabled criteria.
pub struct ScoringEngine<'a> {
    evaluator: &'a dyn Evaluator,
    criteria: Vec<Criterion>,
}

impl<'a> ScoringEngine<'a> {
    pub fn new(evaluator: &'a dyn Evaluator, criteria: &[Criterion]) -> Self {
        Self {
            evaluator,
            criteria: criteria.iter().filter(|c| c.enabled).cloned().collect(),
        }
    }

    /// Evaluates every criterion. Any malformed or out-of-range score fails
    /// the whole item so a partial total is never stored.
    pub async fn score_item(&self, item: &ContentItem) -> Result<Vec<CriterionScore>> {
        let mut scores = Vec::with_capacity(self.criteria.len());
        for criterion in &self.criteria {
            let raw = self.evaluator.evaluate(criterion, item).await?;
            let reply: EvaluationReply = decode(&raw)?;
            scores.push(validate_score(criterion, reply)?);
        }
        Ok(scores)
    }

    /// Scores and stores a rating for the item.
    pub async fn rate(&self, repo: &Repository, item: &ContentItem) -> Result<Rating> {
        let scores = self.score_item(item).await?;
        let total = weighted_total(&scores);
        repo.insert_rating(item.id, total, scores, Utc::now()).await
    }

    /// Rates every unscored item of the campaign. Failures leave the item
    /// unscored and are counted.
    pub async fn score_pending(&self, repo: &Repository, campaign_id: i64) -> Result<ScoringReport> {
        let items = repo.unscored_items_for_campaign(campaign_id).await?;
        let mut report = ScoringReport::default();

        for item in &items {
            match self.rate(repo, item).await {
                Ok(rating) => {
                    tracing::debug!(item = item.id, total = rating.total_score, "Rated item");
                    report.scored += 1;
                }
                Err(e) => {
                    tracing::warn!(item = item.id, title = %item.title, error = %e, "Scoring failed");
                    report.failed += 1;
                }
            }
        }

        tracing::info!(
            campaign = campaign_id,
            scored = report.scored,
            failed = report.failed,
            "Scoring pass finished"
        );
        Ok(report)
    }
}

pub fn validate_score(criterion: &Criterion, reply: EvaluationReply) -> Result<CriterionScore> {
    if !reply.score.is_finite() || reply.score < 0.0 || reply.score > criterion.max_score {
        return Err(AppError::ScoreOutOfRange {
            criterion: criterion.id.clone(),
            score: reply.score,
            max: criterion.max_score,
        });
    }
    Ok(CriterionScore {
        criterion_id: criterion.id.clone(),
        score: reply.score,
        weight: criterion.weight,
        reason: reply.reason,
    })
}
