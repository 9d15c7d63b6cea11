use crate::db::{Checkpoint, CheckpointOutcome, Repository, StageClaim};
use crate::error::{AppError, Result};
use crate::models::{Article, Campaign, CampaignStatus};

/// Positions run 1..=MAX_POSITIONS within each sequence.
pub const MAX_POSITIONS: usize = 5;

pub fn validate_transition(campaign_id: i64, from: CampaignStatus, to: CampaignStatus) -> Result<()> {
    if from.is_terminal() {
        return Err(AppError::TerminalState {
            campaign_id,
            status: from,
        });
    }
    if !from.can_transition_to(to) {
        return Err(AppError::InvalidTransition { from, to });
    }
    Ok(())
}

fn guard_failed(campaign: &Campaign, to: CampaignStatus, reason: &str) -> AppError {
    AppError::GuardFailed {
        campaign_id: campaign.id,
        to,
        reason: reason.to_string(),
    }
}

/// draft → in_review needs a subject line and at least one active article.
pub fn check_review_guard(campaign: &Campaign, articles: &[Article]) -> Result<()> {
    if !campaign.has_subject_line() {
        return Err(guard_failed(campaign, CampaignStatus::InReview, "subject line is empty"));
    }
    if !articles.iter().any(|a| a.is_active) {
        return Err(guard_failed(campaign, CampaignStatus::InReview, "no active articles"));
    }
    Ok(())
}

/// → sent needs a subject line and at least one active, non-skipped article.
pub fn check_send_guard(campaign: &Campaign, articles: &[Article]) -> Result<()> {
    if !campaign.has_subject_line() {
        return Err(guard_failed(campaign, CampaignStatus::Sent, "subject line is empty"));
    }
    if !articles.iter().any(Article::is_sendable) {
        return Err(guard_failed(
            campaign,
            CampaignStatus::Sent,
            "no active, non-skipped articles",
        ));
    }
    Ok(())
}

/// Articles that go out at `checkpoint`, in send order.
pub fn lineup(articles: &[Article], checkpoint: Checkpoint) -> Vec<Article> {
    let mut selected: Vec<Article> = articles
        .iter()
        .filter(|a| match checkpoint {
            Checkpoint::Review => a.is_active,
            Checkpoint::Final => a.is_sendable(),
        })
        .cloned()
        .collect();
    // Generated first, then manual; rank ascending within each.
    selected.sort_by_key(|a| (a.is_manual, a.rank.unwrap_or(i64::MAX), a.id));
    selected
}

/// `(article_id, position)` pairs for the checkpoint. Generated and manual
/// articles are numbered separately.
pub fn assign_positions(articles: &[Article], checkpoint: Checkpoint) -> Vec<(i64, i64)> {
    let lineup = lineup(articles, checkpoint);
    let mut positions = Vec::new();
    for manual in [false, true] {
        positions.extend(
            lineup
                .iter()
                .filter(|a| a.is_manual == manual)
                .take(MAX_POSITIONS)
                .enumerate()
                .map(|(i, a)| (a.id, i as i64 + 1)),
        );
    }
    positions
}

/// Guarded status changes for one campaign at a time.
pub struct CampaignWorkflow<'a> {
    repo: &'a Repository,
}

impl<'a> CampaignWorkflow<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }

    /// Editorial transition. draft → in_review goes through the review
    /// checkpoint; sending only happens through the dispatch path.
    pub async fn transition(&self, campaign_id: i64, to: CampaignStatus) -> Result<Campaign> {
        let campaign = self.repo.get_campaign(campaign_id).await?;
        validate_transition(campaign_id, campaign.status, to)?;

        match (campaign.status, to) {
            (_, CampaignStatus::Sent) => {
                return Err(guard_failed(
                    &campaign,
                    to,
                    "sending happens through the final-send stage",
                ));
            }
            (CampaignStatus::Draft, CampaignStatus::InReview) => {
                self.begin_review(&campaign, None).await?;
            }
            (from, to) => {
                self.repo.compare_and_set_status(campaign_id, from, to).await?;
            }
        }

        tracing::info!(campaign = campaign_id, from = %campaign.status, to = %to, "Campaign transitioned");
        self.repo.get_campaign(campaign_id).await
    }

    /// draft → in_review with review positions captured in the same write.
    pub async fn begin_review(
        &self,
        campaign: &Campaign,
        claim: Option<StageClaim>,
    ) -> Result<CheckpointOutcome> {
        validate_transition(campaign.id, campaign.status, CampaignStatus::InReview)?;
        let articles = self.repo.articles_for_campaign(campaign.id).await?;
        check_review_guard(campaign, &articles)?;
        let positions = assign_positions(&articles, Checkpoint::Review);
        self.repo
            .apply_checkpoint(
                campaign.id,
                campaign.status,
                Checkpoint::Review,
                positions,
                claim,
            )
            .await
    }

    /// Captures final positions and the pre-send status. The status itself
    /// only moves once the email is out.
    pub async fn prepare_send(
        &self,
        campaign: &Campaign,
        claim: Option<StageClaim>,
    ) -> Result<CheckpointOutcome> {
        validate_transition(campaign.id, campaign.status, CampaignStatus::Sent)?;
        let articles = self.repo.articles_for_campaign(campaign.id).await?;
        check_send_guard(campaign, &articles)?;
        let positions = assign_positions(&articles, Checkpoint::Final);
        self.repo
            .apply_checkpoint(
                campaign.id,
                campaign.status,
                Checkpoint::Final,
                positions,
                claim,
            )
            .await
    }

    /// Settles a send whose email went out, whatever editorial state the
    /// campaign moved to meanwhile.
    pub async fn mark_sent(&self, campaign_id: i64) -> Result<()> {
        self.repo.complete_send(campaign_id).await
    }

    /// `before` is the status the campaign had when the send started.
    pub async fn mark_failed(&self, campaign_id: i64, before: CampaignStatus) -> Result<()> {
        self.repo.abort_send(campaign_id, before).await
    }
}
