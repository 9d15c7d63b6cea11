use chrono::Utc;
use serde_json::json;

use crate::db::{Checkpoint, CheckpointOutcome, Repository, StageClaim};
use crate::error::{AppError, Result};
use crate::models::{ArchiveReason, Campaign, CampaignStatus};
use crate::services::{DispatchReceipt, EmailDispatcher, Notifier, Severity};

use super::archive::Archiver;
use super::workflow::{lineup, CampaignWorkflow};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    Sent(DispatchReceipt),
    /// Another invocation already claimed this cycle.
    AlreadyRan,
}

/// Runs the review and final sends: checkpoint, email, then status.
pub struct DispatchExecutor<'a> {
    repo: &'a Repository,
    email: &'a dyn EmailDispatcher,
    notifier: &'a dyn Notifier,
    final_audience_id: &'a str,
    archive_before_send: bool,
}

impl<'a> DispatchExecutor<'a> {
    pub fn new(
        repo: &'a Repository,
        email: &'a dyn EmailDispatcher,
        notifier: &'a dyn Notifier,
        final_audience_id: &'a str,
        archive_before_send: bool,
    ) -> Self {
        Self {
            repo,
            email,
            notifier,
            final_audience_id,
            archive_before_send,
        }
    }

    /// draft → in_review. Review positions are written together with the
    /// status change before the email goes out.
    pub async fn send_review(
        &self,
        campaign_id: i64,
        claim: Option<StageClaim>,
    ) -> Result<DispatchOutcome> {
        let campaign = self.repo.get_campaign(campaign_id).await?;
        let before = campaign.status;
        let workflow = CampaignWorkflow::new(self.repo);

        if workflow.begin_review(&campaign, claim).await? == CheckpointOutcome::AlreadyRan {
            tracing::info!(campaign = campaign_id, "Review send already claimed for this cycle");
            return Ok(DispatchOutcome::AlreadyRan);
        }

        let campaign = self.repo.get_campaign(campaign_id).await?;
        let articles = lineup(
            &self.repo.articles_for_campaign(campaign_id).await?,
            Checkpoint::Review,
        );
        let subject = campaign.subject_line.clone().unwrap_or_default();

        match self.email.send_review(&campaign, &articles, &subject).await {
            Ok(receipt) => {
                self.repo
                    .merge_metrics(
                        campaign_id,
                        json!({
                            "review_dispatch_id": receipt.dispatch_id,
                            "review_articles": articles.len(),
                        }),
                    )
                    .await?;
                tracing::info!(campaign = campaign_id, dispatch_id = %receipt.dispatch_id, "Review email sent");
                Ok(DispatchOutcome::Sent(receipt))
            }
            Err(e) => {
                self.fail(&campaign, before, "review", e).await
            }
        }
    }

    /// Pre-send state → sent. Final positions and the pre-send status are
    /// captured first, which also locks out a second send until this one
    /// settles. The status only reaches `sent` once the email is out.
    pub async fn send_final(
        &self,
        campaign_id: i64,
        claim: Option<StageClaim>,
    ) -> Result<DispatchOutcome> {
        let campaign = self.repo.get_campaign(campaign_id).await?;
        let workflow = CampaignWorkflow::new(self.repo);

        if workflow.prepare_send(&campaign, claim).await? == CheckpointOutcome::AlreadyRan {
            tracing::info!(campaign = campaign_id, "Final send already claimed for this cycle");
            return Ok(DispatchOutcome::AlreadyRan);
        }
        let previous = campaign.status;

        if self.archive_before_send {
            // Archival is best-effort here: a failed snapshot is reported but
            // does not hold back the send.
            if let Err(e) = Archiver::new(self.repo)
                .archive(campaign_id, ArchiveReason::PreSend)
                .await
            {
                tracing::error!(campaign = campaign_id, error = %e, "Pre-send archive failed");
                self.notifier
                    .notify(
                        "Pre-send archive failed",
                        Severity::Error,
                        json!({ "campaign_id": campaign_id, "error": e.to_string() }),
                    )
                    .await;
            }
        }

        let articles = lineup(
            &self.repo.articles_for_campaign(campaign_id).await?,
            Checkpoint::Final,
        );

        match self
            .email
            .send_final(&campaign, &articles, self.final_audience_id)
            .await
        {
            Ok(receipt) => {
                if let Err(e) = workflow.mark_sent(campaign_id).await {
                    tracing::error!(campaign = campaign_id, error = %e, "Final email sent but campaign not marked sent");
                    self.notifier
                        .notify(
                            &format!(
                                "The final send for {} was delivered but could not be recorded",
                                campaign.date
                            ),
                            Severity::Error,
                            json!({
                                "campaign_id": campaign_id,
                                "dispatch_id": receipt.dispatch_id,
                                "error": e.to_string(),
                                "at": Utc::now().to_rfc3339(),
                            }),
                        )
                        .await;
                    return Err(e);
                }
                self.repo
                    .merge_metrics(
                        campaign_id,
                        json!({
                            "final_dispatch_id": receipt.dispatch_id,
                            "final_articles": articles.len(),
                        }),
                    )
                    .await?;
                tracing::info!(campaign = campaign_id, dispatch_id = %receipt.dispatch_id, "Final email sent");
                Ok(DispatchOutcome::Sent(receipt))
            }
            Err(e) => self.fail(&campaign, previous, "final", e).await,
        }
    }

    /// Moves the campaign to `failed`, alerts, and surfaces the previous status.
    async fn fail(
        &self,
        campaign: &Campaign,
        previous: CampaignStatus,
        kind: &str,
        cause: AppError,
    ) -> Result<DispatchOutcome> {
        let attempted = match kind {
            "review" => CampaignStatus::InReview,
            _ => CampaignStatus::Sent,
        };
        tracing::error!(campaign = campaign.id, kind, error = %cause, "Dispatch failed");
        if let Err(e) = CampaignWorkflow::new(self.repo)
            .mark_failed(campaign.id, previous)
            .await
        {
            tracing::error!(campaign = campaign.id, error = %e, "Could not mark campaign failed");
        }
        self.notifier
            .notify(
                &format!("The {} send for {} failed", kind, campaign.date),
                Severity::Error,
                json!({
                    "campaign_id": campaign.id,
                    "attempted_status": attempted.as_str(),
                    "previous_status": previous.as_str(),
                    "error": cause.to_string(),
                    "at": Utc::now().to_rfc3339(),
                }),
            )
            .await;
        Err(AppError::Dispatch {
            campaign_id: campaign.id,
            previous,
            message: cause.to_string(),
        })
    }
}
