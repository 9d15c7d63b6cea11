use chrono::Utc;

use crate::db::Repository;
use crate::error::{AppError, Result};
use crate::models::{ArchiveReason, ArchiveSummary, CampaignStatus};

/// Snapshots a campaign's content into the archive tables.
pub struct Archiver<'a> {
    repo: &'a Repository,
}

impl<'a> Archiver<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }

    pub async fn archive(&self, campaign_id: i64, reason: ArchiveReason) -> Result<ArchiveSummary> {
        let summary = self
            .repo
            .archive_campaign(campaign_id, reason, Utc::now())
            .await?;
        tracing::info!(
            campaign = campaign_id,
            reason = %reason,
            articles = summary.articles,
            content_items = summary.content_items,
            ratings = summary.ratings,
            "Archived campaign"
        );
        Ok(summary)
    }

    /// Clears generated articles so the campaign can be reassembled. The
    /// current state is archived first; if that fails nothing is deleted.
    pub async fn refresh(&self, campaign_id: i64) -> Result<(ArchiveSummary, usize)> {
        let campaign = self.repo.get_campaign(campaign_id).await?;
        if campaign.status == CampaignStatus::Sent {
            return Err(AppError::TerminalState {
                campaign_id,
                status: campaign.status,
            });
        }

        let summary = self.archive(campaign_id, ArchiveReason::PreRefresh).await?;
        let deleted = self.repo.delete_generated_articles(campaign_id).await?;
        tracing::info!(campaign = campaign_id, deleted, "Cleared generated articles for refresh");
        Ok((summary, deleted))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::db::Checkpoint;
    use crate::models::{CriterionScore, FactCheckRecord, NewArticle};
    use crate::pipeline::testing::insert_item;

    async fn populated_campaign(repo: &Repository) -> i64 {
        let campaign = repo
            .ensure_campaign(NaiveDate::from_ymd_opt(2026, 4, 6).unwrap())
            .await
            .unwrap();
        for title in ["Rail line", "School board", "Weather"] {
            let item = insert_item(repo, campaign.id, title).await;
            repo.insert_rating(
                item.id,
                12.0,
                vec![CriterionScore {
                    criterion_id: "relevance".to_string(),
                    score: 8.0,
                    weight: 1.5,
                    reason: "local".to_string(),
                }],
                Utc::now(),
            )
            .await
            .unwrap();
            if title != "Weather" {
                repo.insert_generated_article(
                    NewArticle {
                        campaign_id: campaign.id,
                        content_item_id: Some(item.id),
                        is_manual: false,
                        headline: title.to_string(),
                        content: "body".to_string(),
                        word_count: 1,
                    },
                    FactCheckRecord::passed(item.id, 25.0, serde_json::json!({})),
                )
                .await
                .unwrap();
            }
        }
        repo.insert_manual_article(
            NewArticle::manual(campaign.id, "Editor's note".to_string(), "hello".to_string()),
            1,
        )
        .await
        .unwrap();
        campaign.id
    }

    #[tokio::test]
    async fn test_archive_is_complete_and_keeps_positions() {
        let repo = Repository::in_memory().await.unwrap();
        let campaign_id = populated_campaign(&repo).await;
        let live = repo.articles_for_campaign(campaign_id).await.unwrap();
        let positions: Vec<(i64, i64)> = live.iter().map(|a| (a.id, a.id * 10)).collect();
        repo.apply_checkpoint(campaign_id, CampaignStatus::Draft, Checkpoint::Review, positions, None)
            .await
            .unwrap();

        let summary = Archiver::new(&repo)
            .archive(campaign_id, ArchiveReason::Manual)
            .await
            .unwrap();

        assert_eq!(summary.articles, live.len());
        assert_eq!(summary.content_items, 3);
        assert_eq!(summary.ratings, 3);
        assert_eq!(
            repo.archived_counts(campaign_id, ArchiveReason::Manual).await.unwrap(),
            summary
        );

        let archived = repo
            .archived_articles(campaign_id, ArchiveReason::Manual)
            .await
            .unwrap();
        for row in &archived {
            assert_eq!(row.review_position, Some(row.original_id * 10));
            assert_eq!(row.campaign_status, CampaignStatus::InReview);
        }
    }

    #[tokio::test]
    async fn test_second_archive_is_a_new_snapshot() {
        let repo = Repository::in_memory().await.unwrap();
        let campaign_id = populated_campaign(&repo).await;
        let archiver = Archiver::new(&repo);

        archiver.archive(campaign_id, ArchiveReason::Manual).await.unwrap();
        archiver.archive(campaign_id, ArchiveReason::Manual).await.unwrap();

        let counts = repo
            .archived_counts(campaign_id, ArchiveReason::Manual)
            .await
            .unwrap();
        assert_eq!(counts.articles, 6);
        assert_eq!(counts.ratings, 6);
    }

    #[tokio::test]
    async fn test_archive_of_missing_campaign_fails() {
        let repo = Repository::in_memory().await.unwrap();
        assert!(matches!(
            Archiver::new(&repo).archive(404, ArchiveReason::Manual).await,
            Err(AppError::CampaignNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_refresh_archives_then_keeps_manual_articles() {
        let repo = Repository::in_memory().await.unwrap();
        let campaign_id = populated_campaign(&repo).await;

        let (summary, deleted) = Archiver::new(&repo).refresh(campaign_id).await.unwrap();

        assert_eq!(summary.articles, 3);
        assert_eq!(deleted, 2);
        let remaining = repo.articles_for_campaign(campaign_id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].is_manual);
        assert_eq!(
            repo.archived_counts(campaign_id, ArchiveReason::PreRefresh)
                .await
                .unwrap()
                .articles,
            3
        );
    }

    #[tokio::test]
    async fn test_refresh_refused_after_send() {
        let repo = Repository::in_memory().await.unwrap();
        let campaign_id = populated_campaign(&repo).await;
        repo.compare_and_set_status(campaign_id, CampaignStatus::Draft, CampaignStatus::InReview)
            .await
            .unwrap();
        repo.compare_and_set_status(campaign_id, CampaignStatus::InReview, CampaignStatus::Sent)
            .await
            .unwrap();

        assert!(matches!(
            Archiver::new(&repo).refresh(campaign_id).await,
            Err(AppError::TerminalState { .. })
        ));
        assert_eq!(
            repo.archived_counts(campaign_id, ArchiveReason::PreRefresh)
                .await
                .unwrap()
                .articles,
            0
        );
    }
}
