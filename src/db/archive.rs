use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};

use crate::error::{AppError, Result};
use crate::models::{ArchiveReason, ArchiveSummary, ArchivedArticle, CampaignStatus};

use super::repository::{date_column, datetime_column, parsed_column, Repository};

enum ArchiveOutcome {
    Done(ArchiveSummary),
    Missing,
}

impl Repository {
    /// Copies the campaign's articles, source items and ratings into the
    /// archive tables in one transaction. Either every row is copied or none.
    pub async fn archive_campaign(
        &self,
        campaign_id: i64,
        reason: ArchiveReason,
        archived_at: DateTime<Utc>,
    ) -> Result<ArchiveSummary> {
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let campaign: Option<(String, String)> = tx
                    .query_row(
                        "SELECT date, status FROM campaigns WHERE id = ?1",
                        params![campaign_id],
                        |row| Ok((row.get(0)?, row.get(1)?)),
                    )
                    .optional()?;
                let Some((campaign_date, campaign_status)) = campaign else {
                    return Ok(ArchiveOutcome::Missing);
                };
                let stamp = archived_at.to_rfc3339();
                let reason = reason.as_str();
                let tag: [&dyn rusqlite::ToSql; 5] =
                    [&campaign_id, &campaign_date, &campaign_status, &reason, &stamp];

                let articles = tx.execute(
                    r#"INSERT INTO archived_articles
                           (original_id, campaign_id, campaign_date, campaign_status, archive_reason,
                            archived_at, content_item_id, is_manual, headline, content, word_count,
                            rank, is_active, skipped, fact_check_score, fact_check_details,
                            review_position, final_position, created_at)
                       SELECT id, ?1, ?2, ?3, ?4, ?5, content_item_id, is_manual, headline, content,
                              word_count, rank, is_active, skipped, fact_check_score,
                              fact_check_details, review_position, final_position, created_at
                       FROM articles WHERE campaign_id = ?1"#,
                    &tag[..],
                )?;

                let item_filter = r#"(campaign_id = ?1
                        OR id IN (SELECT content_item_id FROM articles
                                  WHERE campaign_id = ?1 AND content_item_id IS NOT NULL))"#;
                let content_items = tx.execute(
                    &format!(
                        r#"INSERT INTO archived_content_items
                               (original_id, campaign_id, campaign_date, campaign_status,
                                archive_reason, archived_at, source_id, natural_key, external_id,
                                title, link, description, body, author, image_url, published_at,
                                ingested_at)
                           SELECT id, ?1, ?2, ?3, ?4, ?5, source_id, natural_key, external_id,
                                  title, link, description, body, author, image_url, published_at,
                                  ingested_at
                           FROM content_items WHERE {}"#,
                        item_filter
                    ),
                    &tag[..],
                )?;

                let rating_filter = format!(
                    "content_item_id IN (SELECT id FROM content_items WHERE {})",
                    item_filter
                );
                let ratings = tx.execute(
                    &format!(
                        r#"INSERT INTO archived_ratings
                               (original_id, campaign_id, campaign_date, campaign_status,
                                archive_reason, archived_at, content_item_id, total_score, criteria,
                                rated_at)
                           SELECT r.id, ?1, ?2, ?3, ?4, ?5, r.content_item_id, r.total_score,
                                  COALESCE((SELECT json_group_array(json_object(
                                                'criterion_id', cs.criterion_id,
                                                'score', cs.score,
                                                'weight', cs.weight,
                                                'reason', cs.reason))
                                            FROM criterion_scores cs WHERE cs.rating_id = r.id),
                                           '[]'),
                                  r.rated_at
                           FROM ratings r WHERE r.{}"#,
                        rating_filter
                    ),
                    &tag[..],
                )?;

                tx.commit()?;
                Ok(ArchiveOutcome::Done(ArchiveSummary {
                    articles,
                    content_items,
                    ratings,
                }))
            })
            .await;

        match outcome {
            Ok(ArchiveOutcome::Done(summary)) => Ok(summary),
            Ok(ArchiveOutcome::Missing) => Err(AppError::CampaignNotFound(campaign_id.to_string())),
            Err(e) => Err(AppError::Archive {
                campaign_id,
                message: e.to_string(),
            }),
        }
    }

    pub async fn archived_articles(
        &self,
        campaign_id: i64,
        reason: ArchiveReason,
    ) -> Result<Vec<ArchivedArticle>> {
        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    r#"SELECT id, original_id, campaign_id, campaign_date, campaign_status,
                              archive_reason, headline, rank, is_active, review_position,
                              final_position, archived_at
                       FROM archived_articles
                       WHERE campaign_id = ?1 AND archive_reason = ?2
                       ORDER BY id"#,
                )?;
                let rows = stmt
                    .query_map(params![campaign_id, reason.as_str()], |row| {
                        Ok(ArchivedArticle {
                            id: row.get(0)?,
                            original_id: row.get(1)?,
                            campaign_id: row.get(2)?,
                            campaign_date: date_column(row, 3)?,
                            campaign_status: parsed_column::<CampaignStatus>(row, 4)?,
                            archive_reason: parsed_column::<ArchiveReason>(row, 5)?,
                            headline: row.get(6)?,
                            rank: row.get(7)?,
                            is_active: row.get::<_, i64>(8)? != 0,
                            review_position: row.get(9)?,
                            final_position: row.get(10)?,
                            archived_at: datetime_column(row, 11)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    pub async fn archived_counts(&self, campaign_id: i64, reason: ArchiveReason) -> Result<ArchiveSummary> {
        let counts = self
            .conn
            .call(move |conn| {
                let count = |table: &str| -> rusqlite::Result<usize> {
                    conn.query_row::<i64, _, _>(
                        &format!(
                            "SELECT COUNT(*) FROM {} WHERE campaign_id = ?1 AND archive_reason = ?2",
                            table
                        ),
                        params![campaign_id, reason.as_str()],
                        |row| row.get(0),
                    )
                    .map(|n| n as usize)
                };
                Ok(ArchiveSummary {
                    articles: count("archived_articles")?,
                    content_items: count("archived_content_items")?,
                    ratings: count("archived_ratings")?,
                })
            })
            .await?;
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::models::{FactCheckRecord, NewArticle};
    use crate::pipeline::testing::insert_item;

    #[tokio::test]
    async fn test_failed_copy_leaves_no_partial_snapshot() {
        let repo = Repository::in_memory().await.unwrap();
        let campaign = repo
            .ensure_campaign(NaiveDate::from_ymd_opt(2026, 4, 7).unwrap())
            .await
            .unwrap();
        let item = insert_item(&repo, campaign.id, "Bridge repairs").await;
        repo.insert_rating(item.id, 10.0, Vec::new(), Utc::now())
            .await
            .unwrap();
        repo.insert_generated_article(
            NewArticle {
                campaign_id: campaign.id,
                content_item_id: Some(item.id),
                is_manual: false,
                headline: "Bridge repairs".to_string(),
                content: "body".to_string(),
                word_count: 1,
            },
            FactCheckRecord::passed(1, 25.0, serde_json::json!({})),
        )
        .await
        .unwrap();
        // Ratings are copied last; losing their table fails the snapshot midway.
        repo.conn
            .call(|conn| {
                conn.execute_batch("DROP TABLE archived_ratings")?;
                Ok(())
            })
            .await
            .unwrap();

        let result = repo
            .archive_campaign(campaign.id, ArchiveReason::Manual, Utc::now())
            .await;

        assert!(matches!(result, Err(AppError::Archive { .. })));
        assert!(repo
            .archived_articles(campaign.id, ArchiveReason::Manual)
            .await
            .unwrap()
            .is_empty());
    }
}
