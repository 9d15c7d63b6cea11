use chrono::{NaiveDate, Utc};
use rusqlite::{params, OptionalExtension, Row};

use crate::error::{AppError, Result};
use crate::models::{Article, Campaign, CampaignStatus, FactCheckRecord, NewArticle};

use super::repository::{
    claim_stage_run_in, datetime_column, date_column, optional_datetime_column, parsed_column,
    Repository,
};

const CAMPAIGN_COLUMNS: &str = "id, date, status, subject_line, review_sent_at, final_sent_at, status_before_send, metrics, created_at, updated_at";

const ARTICLE_COLUMNS: &str = "id, campaign_id, content_item_id, is_manual, headline, content, word_count, rank, is_active, skipped, fact_check_score, fact_check_details, review_position, final_position, created_at";

/// Which position column a checkpoint writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Review,
    Final,
}

/// Marker claimed in the same transaction as a checkpoint.
#[derive(Debug, Clone)]
pub struct StageClaim {
    pub stage: &'static str,
    pub cycle_date: NaiveDate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckpointOutcome {
    Applied,
    AlreadyRan,
}

/// Result of a guarded write, decided inside the connection thread.
enum Guarded<T> {
    Done(T),
    Missing,
    Stale(CampaignStatus),
    Claimed,
    /// A final send already passed its checkpoint and has not finished.
    InFlight,
}

impl Repository {
    // Campaign operations

    /// Returns the campaign for `date`, creating it in `draft` if absent.
    pub async fn ensure_campaign(&self, date: NaiveDate) -> Result<Campaign> {
        let campaign = self
            .conn
            .call(move |conn| {
                let now = Utc::now().to_rfc3339();
                conn.execute(
                    r#"INSERT INTO campaigns (date, status, created_at, updated_at)
                       VALUES (?1, 'draft', ?2, ?2)
                       ON CONFLICT(date) DO NOTHING"#,
                    params![date.to_string(), now],
                )?;
                let campaign = conn.query_row(
                    &format!("SELECT {} FROM campaigns WHERE date = ?1", CAMPAIGN_COLUMNS),
                    params![date.to_string()],
                    campaign_from_row,
                )?;
                Ok(campaign)
            })
            .await?;
        Ok(campaign)
    }

    pub async fn get_campaign(&self, id: i64) -> Result<Campaign> {
        let campaign = self
            .conn
            .call(move |conn| {
                let campaign = conn
                    .query_row(
                        &format!("SELECT {} FROM campaigns WHERE id = ?1", CAMPAIGN_COLUMNS),
                        params![id],
                        campaign_from_row,
                    )
                    .optional()?;
                Ok(campaign)
            })
            .await?;
        campaign.ok_or_else(|| AppError::CampaignNotFound(id.to_string()))
    }

    pub async fn find_campaign_by_date(&self, date: NaiveDate) -> Result<Option<Campaign>> {
        let campaign = self
            .conn
            .call(move |conn| {
                let campaign = conn
                    .query_row(
                        &format!("SELECT {} FROM campaigns WHERE date = ?1", CAMPAIGN_COLUMNS),
                        params![date.to_string()],
                        campaign_from_row,
                    )
                    .optional()?;
                Ok(campaign)
            })
            .await?;
        Ok(campaign)
    }

    pub async fn campaign_by_date(&self, date: NaiveDate) -> Result<Campaign> {
        self.find_campaign_by_date(date)
            .await?
            .ok_or_else(|| AppError::CampaignNotFound(date.to_string()))
    }

    pub async fn set_subject_line(&self, id: i64, subject_line: String) -> Result<()> {
        self.conn
            .call(move |conn| {
                conn.execute(
                    "UPDATE campaigns SET subject_line = ?1, updated_at = ?2 WHERE id = ?3",
                    params![subject_line, Utc::now().to_rfc3339(), id],
                )?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Shallow-merges `patch` into the campaign's metrics object.
    pub async fn merge_metrics(&self, id: i64, patch: serde_json::Value) -> Result<()> {
        self.conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let raw: Option<String> = tx
                    .query_row(
                        "SELECT metrics FROM campaigns WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                let Some(raw) = raw else {
                    return Ok(());
                };
                let mut metrics: serde_json::Value =
                    serde_json::from_str(&raw).unwrap_or_else(|_| serde_json::json!({}));
                if let (Some(target), Some(source)) = (metrics.as_object_mut(), patch.as_object()) {
                    for (key, value) in source {
                        target.insert(key.clone(), value.clone());
                    }
                }
                tx.execute(
                    "UPDATE campaigns SET metrics = ?1 WHERE id = ?2",
                    params![metrics.to_string(), id],
                )?;
                tx.commit()?;
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Moves the campaign from `expected` to `target` only if its status is
    /// still `expected` when the write lands.
    pub async fn compare_and_set_status(
        &self,
        id: i64,
        expected: CampaignStatus,
        target: CampaignStatus,
    ) -> Result<()> {
        let outcome = self
            .conn
            .call(move |conn| {
                let now = Utc::now().to_rfc3339();
                let changed = match target {
                    CampaignStatus::Sent => conn.execute(
                        r#"UPDATE campaigns SET status = ?1, final_sent_at = ?2, updated_at = ?2
                           WHERE id = ?3 AND status = ?4"#,
                        params![target.as_str(), now, id, expected.as_str()],
                    )?,
                    CampaignStatus::Failed => conn.execute(
                        r#"UPDATE campaigns SET status = ?1, status_before_send = ?4, updated_at = ?2
                           WHERE id = ?3 AND status = ?4"#,
                        params![target.as_str(), now, id, expected.as_str()],
                    )?,
                    _ => conn.execute(
                        "UPDATE campaigns SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                        params![target.as_str(), now, id, expected.as_str()],
                    )?,
                };
                if changed == 1 {
                    return Ok(Guarded::Done(()));
                }
                Ok(current_status(conn, id)?
                    .map(Guarded::Stale)
                    .unwrap_or(Guarded::Missing))
            })
            .await?;
        resolve(outcome, id, expected)
    }

    /// Applies a position checkpoint atomically: claims the stage marker (if
    /// any), re-checks the status, updates the campaign row, and writes the
    /// positions. For the review checkpoint the status moves to `in_review`.
    pub async fn apply_checkpoint(
        &self,
        id: i64,
        expected: CampaignStatus,
        checkpoint: Checkpoint,
        positions: Vec<(i64, i64)>,
        claim: Option<StageClaim>,
    ) -> Result<CheckpointOutcome> {
        let outcome = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                if let Some(claim) = &claim {
                    if !claim_stage_run_in(&tx, claim.stage, claim.cycle_date)? {
                        return Ok(Guarded::Claimed);
                    }
                }

                let now = Utc::now().to_rfc3339();
                let changed = match checkpoint {
                    Checkpoint::Review => tx.execute(
                        r#"UPDATE campaigns SET status = 'in_review', review_sent_at = ?1, updated_at = ?1
                           WHERE id = ?2 AND status = ?3"#,
                        params![now, id, expected.as_str()],
                    )?,
                    Checkpoint::Final => tx.execute(
                        r#"UPDATE campaigns SET status_before_send = ?3, updated_at = ?1
                           WHERE id = ?2 AND status = ?3 AND status_before_send IS NULL"#,
                        params![now, id, expected.as_str()],
                    )?,
                };
                if changed != 1 {
                    return Ok(match current_status(&tx, id)? {
                        None => Guarded::Missing,
                        Some(actual) if actual == expected && checkpoint == Checkpoint::Final => {
                            Guarded::InFlight
                        }
                        Some(actual) => Guarded::Stale(actual),
                    });
                }

                let column = match checkpoint {
                    Checkpoint::Review => "review_position",
                    Checkpoint::Final => "final_position",
                };
                tx.execute(
                    &format!("UPDATE articles SET {} = NULL WHERE campaign_id = ?1", column),
                    params![id],
                )?;
                for (article_id, position) in &positions {
                    tx.execute(
                        &format!(
                            "UPDATE articles SET {} = ?1 WHERE id = ?2 AND campaign_id = ?3",
                            column
                        ),
                        params![position, article_id, id],
                    )?;
                }
                tx.commit()?;
                Ok(Guarded::Done(CheckpointOutcome::Applied))
            })
            .await?;

        match outcome {
            Guarded::Claimed => Ok(CheckpointOutcome::AlreadyRan),
            other => resolve(other, id, expected),
        }
    }

    /// Settles a final send whose email went out. Editorial moves made
    /// while the email was in flight do not block it; only a terminal
    /// status does.
    pub async fn complete_send(&self, id: i64) -> Result<()> {
        let outcome = self
            .conn
            .call(move |conn| {
                let now = Utc::now().to_rfc3339();
                let changed = conn.execute(
                    r#"UPDATE campaigns SET status = 'sent', final_sent_at = ?1, updated_at = ?1
                       WHERE id = ?2 AND status_before_send IS NOT NULL
                         AND status NOT IN ('sent', 'failed')"#,
                    params![now, id],
                )?;
                if changed == 1 {
                    return Ok(Guarded::Done(()));
                }
                Ok(current_status(conn, id)?
                    .map(Guarded::Stale)
                    .unwrap_or(Guarded::Missing))
            })
            .await?;
        settle(outcome, id, CampaignStatus::Sent)
    }

    /// Moves a campaign whose send failed to `failed`. A status recorded by
    /// the final checkpoint is kept; otherwise `before` is recorded.
    pub async fn abort_send(&self, id: i64, before: CampaignStatus) -> Result<()> {
        let outcome = self
            .conn
            .call(move |conn| {
                let now = Utc::now().to_rfc3339();
                let changed = conn.execute(
                    r#"UPDATE campaigns
                       SET status = 'failed',
                           status_before_send = COALESCE(status_before_send, ?1),
                           updated_at = ?2
                       WHERE id = ?3 AND status NOT IN ('sent', 'failed')"#,
                    params![before.as_str(), now, id],
                )?;
                if changed == 1 {
                    return Ok(Guarded::Done(()));
                }
                Ok(current_status(conn, id)?
                    .map(Guarded::Stale)
                    .unwrap_or(Guarded::Missing))
            })
            .await?;
        settle(outcome, id, CampaignStatus::Failed)
    }

    // Article operations

    /// Stores a generated article together with its fact-check result in
    /// one insert. It is active only when the record carries a rank.
    pub async fn insert_generated_article(
        &self,
        article: NewArticle,
        check: FactCheckRecord,
    ) -> Result<Article> {
        let is_active = check.rank.is_some();
        self.insert_article_row(article, check.rank, is_active, check.score, Some(check.details))
            .await
    }

    /// Stores an editor-written article, active at `rank`.
    pub async fn insert_manual_article(&self, article: NewArticle, rank: i64) -> Result<Article> {
        self.insert_article_row(article, Some(rank), true, None, None).await
    }

    async fn insert_article_row(
        &self,
        article: NewArticle,
        rank: Option<i64>,
        is_active: bool,
        fact_check_score: Option<f64>,
        fact_check_details: Option<serde_json::Value>,
    ) -> Result<Article> {
        let article = self
            .conn
            .call(move |conn| {
                conn.execute(
                    r#"INSERT INTO articles
                           (campaign_id, content_item_id, is_manual, headline, content, word_count,
                            rank, is_active, fact_check_score, fact_check_details, created_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)"#,
                    params![
                        article.campaign_id,
                        article.content_item_id,
                        article.is_manual,
                        article.headline,
                        article.content,
                        article.word_count,
                        rank,
                        is_active,
                        fact_check_score,
                        fact_check_details.map(|d| d.to_string()),
                        Utc::now().to_rfc3339(),
                    ],
                )?;
                let id = conn.last_insert_rowid();
                let article = conn.query_row(
                    &format!("SELECT {} FROM articles WHERE id = ?1", ARTICLE_COLUMNS),
                    params![id],
                    article_from_row,
                )?;
                Ok(article)
            })
            .await?;
        Ok(article)
    }

    pub async fn get_article(&self, id: i64) -> Result<Article> {
        let article = self
            .conn
            .call(move |conn| {
                let article = conn
                    .query_row(
                        &format!("SELECT {} FROM articles WHERE id = ?1", ARTICLE_COLUMNS),
                        params![id],
                        article_from_row,
                    )
                    .optional()?;
                Ok(article)
            })
            .await?;
        article.ok_or(AppError::ArticleNotFound(id))
    }

    pub async fn articles_for_campaign(&self, campaign_id: i64) -> Result<Vec<Article>> {
        let articles = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {} FROM articles WHERE campaign_id = ?1
                       ORDER BY rank IS NULL, rank, id"#,
                    ARTICLE_COLUMNS
                ))?;
                let articles = stmt
                    .query_map(params![campaign_id], article_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(articles)
            })
            .await?;
        Ok(articles)
    }

    pub async fn set_article_skipped(&self, id: i64, skipped: bool) -> Result<()> {
        self.update_unsent_article(id, "skipped", skipped as i64).await
    }

    pub async fn set_article_rank(&self, id: i64, rank: i64) -> Result<()> {
        self.update_unsent_article(id, "rank", rank).await
    }

    /// Editorial edits are refused once the owning campaign has been sent.
    async fn update_unsent_article(&self, id: i64, column: &'static str, value: i64) -> Result<()> {
        let outcome = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    &format!(
                        r#"UPDATE articles SET {} = ?1
                           WHERE id = ?2
                             AND campaign_id IN (SELECT id FROM campaigns WHERE status != 'sent')"#,
                        column
                    ),
                    params![value, id],
                )?;
                if changed == 1 {
                    return Ok(None);
                }
                let campaign_id: Option<i64> = conn
                    .query_row(
                        "SELECT campaign_id FROM articles WHERE id = ?1",
                        params![id],
                        |row| row.get(0),
                    )
                    .optional()?;
                Ok(Some(campaign_id))
            })
            .await?;

        match outcome {
            None => Ok(()),
            Some(None) => Err(AppError::ArticleNotFound(id)),
            Some(Some(campaign_id)) => Err(AppError::TerminalState {
                campaign_id,
                status: CampaignStatus::Sent,
            }),
        }
    }

    /// Removes generated articles so the campaign can be reassembled.
    /// Manual articles are kept.
    pub async fn delete_generated_articles(&self, campaign_id: i64) -> Result<usize> {
        let deleted = self
            .conn
            .call(move |conn| {
                let deleted = conn.execute(
                    r#"DELETE FROM articles
                       WHERE campaign_id = ?1 AND is_manual = 0
                         AND campaign_id IN (SELECT id FROM campaigns WHERE status != 'sent')"#,
                    params![campaign_id],
                )?;
                Ok(deleted)
            })
            .await?;
        Ok(deleted)
    }
}

fn current_status(
    conn: &rusqlite::Connection,
    id: i64,
) -> rusqlite::Result<Option<CampaignStatus>> {
    conn.query_row(
        "SELECT status FROM campaigns WHERE id = ?1",
        params![id],
        |row| parsed_column::<CampaignStatus>(row, 0),
    )
    .optional()
}

fn resolve<T>(outcome: Guarded<T>, id: i64, expected: CampaignStatus) -> Result<T> {
    match outcome {
        Guarded::Done(value) => Ok(value),
        Guarded::Missing => Err(AppError::CampaignNotFound(id.to_string())),
        Guarded::Stale(actual) => Err(AppError::StaleStatus {
            campaign_id: id,
            expected,
            actual,
        }),
        Guarded::Claimed => Err(AppError::Other(anyhow::anyhow!(
            "stage marker for campaign {} already claimed",
            id
        ))),
        Guarded::InFlight => Err(AppError::GuardFailed {
            campaign_id: id,
            to: CampaignStatus::Sent,
            reason: "a final send is already in flight; mark the campaign failed to abandon it"
                .to_string(),
        }),
    }
}

/// Outcome of a send settlement, where the only refusal is a terminal status.
fn settle(outcome: Guarded<()>, id: i64, target: CampaignStatus) -> Result<()> {
    match outcome {
        Guarded::Done(()) => Ok(()),
        Guarded::Stale(status) if status.is_terminal() => Err(AppError::TerminalState {
            campaign_id: id,
            status,
        }),
        Guarded::Stale(status) => Err(AppError::GuardFailed {
            campaign_id: id,
            to: target,
            reason: format!("no final send in flight (status {})", status),
        }),
        other => resolve(other, id, target),
    }
}

fn campaign_from_row(row: &Row) -> rusqlite::Result<Campaign> {
    let metrics: String = row.get(7)?;
    Ok(Campaign {
        id: row.get(0)?,
        date: date_column(row, 1)?,
        status: parsed_column(row, 2)?,
        subject_line: row.get(3)?,
        review_sent_at: optional_datetime_column(row, 4)?,
        final_sent_at: optional_datetime_column(row, 5)?,
        status_before_send: row
            .get::<_, Option<String>>(6)?
            .and_then(|s| s.parse().ok()),
        metrics: serde_json::from_str(&metrics).unwrap_or_else(|_| serde_json::json!({})),
        created_at: datetime_column(row, 8)?,
        updated_at: datetime_column(row, 9)?,
    })
}

fn article_from_row(row: &Row) -> rusqlite::Result<Article> {
    Ok(Article {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        content_item_id: row.get(2)?,
        is_manual: row.get::<_, i64>(3)? != 0,
        headline: row.get(4)?,
        content: row.get(5)?,
        word_count: row.get(6)?,
        rank: row.get(7)?,
        is_active: row.get::<_, i64>(8)? != 0,
        skipped: row.get::<_, i64>(9)? != 0,
        fact_check_score: row.get(10)?,
        fact_check_details: row
            .get::<_, Option<String>>(11)?
            .and_then(|s| serde_json::from_str(&s).ok()),
        review_position: row.get(12)?,
        final_position: row.get(13)?,
        created_at: datetime_column(row, 14)?,
    })
}
