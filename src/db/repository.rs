use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, OptionalExtension, Row};
use tokio_rusqlite::Connection;

use crate::error::Result;
use crate::models::{ContentItem, CriterionScore, NewContentItem, Rating};

use super::schema::SCHEMA;

pub struct Repository {
    pub(super) conn: Connection,
}

/// A content item together with its most recent rating.
#[derive(Debug, Clone)]
pub struct ScoredItem {
    pub item: ContentItem,
    pub rating_id: i64,
    pub total_score: f64,
}

pub(super) const CONTENT_ITEM_COLUMNS: &str = "id, campaign_id, source_id, natural_key, external_id, title, link, description, body, author, image_url, published_at, ingested_at";

impl Repository {
    pub async fn new(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path).await?;
        Self::init(conn).await
    }

    #[cfg(test)]
    pub async fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().await?;
        Self::init(conn).await
    }

    async fn init(conn: Connection) -> Result<Self> {
        conn.call(|conn| {
            conn.execute_batch(SCHEMA)?;
            Ok(())
        })
        .await?;

        Ok(Self { conn })
    }

    // Content item operations

    /// Inserts the item unless `(source_id, natural_key)` already exists.
    /// Returns the stored row only when this call created it.
    pub async fn insert_content_item_if_new(
        &self,
        campaign_id: Option<i64>,
        item: NewContentItem,
        ingested_at: DateTime<Utc>,
    ) -> Result<Option<ContentItem>> {
        let natural_key = item.natural_key();
        let published_at = item.published_at.unwrap_or(ingested_at);

        let inserted = self
            .conn
            .call(move |conn| {
                let changed = conn.execute(
                    r#"INSERT INTO content_items
                           (campaign_id, source_id, natural_key, external_id, title, link,
                            description, body, author, image_url, published_at, ingested_at)
                       VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
                       ON CONFLICT(source_id, natural_key) DO NOTHING"#,
                    params![
                        campaign_id,
                        item.source_id,
                        natural_key,
                        item.external_id,
                        item.title.trim(),
                        item.link.trim(),
                        item.description,
                        item.body,
                        item.author,
                        item.image_url,
                        published_at.to_rfc3339(),
                        ingested_at.to_rfc3339(),
                    ],
                )?;
                if changed == 0 {
                    return Ok(None);
                }

                let id = conn.last_insert_rowid();
                let item = conn
                    .query_row(
                        &format!("SELECT {} FROM content_items WHERE id = ?1", CONTENT_ITEM_COLUMNS),
                        params![id],
                        content_item_from_row,
                    )
                    .optional()?;
                Ok(item)
            })
            .await?;
        Ok(inserted)
    }

    pub async fn content_items_for_campaign(&self, campaign_id: i64) -> Result<Vec<ContentItem>> {
        let items = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    "SELECT {} FROM content_items WHERE campaign_id = ?1 ORDER BY ingested_at, id",
                    CONTENT_ITEM_COLUMNS
                ))?;
                let items = stmt
                    .query_map(params![campaign_id], content_item_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    /// Items of the campaign's cycle that have no rating yet.
    pub async fn unscored_items_for_campaign(&self, campaign_id: i64) -> Result<Vec<ContentItem>> {
        let items = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {} FROM content_items ci
                       WHERE ci.campaign_id = ?1
                         AND NOT EXISTS (SELECT 1 FROM ratings r WHERE r.content_item_id = ci.id)
                       ORDER BY ci.ingested_at, ci.id"#,
                    CONTENT_ITEM_COLUMNS
                ))?;
                let items = stmt
                    .query_map(params![campaign_id], content_item_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    // Rating operations

    pub async fn insert_rating(
        &self,
        content_item_id: i64,
        total_score: f64,
        scores: Vec<CriterionScore>,
        rated_at: DateTime<Utc>,
    ) -> Result<Rating> {
        let rating = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO ratings (content_item_id, total_score, rated_at) VALUES (?1, ?2, ?3)",
                    params![content_item_id, total_score, rated_at.to_rfc3339()],
                )?;
                let rating_id = tx.last_insert_rowid();
                for score in &scores {
                    tx.execute(
                        r#"INSERT INTO criterion_scores (rating_id, criterion_id, score, weight, reason)
                           VALUES (?1, ?2, ?3, ?4, ?5)"#,
                        params![
                            rating_id,
                            score.criterion_id,
                            score.score,
                            score.weight,
                            score.reason
                        ],
                    )?;
                }
                tx.commit()?;

                Ok(Rating {
                    id: rating_id,
                    content_item_id,
                    total_score,
                    scores,
                    rated_at,
                })
            })
            .await?;
        Ok(rating)
    }

    pub async fn ratings_for_item(&self, content_item_id: i64) -> Result<Vec<Rating>> {
        let ratings = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(
                    "SELECT id, total_score, rated_at FROM ratings WHERE content_item_id = ?1 ORDER BY id",
                )?;
                let heads = stmt
                    .query_map(params![content_item_id], |row| {
                        Ok((
                            row.get::<_, i64>(0)?,
                            row.get::<_, f64>(1)?,
                            datetime_column(row, 2)?,
                        ))
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;

                let mut score_stmt = conn.prepare(
                    "SELECT criterion_id, score, weight, reason FROM criterion_scores WHERE rating_id = ?1 ORDER BY id",
                )?;
                let mut ratings = Vec::with_capacity(heads.len());
                for (id, total_score, rated_at) in heads {
                    let scores = score_stmt
                        .query_map(params![id], |row| {
                            Ok(CriterionScore {
                                criterion_id: row.get(0)?,
                                score: row.get(1)?,
                                weight: row.get(2)?,
                                reason: row.get(3)?,
                            })
                        })?
                        .collect::<std::result::Result<Vec<_>, _>>()?;
                    ratings.push(Rating {
                        id,
                        content_item_id,
                        total_score,
                        scores,
                        rated_at,
                    });
                }
                Ok(ratings)
            })
            .await?;
        Ok(ratings)
    }

    /// Rated items of the campaign, each paired with its newest rating.
    pub async fn scored_items_for_campaign(&self, campaign_id: i64) -> Result<Vec<ScoredItem>> {
        let items = self
            .conn
            .call(move |conn| {
                let columns = CONTENT_ITEM_COLUMNS
                    .split(", ")
                    .map(|c| format!("ci.{}", c))
                    .collect::<Vec<_>>()
                    .join(", ");
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {}, r.id, r.total_score
                       FROM content_items ci
                       JOIN ratings r ON r.id = (
                           SELECT MAX(id) FROM ratings WHERE content_item_id = ci.id
                       )
                       WHERE ci.campaign_id = ?1
                       ORDER BY ci.ingested_at, ci.id"#,
                    columns
                ))?;
                let items = stmt
                    .query_map(params![campaign_id], |row| {
                        Ok(ScoredItem {
                            item: content_item_from_row(row)?,
                            rating_id: row.get(13)?,
                            total_score: row.get(14)?,
                        })
                    })?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(items)
            })
            .await?;
        Ok(items)
    }

    // Stage run markers

    /// Records that `stage` ran for `cycle_date`. Returns false when another
    /// invocation already holds the marker.
    pub async fn claim_stage_run(&self, stage: &str, cycle_date: NaiveDate) -> Result<bool> {
        let stage = stage.to_string();
        let claimed = self
            .conn
            .call(move |conn| Ok(claim_stage_run_in(conn, &stage, cycle_date)?))
            .await?;
        Ok(claimed)
    }

    pub async fn has_stage_run(&self, stage: &str, cycle_date: NaiveDate) -> Result<bool> {
        let stage = stage.to_string();
        let exists = self
            .conn
            .call(move |conn| {
                let count: i64 = conn.query_row(
                    "SELECT COUNT(*) FROM stage_runs WHERE stage = ?1 AND cycle_date = ?2",
                    params![stage, cycle_date.to_string()],
                    |row| row.get(0),
                )?;
                Ok(count > 0)
            })
            .await?;
        Ok(exists)
    }
}

pub(super) fn claim_stage_run_in(
    conn: &rusqlite::Connection,
    stage: &str,
    cycle_date: NaiveDate,
) -> rusqlite::Result<bool> {
    let changed = conn.execute(
        "INSERT OR IGNORE INTO stage_runs (stage, cycle_date, ran_at) VALUES (?1, ?2, ?3)",
        params![stage, cycle_date.to_string(), Utc::now().to_rfc3339()],
    )?;
    Ok(changed > 0)
}

pub(super) fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    // Try RFC3339 first (e.g., "2026-01-11T12:34:56+00:00")
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // Try SQLite datetime format (e.g., "2026-01-11 12:34:56")
    if let Ok(naive) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(naive.and_utc());
    }
    None
}

pub(super) fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        Type::Text,
        Box::new(std::io::Error::new(std::io::ErrorKind::InvalidData, message)),
    )
}

pub(super) fn datetime_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    parse_datetime(&raw).ok_or_else(|| conversion_error(idx, format!("bad timestamp '{}'", raw)))
}

pub(super) fn optional_datetime_column(
    row: &Row,
    idx: usize,
) -> rusqlite::Result<Option<DateTime<Utc>>> {
    Ok(row
        .get::<_, Option<String>>(idx)?
        .and_then(|s| parse_datetime(&s)))
}

pub(super) fn date_column(row: &Row, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|e| conversion_error(idx, format!("bad date '{}': {}", raw, e)))
}

pub(super) fn parsed_column<T>(row: &Row, idx: usize) -> rusqlite::Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    let raw: String = row.get(idx)?;
    raw.parse::<T>().map_err(|e| conversion_error(idx, e))
}

pub(super) fn content_item_from_row(row: &Row) -> rusqlite::Result<ContentItem> {
    Ok(ContentItem {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        source_id: row.get(2)?,
        natural_key: row.get(3)?,
        external_id: row.get(4)?,
        title: row.get(5)?,
        link: row.get(6)?,
        description: row.get(7)?,
        body: row.get(8)?,
        author: row.get(9)?,
        image_url: row.get(10)?,
        published_at: datetime_column(row, 11)?,
        ingested_at: datetime_column(row, 12)?,
    })
}
