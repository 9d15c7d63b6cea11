use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::error::Result;
use crate::models::{Event, NewEvent};

use super::repository::{datetime_column, Repository};

const EVENT_COLUMNS: &str = "e.id, e.title, e.starts_at, e.venue, e.url, e.featured";

impl Repository {
    // Event operations

    pub async fn insert_event(&self, event: NewEvent) -> Result<i64> {
        let id = self
            .conn
            .call(move |conn| {
                conn.execute(
                    "INSERT INTO events (title, starts_at, venue, url, featured) VALUES (?1, ?2, ?3, ?4, ?5)",
                    params![
                        event.title,
                        event.starts_at.to_rfc3339(),
                        event.venue,
                        event.url,
                        event.featured
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            })
            .await?;
        Ok(id)
    }

    /// Events starting in `[from, until)`, featured first, then soonest.
    pub async fn upcoming_events(
        &self,
        from: DateTime<Utc>,
        until: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let events = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {} FROM events e
                       WHERE e.starts_at >= ?1 AND e.starts_at < ?2
                       ORDER BY e.featured DESC, e.starts_at, e.id
                       LIMIT ?3"#,
                    EVENT_COLUMNS
                ))?;
                let events = stmt
                    .query_map(
                        params![from.to_rfc3339(), until.to_rfc3339(), limit as i64],
                        event_from_row,
                    )?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(events)
            })
            .await?;
        Ok(events)
    }

    /// Attaches events in the given order, numbering from `first_position`.
    /// Already attached events keep their original position.
    pub async fn attach_events(
        &self,
        campaign_id: i64,
        event_ids: Vec<i64>,
        first_position: i64,
    ) -> Result<usize> {
        let attached = self
            .conn
            .call(move |conn| {
                let tx = conn.transaction()?;
                let mut attached = 0;
                for (index, event_id) in event_ids.iter().enumerate() {
                    attached += tx.execute(
                        "INSERT OR IGNORE INTO campaign_events (campaign_id, event_id, position) VALUES (?1, ?2, ?3)",
                        params![campaign_id, event_id, first_position + index as i64],
                    )?;
                }
                tx.commit()?;
                Ok(attached)
            })
            .await?;
        Ok(attached)
    }

    pub async fn events_for_campaign(&self, campaign_id: i64) -> Result<Vec<Event>> {
        let events = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare(&format!(
                    r#"SELECT {} FROM events e
                       JOIN campaign_events ce ON ce.event_id = e.id
                       WHERE ce.campaign_id = ?1
                       ORDER BY ce.position"#,
                    EVENT_COLUMNS
                ))?;
                let events = stmt
                    .query_map(params![campaign_id], event_from_row)?
                    .collect::<std::result::Result<Vec<_>, _>>()?;
                Ok(events)
            })
            .await?;
        Ok(events)
    }
}

fn event_from_row(row: &Row) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        title: row.get(1)?,
        starts_at: datetime_column(row, 2)?,
        venue: row.get(3)?,
        url: row.get(4)?,
        featured: row.get::<_, i64>(5)? != 0,
    })
}
