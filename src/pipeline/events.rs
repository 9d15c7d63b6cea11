use std::collections::HashSet;

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;

use crate::config::EventsConfig;
use crate::db::Repository;
use crate::error::Result;

/// UTC instant of local midnight on `date`.
fn local_midnight(tz: Tz, date: NaiveDate) -> DateTime<Utc> {
    let midnight = date.and_time(chrono::NaiveTime::MIN);
    tz.from_local_datetime(&midnight)
        .earliest()
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| midnight.and_utc())
}

/// Attaches upcoming events to the campaign, featured first, then soonest.
/// Running it again only fills free slots up to the configured maximum.
pub async fn populate_events(
    repo: &Repository,
    campaign_id: i64,
    tz: Tz,
    config: &EventsConfig,
) -> Result<usize> {
    let campaign = repo.get_campaign(campaign_id).await?;
    let existing = repo.events_for_campaign(campaign_id).await?;
    let free = config.max_per_campaign.saturating_sub(existing.len());
    if free == 0 {
        return Ok(0);
    }

    let from = local_midnight(tz, campaign.date);
    let until = from + Duration::days(config.lookahead_days);
    let attached: HashSet<i64> = existing.iter().map(|e| e.id).collect();
    let selection: Vec<i64> = repo
        .upcoming_events(from, until, config.max_per_campaign + existing.len())
        .await?
        .into_iter()
        .map(|e| e.id)
        .filter(|id| !attached.contains(id))
        .take(free)
        .collect();

    let added = repo
        .attach_events(campaign_id, selection, existing.len() as i64 + 1)
        .await?;
    tracing::info!(campaign = campaign_id, added, total = existing.len() + added, "Populated events");
    Ok(added)
}

#[cfg(test)]
mod tests {
    use chrono_tz::America::Chicago;

    use super::*;
    use crate::models::NewEvent;

    async fn event(repo: &Repository, title: &str, day: u32, featured: bool) -> i64 {
        repo.insert_event(NewEvent {
            title: title.to_string(),
            starts_at: Chicago
                .with_ymd_and_hms(2026, 5, day, 18, 0, 0)
                .unwrap()
                .with_timezone(&Utc),
            venue: Some("Town hall".to_string()),
            url: None,
            featured,
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn test_featured_first_within_window_and_idempotent() {
        let repo = Repository::in_memory().await.unwrap();
        let campaign = repo
            .ensure_campaign(NaiveDate::from_ymd_opt(2026, 5, 4).unwrap())
            .await
            .unwrap();
        event(&repo, "Past market", 2, true).await;
        let soon = event(&repo, "Concert", 5, false).await;
        let featured = event(&repo, "Parade", 9, true).await;
        event(&repo, "Later fair", 6, false).await;
        event(&repo, "Too far", 20, true).await;
        let config = EventsConfig {
            max_per_campaign: 2,
            lookahead_days: 7,
        };

        let added = populate_events(&repo, campaign.id, Chicago, &config).await.unwrap();
        let again = populate_events(&repo, campaign.id, Chicago, &config).await.unwrap();

        assert_eq!(added, 2);
        assert_eq!(again, 0);
        let ids: Vec<i64> = repo
            .events_for_campaign(campaign.id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![featured, soon]);
    }

    #[tokio::test]
    async fn test_fills_free_slots_later() {
        let repo = Repository::in_memory().await.unwrap();
        let campaign = repo
            .ensure_campaign(NaiveDate::from_ymd_opt(2026, 5, 4).unwrap())
            .await
            .unwrap();
        let config = EventsConfig {
            max_per_campaign: 3,
            lookahead_days: 7,
        };
        let first = event(&repo, "Concert", 5, false).await;
        populate_events(&repo, campaign.id, Chicago, &config).await.unwrap();
        let second = event(&repo, "Fair", 6, false).await;

        let added = populate_events(&repo, campaign.id, Chicago, &config).await.unwrap();

        assert_eq!(added, 1);
        let ids: Vec<i64> = repo
            .events_for_campaign(campaign.id)
            .await
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![first, second]);
    }
}
