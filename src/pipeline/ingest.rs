use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};

use crate::config::SourceConfig;
use crate::db::Repository;
use crate::error::Result;
use crate::feed::ContentSource;
use crate::models::{ContentItem, NewContentItem};

/// Outcome of one source within an ingestion cycle.
#[derive(Debug, Default, Clone)]
pub struct SourceReport {
    pub source_id: String,
    pub fetched: usize,
    pub inserted: usize,
    pub already_known: usize,
    pub discarded: usize,
    pub item_errors: Vec<String>,
    /// Set when the whole source could not be fetched.
    pub failure: Option<String>,
}

#[derive(Debug, Default)]
pub struct IngestReport {
    pub sources: Vec<SourceReport>,
    pub new_items: Vec<ContentItem>,
}

impl IngestReport {
    pub fn inserted(&self) -> usize {
        self.new_items.len()
    }

    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|s| s.failure.is_some())
    }
}

/// Persists each natural key exactly once. Ingestion is additive: an
/// existing row is never updated.
pub struct Gatekeeper<'a> {
    repo: &'a Repository,
}

impl<'a> Gatekeeper<'a> {
    pub fn new(repo: &'a Repository) -> Self {
        Self { repo }
    }

    pub async fn ingest_batch(
        &self,
        campaign_id: Option<i64>,
        source_id: &str,
        items: Vec<NewContentItem>,
        now: DateTime<Utc>,
    ) -> (SourceReport, Vec<ContentItem>) {
        let mut report = SourceReport {
            source_id: source_id.to_string(),
            fetched: items.len(),
            ..Default::default()
        };
        let mut inserted = Vec::new();

        for item in items {
            if !item.is_usable() {
                report.discarded += 1;
                continue;
            }
            let title = item.title.clone();
            match self.repo.insert_content_item_if_new(campaign_id, item, now).await {
                Ok(Some(row)) => inserted.push(row),
                Ok(None) => report.already_known += 1,
                Err(e) => {
                    tracing::warn!(source = source_id, title = %title, error = %e, "Failed to store item");
                    report.item_errors.push(format!("{}: {}", title, e));
                }
            }
        }

        report.inserted = inserted.len();
        tracing::info!(
            source = source_id,
            fetched = report.fetched,
            inserted = report.inserted,
            already_known = report.already_known,
            discarded = report.discarded,
            "Ingested source batch"
        );
        (report, inserted)
    }

    /// Fetches every enabled source and ingests what came back. A source that
    /// cannot be fetched is recorded and the others continue.
    pub async fn run(
        &self,
        fetcher: &dyn ContentSource,
        sources: &[SourceConfig],
        campaign_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> IngestReport {
        let mut report = IngestReport::default();

        for (source_id, fetched) in fetch_sources(fetcher, sources).await {
            match fetched {
                Ok(items) => {
                    let (source_report, inserted) =
                        self.ingest_batch(campaign_id, &source_id, items, now).await;
                    report.sources.push(source_report);
                    report.new_items.extend(inserted);
                }
                Err(e) => {
                    tracing::warn!(source = %source_id, error = %e, "Source fetch failed");
                    report.sources.push(SourceReport {
                        source_id,
                        failure: Some(e.to_string()),
                        ..Default::default()
                    });
                }
            }
        }

        report
    }
}

/// Fetch enabled sources concurrently, keeping configuration order in the result.
pub async fn fetch_sources(
    fetcher: &dyn ContentSource,
    sources: &[SourceConfig],
) -> Vec<(String, Result<Vec<NewContentItem>>)> {
    stream::iter(sources.iter().filter(|s| s.enabled))
        .map(|source| async move {
            let result = fetcher.fetch_batch(source).await;
            (source.id.clone(), result)
        })
        .buffered(5) // Max 5 concurrent fetches
        .collect()
        .await
}
