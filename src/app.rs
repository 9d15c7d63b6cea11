use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde_json::json;

use crate::ai::{ClaudeClient, Deduplicator, Evaluator, FactChecker, GeneratedArticle, Generator};
use crate::config::Config;
use crate::db::{Repository, ScoredItem};
use crate::error::{AppError, Result};
use crate::feed::{ContentSource, FeedFetcher};
use crate::models::{
    ArchiveReason, ArchiveSummary, ArchivedArticle, Article, Campaign, CampaignStatus, ContentItem,
    Criterion, Event, NewArticle, NewEvent,
};
use crate::pipeline::{
    group_candidates, populate_events, rank_candidates, Archiver, Assembler, AssemblyReport,
    CampaignWorkflow, Decision, DispatchController, DispatchExecutor, DispatchOutcome, Gatekeeper,
    IngestReport, ScoringEngine, ScoringReport, SkipReason, Stage, StageRun,
};
use crate::services::{
    DispatchReceipt, EmailDispatcher, HttpEmailDispatcher, LogNotifier, Notifier, Severity,
    SlackNotifier,
};

/// The collaborators a pipeline run talks to.
pub struct Services {
    pub source: Arc<dyn ContentSource>,
    pub evaluator: Arc<dyn Evaluator>,
    pub generator: Arc<dyn Generator>,
    pub fact_checker: Arc<dyn FactChecker>,
    pub deduplicator: Arc<dyn Deduplicator>,
    pub email: Arc<dyn EmailDispatcher>,
    pub notifier: Arc<dyn Notifier>,
    pub model_version: String,
}

impl Services {
    /// Real services from configuration. Missing credentials leave the
    /// matching capability unconfigured; it fails when first used.
    pub fn from_config(config: &Config) -> Result<Self> {
        let source: Arc<dyn ContentSource> = Arc::new(FeedFetcher::new()?);

        let notifier: Arc<dyn Notifier> = match &config.slack_webhook_url {
            Some(url) => Arc::new(SlackNotifier::new(url.clone())?),
            None => Arc::new(LogNotifier),
        };

        let email: Arc<dyn EmailDispatcher> = match &config.email {
            Some(email) => Arc::new(HttpEmailDispatcher::new(email.clone())?),
            None => Arc::new(Unconfigured("email")),
        };

        let services = match &config.claude_api_key {
            Some(key) => {
                let claude = Arc::new(ClaudeClient::new(key.clone())?);
                Self {
                    source,
                    evaluator: claude.clone(),
                    generator: claude.clone(),
                    fact_checker: claude.clone(),
                    deduplicator: claude.clone(),
                    email,
                    notifier,
                    model_version: claude.model_version().to_string(),
                }
            }
            None => {
                let missing = Arc::new(Unconfigured("claude_api_key"));
                Self {
                    source,
                    evaluator: missing.clone(),
                    generator: missing.clone(),
                    fact_checker: missing.clone(),
                    deduplicator: missing,
                    email,
                    notifier,
                    model_version: "unconfigured".to_string(),
                }
            }
        };
        Ok(services)
    }
}

/// Stand-in for a capability whose configuration is missing.
struct Unconfigured(&'static str);

impl Unconfigured {
    fn error(&self) -> AppError {
        AppError::Config(format!("'{}' is not configured", self.0))
    }
}

#[async_trait]
impl Evaluator for Unconfigured {
    async fn evaluate(&self, _criterion: &Criterion, _item: &ContentItem) -> Result<String> {
        Err(self.error())
    }
}

#[async_trait]
impl Generator for Unconfigured {
    async fn generate(&self, _item: &ContentItem) -> Result<String> {
        Err(self.error())
    }

    async fn subject_line(&self, _headlines: &[String]) -> Result<String> {
        Err(self.error())
    }
}

#[async_trait]
impl FactChecker for Unconfigured {
    async fn check(&self, _article: &GeneratedArticle, _source: &ContentItem) -> Result<String> {
        Err(self.error())
    }
}

#[async_trait]
impl Deduplicator for Unconfigured {
    async fn group(&self, _items: &[ContentItem]) -> Result<String> {
        Err(self.error())
    }
}

#[async_trait]
impl EmailDispatcher for Unconfigured {
    async fn send_review(
        &self,
        _campaign: &Campaign,
        _articles: &[Article],
        _subject_line: &str,
    ) -> Result<DispatchReceipt> {
        Err(self.error())
    }

    async fn send_final(
        &self,
        _campaign: &Campaign,
        _articles: &[Article],
        _audience_id: &str,
    ) -> Result<DispatchReceipt> {
        Err(self.error())
    }
}

/// What happened to one stage on a tick.
#[derive(Debug)]
pub enum TickOutcome {
    Ran(String),
    Skipped(SkipReason),
    Failed(String),
}

#[derive(Debug)]
pub struct ContentBuild {
    pub ingest: IngestReport,
    pub scoring: ScoringReport,
    pub assembly: AssemblyReport,
}

#[derive(Debug)]
pub struct StatusReport {
    pub campaign: Campaign,
    pub articles: Vec<Article>,
    pub events: Vec<Event>,
    /// Snapshot sizes per reason, only for reasons with at least one snapshot.
    pub archives: Vec<(ArchiveReason, ArchiveSummary)>,
}

pub struct App {
    pub config: Config,
    pub repository: Repository,
    services: Services,
}

impl App {
    pub async fn new(config: Config) -> Result<Self> {
        let repository = Repository::new(&config.db_path).await?;
        let services = Services::from_config(&config)?;
        Ok(Self::with_services(config, repository, services))
    }

    pub fn with_services(config: Config, repository: Repository, services: Services) -> Self {
        Self {
            config,
            repository,
            services,
        }
    }

    /// Campaign date a stage works on when triggered at `now`.
    pub fn campaign_date_for(&self, stage: Stage, now: DateTime<Utc>) -> Result<NaiveDate> {
        let tz = self.config.schedule.tz()?;
        let local_date = now.with_timezone(&tz).date_naive();
        Ok(local_date + Duration::days(self.config.schedule.stage(stage).campaign_day_offset))
    }

    pub async fn ingest(&self, date: NaiveDate) -> Result<IngestReport> {
        let campaign = self.repository.ensure_campaign(date).await?;
        let report = Gatekeeper::new(&self.repository)
            .run(
                self.services.source.as_ref(),
                &self.config.sources,
                Some(campaign.id),
                Utc::now(),
            )
            .await;

        for failed in report.failed_sources() {
            self.services
                .notifier
                .notify(
                    &format!("Source '{}' could not be fetched", failed.source_id),
                    Severity::Warning,
                    json!({ "campaign_date": date.to_string(), "error": failed.failure }),
                )
                .await;
        }
        self.repository
            .merge_metrics(campaign.id, json!({ "items_ingested": report.inserted() }))
            .await?;
        Ok(report)
    }

    pub async fn score(&self, date: NaiveDate) -> Result<ScoringReport> {
        let campaign = self.repository.campaign_by_date(date).await?;
        let report = ScoringEngine::new(self.services.evaluator.as_ref(), &self.config.criteria)
            .score_pending(&self.repository, campaign.id)
            .await?;
        self.repository
            .merge_metrics(
                campaign.id,
                json!({
                    "items_scored": report.scored,
                    "scoring_failures": report.failed,
                }),
            )
            .await?;
        Ok(report)
    }

    /// Ranks scored items, drops duplicates, and fills the lineup.
    pub async fn assemble(&self, date: NaiveDate) -> Result<AssemblyReport> {
        let campaign = self.repository.campaign_by_date(date).await?;
        if campaign.status.is_terminal() {
            return Err(AppError::TerminalState {
                campaign_id: campaign.id,
                status: campaign.status,
            });
        }

        let mut pool = rank_candidates(self.repository.scored_items_for_campaign(campaign.id).await?);
        pool.truncate(self.config.assembly.candidate_limit);
        let items: Vec<ContentItem> = pool.iter().map(|s| s.item.clone()).collect();
        let outcome = group_candidates(self.services.deduplicator.as_ref(), &items).await;

        let eligible = outcome.eligible();
        let candidates: Vec<ScoredItem> = pool
            .into_iter()
            .enumerate()
            .filter(|(i, _)| eligible.binary_search(i).is_ok())
            .map(|(_, s)| s)
            .collect();
        let eligible_count = candidates.len();

        let assembler = Assembler::new(
            &self.repository,
            self.services.generator.as_ref(),
            self.services.fact_checker.as_ref(),
            self.config.assembly.article_count,
            self.config.assembly.fact_check_threshold,
        );
        let report = assembler.assemble(campaign.id, candidates).await?;

        if let Err(e) = assembler.ensure_subject_line(campaign.id).await {
            tracing::warn!(campaign = campaign.id, error = %e, "Subject line generation failed");
        }

        self.repository
            .merge_metrics(
                campaign.id,
                json!({
                    "candidates": items.len(),
                    "eligible": eligible_count,
                    "duplicates_excluded": outcome.excluded().len(),
                    "generated": report.generated,
                    "fact_check_failures": report.failed_fact_check,
                    "generation_errors": report.generation_errors,
                    "active_articles": report.active,
                    "model_version": self.services.model_version,
                }),
            )
            .await?;
        Ok(report)
    }

    /// Ingest, score and assemble in one go.
    pub async fn build_content(&self, date: NaiveDate) -> Result<ContentBuild> {
        let ingest = self.ingest(date).await?;
        let scoring = self.score(date).await?;
        let assembly = self.assemble(date).await?;
        Ok(ContentBuild {
            ingest,
            scoring,
            assembly,
        })
    }

    pub async fn populate_events(&self, date: NaiveDate) -> Result<usize> {
        let campaign = self.repository.campaign_by_date(date).await?;
        populate_events(
            &self.repository,
            campaign.id,
            self.config.schedule.tz()?,
            &self.config.events,
        )
        .await
    }

    fn executor(&self) -> DispatchExecutor<'_> {
        let audience = self
            .config
            .email
            .as_ref()
            .map(|e| e.final_audience_id.as_str())
            .unwrap_or_default();
        DispatchExecutor::new(
            &self.repository,
            self.services.email.as_ref(),
            self.services.notifier.as_ref(),
            audience,
            self.config.archive_before_send,
        )
    }

    pub async fn send_review(&self, date: NaiveDate) -> Result<DispatchOutcome> {
        let campaign = self.repository.campaign_by_date(date).await?;
        self.executor().send_review(campaign.id, None).await
    }

    pub async fn send_final(&self, date: NaiveDate) -> Result<DispatchOutcome> {
        let campaign = self.repository.campaign_by_date(date).await?;
        self.executor().send_final(campaign.id, None).await
    }

    /// One scheduler trigger: every stage whose window is open runs at most
    /// once for its cycle.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<Vec<(Stage, TickOutcome)>> {
        let controller = DispatchController::new(
            &self.repository,
            &self.config.schedule,
            self.services.notifier.as_ref(),
        );

        let mut outcomes = Vec::new();
        for stage in Stage::ALL {
            let outcome = match controller.decide(stage, now).await? {
                Decision::Skip(reason) => {
                    tracing::debug!(stage = %stage, reason = %reason, "Stage skipped");
                    TickOutcome::Skipped(reason)
                }
                Decision::Run(run) => match self.run_stage(run).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(stage = %stage, error = %e, "Stage failed");
                        if !matches!(e, AppError::Dispatch { .. }) {
                            self.services
                                .notifier
                                .notify(
                                    &format!("Stage {} failed", stage),
                                    Severity::Error,
                                    json!({
                                        "campaign_date": run.campaign_date.to_string(),
                                        "error": e.to_string(),
                                    }),
                                )
                                .await;
                        }
                        TickOutcome::Failed(e.to_string())
                    }
                },
            };
            outcomes.push((stage, outcome));
        }
        Ok(outcomes)
    }

    async fn run_stage(&self, run: StageRun) -> Result<TickOutcome> {
        match run.stage {
            Stage::Ingestion | Stage::EventPopulation => {
                if !self
                    .repository
                    .claim_stage_run(run.stage.as_str(), run.cycle_date)
                    .await?
                {
                    return Ok(TickOutcome::Skipped(SkipReason::AlreadyRan));
                }
                if run.stage == Stage::Ingestion {
                    let build = self.build_content(run.campaign_date).await?;
                    Ok(TickOutcome::Ran(format!(
                        "{} new items, {} scored, {} active articles",
                        build.ingest.inserted(),
                        build.scoring.scored,
                        build.assembly.active
                    )))
                } else {
                    let added = self.populate_events(run.campaign_date).await?;
                    Ok(TickOutcome::Ran(format!("{} events attached", added)))
                }
            }
            Stage::ReviewSend | Stage::FinalSend => {
                let campaign = self.repository.campaign_by_date(run.campaign_date).await?;
                let executor = self.executor();
                let outcome = if run.stage == Stage::ReviewSend {
                    executor.send_review(campaign.id, Some(run.claim())).await?
                } else {
                    executor.send_final(campaign.id, Some(run.claim())).await?
                };
                Ok(match outcome {
                    DispatchOutcome::Sent(receipt) => {
                        TickOutcome::Ran(format!("dispatched as {}", receipt.dispatch_id))
                    }
                    DispatchOutcome::AlreadyRan => TickOutcome::Skipped(SkipReason::AlreadyRan),
                })
            }
        }
    }

    pub async fn transition(&self, date: NaiveDate, to: CampaignStatus) -> Result<Campaign> {
        let campaign = self.repository.campaign_by_date(date).await?;
        CampaignWorkflow::new(&self.repository)
            .transition(campaign.id, to)
            .await
    }

    pub async fn archive(&self, date: NaiveDate, reason: ArchiveReason) -> Result<ArchiveSummary> {
        let campaign = self.repository.campaign_by_date(date).await?;
        Archiver::new(&self.repository).archive(campaign.id, reason).await
    }

    pub async fn refresh(&self, date: NaiveDate) -> Result<(ArchiveSummary, usize)> {
        let campaign = self.repository.campaign_by_date(date).await?;
        Archiver::new(&self.repository).refresh(campaign.id).await
    }

    pub async fn skip_article(&self, id: i64, skipped: bool) -> Result<Article> {
        self.repository.set_article_skipped(id, skipped).await?;
        self.repository.get_article(id).await
    }

    pub async fn rank_article(&self, id: i64, rank: i64) -> Result<Article> {
        self.repository.set_article_rank(id, rank).await?;
        self.repository.get_article(id).await
    }

    /// Adds an editor-written article, ranked after the existing manual ones
    /// unless a rank is given.
    pub async fn add_manual_article(
        &self,
        date: NaiveDate,
        headline: String,
        content: String,
        rank: Option<i64>,
    ) -> Result<Article> {
        let campaign = self.repository.campaign_by_date(date).await?;
        if campaign.status.is_terminal() {
            return Err(AppError::TerminalState {
                campaign_id: campaign.id,
                status: campaign.status,
            });
        }
        let rank = match rank {
            Some(rank) => rank,
            None => {
                self.repository
                    .articles_for_campaign(campaign.id)
                    .await?
                    .iter()
                    .filter(|a| a.is_manual)
                    .filter_map(|a| a.rank)
                    .max()
                    .unwrap_or(0)
                    + 1
            }
        };
        self.repository
            .insert_manual_article(NewArticle::manual(campaign.id, headline, content), rank)
            .await
    }

    pub async fn add_event(&self, event: NewEvent) -> Result<i64> {
        self.repository.insert_event(event).await
    }

    pub async fn status(&self, date: NaiveDate) -> Result<StatusReport> {
        let campaign = self.repository.campaign_by_date(date).await?;
        let articles = self.repository.articles_for_campaign(campaign.id).await?;
        let events = self.repository.events_for_campaign(campaign.id).await?;
        let mut archives = Vec::new();
        for reason in ArchiveReason::ALL {
            let counts = self.repository.archived_counts(campaign.id, reason).await?;
            if counts.articles + counts.content_items + counts.ratings > 0 {
                archives.push((reason, counts));
            }
        }
        Ok(StatusReport {
            campaign,
            articles,
            events,
            archives,
        })
    }

    pub async fn archived_articles(
        &self,
        date: NaiveDate,
        reason: ArchiveReason,
    ) -> Result<Vec<ArchivedArticle>> {
        let campaign = self.repository.campaign_by_date(date).await?;
        self.repository.archived_articles(campaign.id, reason).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::Ordering;

    use chrono::TimeZone;
    use chrono_tz::America::Chicago;

    use super::*;
    use crate::config::SourceConfig;
    use crate::models::NewContentItem;
    use crate::pipeline::testing::{
        criterion, ScriptedDeduplicator, ScriptedEvaluator, ScriptedFactChecker, ScriptedGenerator,
    };
    use crate::services::testing::{FakeEmail, RecordingNotifier};

    struct StaticSource {
        items: HashMap<String, Vec<NewContentItem>>,
    }

    #[async_trait]
    impl ContentSource for StaticSource {
        async fn fetch_batch(&self, source: &SourceConfig) -> Result<Vec<NewContentItem>> {
            self.items
                .get(&source.id)
                .cloned()
                .ok_or_else(|| AppError::Other(anyhow::anyhow!("timeout")))
        }
    }

    fn new_item(title: &str) -> NewContentItem {
        NewContentItem {
            source_id: "city".to_string(),
            external_id: Some(title.to_lowercase()),
            title: title.to_string(),
            link: format!("https://city.example/{}", title.to_lowercase().replace(' ', "-")),
            description: Some(format!("{} happened downtown.", title)),
            body: None,
            author: None,
            image_url: None,
            published_at: None,
        }
    }

    struct Harness {
        app: App,
        email: Arc<FakeEmail>,
        notifier: Arc<RecordingNotifier>,
    }

    async fn harness() -> Harness {
        let mut config = Config {
            db_path: ":memory:".to_string(),
            criteria: vec![criterion("relevance", 1.0)],
            ..Config::default()
        };
        config.assembly.article_count = 2;
        config.sources = vec![
            SourceConfig {
                id: "city".to_string(),
                url: "https://city.example/rss".to_string(),
                enabled: true,
            },
            SourceConfig {
                id: "down".to_string(),
                url: "https://down.example/rss".to_string(),
                enabled: true,
            },
        ];

        let email = Arc::new(FakeEmail::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let services = Services {
            source: Arc::new(StaticSource {
                items: HashMap::from([(
                    "city".to_string(),
                    vec![new_item("Transit plan"), new_item("Zoo expansion"), new_item("Road work")],
                )]),
            }),
            evaluator: Arc::new(ScriptedEvaluator::by_title(&[
                ("Transit plan", r#"{"score": 9, "reason": "big"}"#),
                ("Zoo expansion", r#"{"score": 7, "reason": "fun"}"#),
                ("Road work", r#"{"score": 4, "reason": "minor"}"#),
            ])),
            generator: Arc::new(ScriptedGenerator::default()),
            fact_checker: Arc::new(ScriptedFactChecker::default()),
            deduplicator: Arc::new(ScriptedDeduplicator { reply: None }),
            email: email.clone(),
            notifier: notifier.clone(),
            model_version: "test-model".to_string(),
        };
        let repository = Repository::in_memory().await.unwrap();
        Harness {
            app: App::with_services(config, repository, services),
            email,
            notifier,
        }
    }

    fn chicago(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Chicago
            .with_ymd_and_hms(2026, 6, d, h, m, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[tokio::test]
    async fn test_daily_cycle_through_ticks() {
        let h = harness().await;
        let campaign_date = NaiveDate::from_ymd_opt(2026, 6, 2).unwrap();

        // 20:00 on the 1st builds the content for the 2nd.
        let outcomes = h.app.tick(chicago(1, 20, 2)).await.unwrap();
        assert!(matches!(outcomes[0], (Stage::Ingestion, TickOutcome::Ran(_))));
        assert_eq!(h.notifier.count(Severity::Warning), 1); // the "down" source

        let status = h.app.status(campaign_date).await.unwrap();
        let active: Vec<&Article> = status.articles.iter().filter(|a| a.is_active).collect();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].headline, "Transit plan (rewritten)");
        assert!(status.campaign.has_subject_line());
        assert_eq!(status.campaign.metrics["model_version"], "test-model");

        // A second trigger in the same window does nothing.
        let again = h.app.tick(chicago(1, 20, 10)).await.unwrap();
        assert!(matches!(
            again[0],
            (Stage::Ingestion, TickOutcome::Skipped(SkipReason::AlreadyRan))
        ));

        h.app.tick(chicago(1, 21, 0)).await.unwrap();
        assert_eq!(h.email.review_sends.load(Ordering::SeqCst), 1);
        h.app.tick(chicago(1, 21, 5)).await.unwrap();
        assert_eq!(h.email.review_sends.load(Ordering::SeqCst), 1);

        h.app
            .transition(campaign_date, CampaignStatus::Approved)
            .await
            .unwrap();

        let outcomes = h.app.tick(chicago(2, 4, 55)).await.unwrap();
        assert!(matches!(outcomes[3], (Stage::FinalSend, TickOutcome::Ran(_))));
        let campaign = h.app.status(campaign_date).await.unwrap().campaign;
        assert_eq!(campaign.status, CampaignStatus::Sent);
        assert_eq!(campaign.status_before_send, Some(CampaignStatus::Approved));
        assert_eq!(h.email.final_sends.load(Ordering::SeqCst), 1);

        let status = h.app.status(campaign_date).await.unwrap();
        assert_eq!(status.archives.len(), 1);
        assert_eq!(status.archives[0].0, ArchiveReason::PreSend);
        assert_eq!(status.archives[0].1.articles, 2);
        let archived = h
            .app
            .archived_articles(campaign_date, ArchiveReason::PreSend)
            .await
            .unwrap();
        assert_eq!(archived[0].final_position, Some(1));
    }

    #[tokio::test]
    async fn test_manual_articles_get_their_own_ranks() {
        let h = harness().await;
        let date = NaiveDate::from_ymd_opt(2026, 6, 3).unwrap();
        h.app.repository.ensure_campaign(date).await.unwrap();

        let first = h
            .app
            .add_manual_article(date, "Letter".to_string(), "Dear readers".to_string(), None)
            .await
            .unwrap();
        let second = h
            .app
            .add_manual_article(date, "Notice".to_string(), "Office closed".to_string(), None)
            .await
            .unwrap();

        assert_eq!(first.rank, Some(1));
        assert_eq!(second.rank, Some(2));
        assert!(second.is_active && second.is_manual);
    }

    #[tokio::test]
    async fn test_editorial_edits_return_updated_article() {
        let h = harness().await;
        let date = NaiveDate::from_ymd_opt(2026, 6, 4).unwrap();
        h.app.repository.ensure_campaign(date).await.unwrap();
        let article = h
            .app
            .add_manual_article(date, "Letter".to_string(), "Dear readers".to_string(), Some(4))
            .await
            .unwrap();

        let skipped = h.app.skip_article(article.id, true).await.unwrap();
        let ranked = h.app.rank_article(article.id, 2).await.unwrap();

        assert!(skipped.skipped);
        assert_eq!(ranked.rank, Some(2));
        assert!(matches!(
            h.app.skip_article(9999, true).await,
            Err(AppError::ArticleNotFound(9999))
        ));
    }

    #[tokio::test]
    async fn test_campaign_date_for_uses_stage_offset() {
        let h = harness().await;
        assert_eq!(
            h.app.campaign_date_for(Stage::ReviewSend, chicago(1, 21, 0)).unwrap(),
            NaiveDate::from_ymd_opt(2026, 6, 2).unwrap()
        );
        assert_eq!(
            h.app.campaign_date_for(Stage::FinalSend, chicago(2, 4, 55)).unwrap(),
            NaiveDate::from_ymd_opt(2026, 6, 2).unwrap()
        );
    }
}
