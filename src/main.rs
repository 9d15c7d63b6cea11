use std::path::PathBuf;

use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};

mod ai;
mod app;
mod config;
mod db;
mod error;
mod feed;
mod models;
mod pipeline;
mod services;

use app::{App, StatusReport, TickOutcome};
use config::Config;
use error::Result;
use models::{ArchiveReason, CampaignStatus, NewEvent};
use pipeline::{DispatchOutcome, Stage};

#[derive(Parser)]
#[command(name = "newsletter", version, about = "Daily newsletter content pipeline")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch all enabled sources into the campaign's pool
    Ingest {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Rate unscored items
    Score {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Deduplicate, generate and fact-check the lineup
    Assemble {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Attach upcoming events to the campaign
    PopulateEvents {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    SendReview {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    SendFinal {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Run whatever stages are due right now
    Tick,
    Transition {
        date: NaiveDate,
        status: CampaignStatus,
    },
    Archive {
        date: NaiveDate,
        reason: ArchiveReason,
    },
    /// Archive, then clear generated articles for reassembly
    Refresh { date: NaiveDate },
    SkipArticle {
        id: i64,
        /// Put a skipped article back into the lineup
        #[arg(long)]
        undo: bool,
    },
    RankArticle { id: i64, rank: i64 },
    /// Add an editor-written article
    AddArticle {
        date: NaiveDate,
        #[arg(long)]
        headline: String,
        #[arg(long)]
        content: String,
        #[arg(long)]
        rank: Option<i64>,
    },
    AddEvent {
        #[arg(long)]
        title: String,
        /// RFC 3339 start time, e.g. 2026-06-05T18:00:00-05:00
        #[arg(long)]
        starts_at: DateTime<Utc>,
        #[arg(long)]
        venue: Option<String>,
        #[arg(long)]
        url: Option<String>,
        #[arg(long)]
        featured: bool,
    },
    Status { date: NaiveDate },
    /// List archived articles of one snapshot reason
    Archived {
        date: NaiveDate,
        reason: ArchiveReason,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging (only warnings and errors unless RUST_LOG says otherwise)
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref())?;
    let app = App::new(config).await?;

    let now = Utc::now();
    let date_for = |date: Option<NaiveDate>, stage: Stage| -> Result<NaiveDate> {
        match date {
            Some(date) => Ok(date),
            None => app.campaign_date_for(stage, now),
        }
    };

    match cli.command {
        Command::Ingest { date } => {
            let report = app.ingest(date_for(date, Stage::Ingestion)?).await?;
            for source in &report.sources {
                match &source.failure {
                    Some(error) => println!("{}: failed ({})", source.source_id, error),
                    None => println!(
                        "{}: {} fetched, {} new, {} known, {} discarded",
                        source.source_id,
                        source.fetched,
                        source.inserted,
                        source.already_known,
                        source.discarded
                    ),
                }
            }
        }
        Command::Score { date } => {
            let report = app.score(date_for(date, Stage::Ingestion)?).await?;
            println!("Scored {} items ({} failed)", report.scored, report.failed);
        }
        Command::Assemble { date } => {
            let report = app.assemble(date_for(date, Stage::Ingestion)?).await?;
            println!(
                "{} active articles ({} generated, {} failed fact-check)",
                report.active, report.generated, report.failed_fact_check
            );
        }
        Command::PopulateEvents { date } => {
            let added = app.populate_events(date_for(date, Stage::EventPopulation)?).await?;
            println!("Attached {} events", added);
        }
        Command::SendReview { date } => {
            print_dispatch(app.send_review(date_for(date, Stage::ReviewSend)?).await?);
        }
        Command::SendFinal { date } => {
            print_dispatch(app.send_final(date_for(date, Stage::FinalSend)?).await?);
        }
        Command::Tick => {
            for (stage, outcome) in app.tick(now).await? {
                match outcome {
                    TickOutcome::Ran(summary) => println!("{}: ran, {}", stage, summary),
                    TickOutcome::Skipped(reason) => println!("{}: skipped, {}", stage, reason),
                    TickOutcome::Failed(error) => println!("{}: failed, {}", stage, error),
                }
            }
        }
        Command::Transition { date, status } => {
            let campaign = app.transition(date, status).await?;
            println!("Campaign {} is now {}", campaign.date, campaign.status);
        }
        Command::Archive { date, reason } => {
            let summary = app.archive(date, reason).await?;
            println!(
                "Archived {} articles, {} items, {} ratings",
                summary.articles, summary.content_items, summary.ratings
            );
        }
        Command::Refresh { date } => {
            let (summary, deleted) = app.refresh(date).await?;
            println!(
                "Archived {} articles and cleared {} generated articles",
                summary.articles, deleted
            );
        }
        Command::SkipArticle { id, undo } => {
            let article = app.skip_article(id, !undo).await?;
            println!(
                "Article {} '{}' {}",
                article.id,
                article.headline,
                if article.skipped { "skipped" } else { "restored" }
            );
        }
        Command::RankArticle { id, rank } => {
            let article = app.rank_article(id, rank).await?;
            println!("Article {} '{}' ranked {}", article.id, article.headline, rank);
        }
        Command::AddArticle {
            date,
            headline,
            content,
            rank,
        } => {
            let article = app.add_manual_article(date, headline, content, rank).await?;
            println!("Added article {} at rank {}", article.id, article.rank.unwrap_or_default());
        }
        Command::AddEvent {
            title,
            starts_at,
            venue,
            url,
            featured,
        } => {
            let id = app
                .add_event(NewEvent {
                    title,
                    starts_at,
                    venue,
                    url,
                    featured,
                })
                .await?;
            println!("Added event {}", id);
        }
        Command::Status { date } => print_status(&app.status(date).await?),
        Command::Archived { date, reason } => {
            for article in app.archived_articles(date, reason).await? {
                println!(
                    "{}  [{}] final={} {}",
                    article.archived_at.format("%Y-%m-%d %H:%M"),
                    article.campaign_status,
                    article
                        .final_position
                        .map(|p| p.to_string())
                        .unwrap_or_else(|| "-".to_string()),
                    article.headline
                );
            }
        }
    }

    Ok(())
}

fn print_dispatch(outcome: DispatchOutcome) {
    match outcome {
        DispatchOutcome::Sent(receipt) => println!("Sent ({})", receipt.dispatch_id),
        DispatchOutcome::AlreadyRan => println!("Already sent for this cycle"),
    }
}

fn print_status(report: &StatusReport) {
    let campaign = &report.campaign;
    println!("Campaign {} [{}]", campaign.date, campaign.status);
    println!(
        "Subject: {}",
        campaign.subject_line.as_deref().unwrap_or("(none)")
    );
    if let Some(before) = campaign.status_before_send {
        println!("Status before send: {}", before);
    }
    println!();
    println!("{:<6} {:<5} {:<6} {:<6} {:<6} {}", "id", "rank", "review", "final", "flags", "headline");
    for article in &report.articles {
        let mut flags = String::new();
        flags.push(if article.is_active { 'A' } else { '-' });
        flags.push(if article.skipped { 'S' } else { '-' });
        flags.push(if article.is_manual { 'M' } else { '-' });
        let cell = |v: Option<i64>| v.map(|n| n.to_string()).unwrap_or_else(|| "-".to_string());
        println!(
            "{:<6} {:<5} {:<6} {:<6} {:<6} {}",
            article.id,
            cell(article.rank),
            cell(article.review_position),
            cell(article.final_position),
            flags,
            article.headline
        );
    }
    if !report.events.is_empty() {
        println!();
        for event in &report.events {
            println!("{}  {}", event.starts_at.format("%a %b %e %H:%M"), event.title);
        }
    }
    for (reason, counts) in &report.archives {
        println!(
            "Archived ({}): {} articles, {} items, {} ratings",
            reason, counts.articles, counts.content_items, counts.ratings
        );
    }
    if campaign.metrics.as_object().is_some_and(|m| !m.is_empty()) {
        println!();
        println!("Metrics: {}", campaign.metrics);
    }
}
