use thiserror::Error;

use crate::models::CampaignStatus;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Database connection error: {0}")]
    Connection(#[from] tokio_rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Feed parse error: {0}")]
    FeedParse(#[from] feed_rs::parser::ParseFeedError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("Config error: {0}")]
    Config(String),

    #[error("Claude API error: {0}")]
    ClaudeApi(String),

    #[error("Malformed AI output: {0}")]
    MalformedAiOutput(String),

    #[error("Score {score} for criterion '{criterion}' outside [0, {max}]")]
    ScoreOutOfRange {
        criterion: String,
        score: f64,
        max: f64,
    },

    #[error("Campaign not found: {0}")]
    CampaignNotFound(String),

    #[error("Article not found: {0}")]
    ArticleNotFound(i64),

    #[error("Transition {from} -> {to} is not allowed")]
    InvalidTransition {
        from: CampaignStatus,
        to: CampaignStatus,
    },

    #[error("Campaign {campaign_id} is {status} and cannot change")]
    TerminalState {
        campaign_id: i64,
        status: CampaignStatus,
    },

    #[error("Stale status for campaign {campaign_id}: expected {expected}, found {actual}")]
    StaleStatus {
        campaign_id: i64,
        expected: CampaignStatus,
        actual: CampaignStatus,
    },

    #[error("Cannot move campaign {campaign_id} to {to}: {reason}")]
    GuardFailed {
        campaign_id: i64,
        to: CampaignStatus,
        reason: String,
    },

    #[error("Dispatch failed for campaign {campaign_id} (was {previous}): {message}")]
    Dispatch {
        campaign_id: i64,
        previous: CampaignStatus,
        message: String,
    },

    #[error("Email API error: {0}")]
    EmailApi(String),

    #[error("Archive of campaign {campaign_id} failed: {message}")]
    Archive { campaign_id: i64, message: String },

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;
