use std::path::{Path, PathBuf};

use chrono::NaiveTime;
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::models::Criterion;
use crate::pipeline::assembler::FACT_CHECK_DIMENSION_MAX;
use crate::pipeline::Stage;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_db_path")]
    pub db_path: String,

    pub claude_api_key: Option<String>,
    pub slack_webhook_url: Option<String>,

    #[serde(default = "default_true")]
    pub archive_before_send: bool,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,

    #[serde(default = "default_criteria")]
    pub criteria: Vec<Criterion>,

    #[serde(default)]
    pub assembly: AssemblyConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    #[serde(default)]
    pub events: EventsConfig,

    pub email: Option<EmailConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub id: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssemblyConfig {
    #[serde(default = "default_article_count")]
    pub article_count: usize,
    /// Minimum combined fact-check score out of 30.
    #[serde(default = "default_fact_check_threshold")]
    pub fact_check_threshold: f64,
    /// Upper bound on the candidate pool handed to deduplication.
    #[serde(default = "default_candidate_limit")]
    pub candidate_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_tolerance_minutes")]
    pub tolerance_minutes: i64,
    #[serde(default = "default_ingestion")]
    pub ingestion: StageSchedule,
    #[serde(default = "default_event_population")]
    pub event_population: StageSchedule,
    #[serde(default = "default_review_send")]
    pub review_send: StageSchedule,
    #[serde(default = "default_final_send")]
    pub final_send: StageSchedule,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageSchedule {
    /// Local time of day, `HH:MM`.
    pub target: String,
    /// Which campaign the stage works on, relative to the local date of the trigger.
    #[serde(default)]
    pub campaign_day_offset: i64,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventsConfig {
    #[serde(default = "default_max_events")]
    pub max_per_campaign: usize,
    #[serde(default = "default_lookahead_days")]
    pub lookahead_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmailConfig {
    pub api_url: String,
    pub api_key: String,
    pub review_audience_id: String,
    pub final_audience_id: String,
    #[serde(default = "default_from_name")]
    pub from_name: String,
}

fn default_db_path() -> String {
    let data_dir = dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("newsletter-pipeline");
    std::fs::create_dir_all(&data_dir).ok();
    data_dir.join("pipeline.db").to_string_lossy().to_string()
}

fn default_true() -> bool {
    true
}

fn default_article_count() -> usize {
    5
}

fn default_fact_check_threshold() -> f64 {
    20.0
}

fn default_candidate_limit() -> usize {
    60
}

fn default_timezone() -> String {
    "America/Chicago".to_string()
}

fn default_tolerance_minutes() -> i64 {
    15
}

fn stage(target: &str, campaign_day_offset: i64) -> StageSchedule {
    StageSchedule {
        target: target.to_string(),
        campaign_day_offset,
        enabled: true,
    }
}

fn default_ingestion() -> StageSchedule {
    stage("20:00", 1)
}

fn default_event_population() -> StageSchedule {
    stage("20:30", 1)
}

fn default_review_send() -> StageSchedule {
    stage("21:00", 1)
}

fn default_final_send() -> StageSchedule {
    stage("04:55", 0)
}

fn default_max_events() -> usize {
    8
}

fn default_lookahead_days() -> i64 {
    7
}

fn default_from_name() -> String {
    "The Daily Brief".to_string()
}

fn default_criteria() -> Vec<Criterion> {
    vec![
        Criterion {
            id: "relevance".to_string(),
            name: "Local relevance".to_string(),
            weight: 1.5,
            enabled: true,
            prompt: "How directly does this story affect readers in our coverage area?"
                .to_string(),
            max_score: 10.0,
        },
        Criterion {
            id: "newsworthiness".to_string(),
            name: "Newsworthiness".to_string(),
            weight: 1.0,
            enabled: true,
            prompt: "How timely, significant and novel is this story?".to_string(),
            max_score: 10.0,
        },
        Criterion {
            id: "interest".to_string(),
            name: "Reader interest".to_string(),
            weight: 0.5,
            enabled: true,
            prompt: "How likely is a general reader to click and read this story?".to_string(),
            max_score: 10.0,
        },
    ]
}

impl Default for AssemblyConfig {
    fn default() -> Self {
        Self {
            article_count: default_article_count(),
            fact_check_threshold: default_fact_check_threshold(),
            candidate_limit: default_candidate_limit(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            timezone: default_timezone(),
            tolerance_minutes: default_tolerance_minutes(),
            ingestion: default_ingestion(),
            event_population: default_event_population(),
            review_send: default_review_send(),
            final_send: default_final_send(),
        }
    }
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            max_per_campaign: default_max_events(),
            lookahead_days: default_lookahead_days(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            claude_api_key: None,
            slack_webhook_url: None,
            archive_before_send: true,
            sources: Vec::new(),
            criteria: default_criteria(),
            assembly: AssemblyConfig::default(),
            schedule: ScheduleConfig::default(),
            events: EventsConfig::default(),
            email: None,
        }
    }
}

impl ScheduleConfig {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| AppError::Config(format!("invalid timezone '{}': {}", self.timezone, e)))
    }

    pub fn stage(&self, stage: Stage) -> &StageSchedule {
        match stage {
            Stage::Ingestion => &self.ingestion,
            Stage::EventPopulation => &self.event_population,
            Stage::ReviewSend => &self.review_send,
            Stage::FinalSend => &self.final_send,
        }
    }
}

impl StageSchedule {
    pub fn target_time(&self) -> Result<NaiveTime> {
        NaiveTime::parse_from_str(&self.target, "%H:%M")
            .map_err(|e| AppError::Config(format!("invalid target time '{}': {}", self.target, e)))
    }
}

impl Config {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = path.map(Path::to_path_buf).unwrap_or_else(Self::config_path);

        let config = if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            let config = Config::default();
            config.save_to(&config_path)?;
            config
        };

        config.validate()?;
        Ok(config)
    }

    pub fn save_to(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(config_path, content)?;
        Ok(())
    }

    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("newsletter-pipeline")
            .join("config.toml")
    }

    pub fn validate(&self) -> Result<()> {
        self.schedule.tz()?;
        for stage in Stage::ALL {
            self.schedule.stage(stage).target_time()?;
        }
        if self.schedule.tolerance_minutes < 0 {
            return Err(AppError::Config(
                "tolerance_minutes must not be negative".to_string(),
            ));
        }
        if self.assembly.article_count == 0 {
            return Err(AppError::Config("article_count must be at least 1".to_string()));
        }
        let threshold_max = 3.0 * FACT_CHECK_DIMENSION_MAX;
        let threshold = self.assembly.fact_check_threshold;
        if !threshold.is_finite() || !(0.0..=threshold_max).contains(&threshold) {
            return Err(AppError::Config(format!(
                "fact_check_threshold {} must be within [0, {}]",
                threshold, threshold_max
            )));
        }
        if !self.criteria.iter().any(|c| c.enabled) {
            return Err(AppError::Config("at least one criterion must be enabled".to_string()));
        }
        for criterion in &self.criteria {
            if criterion.weight < 0.0 || !criterion.weight.is_finite() {
                return Err(AppError::Config(format!(
                    "criterion '{}' has invalid weight {}",
                    criterion.id, criterion.weight
                )));
            }
            if criterion.max_score <= 0.0 {
                return Err(AppError::Config(format!(
                    "criterion '{}' needs a positive max_score",
                    criterion.id
                )));
            }
        }
        Ok(())
    }
}
