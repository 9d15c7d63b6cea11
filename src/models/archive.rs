use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::CampaignStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveReason {
    PreSend,
    PreRefresh,
    Manual,
}

impl ArchiveReason {
    pub const ALL: [ArchiveReason; 3] = [
        ArchiveReason::PreSend,
        ArchiveReason::PreRefresh,
        ArchiveReason::Manual,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ArchiveReason::PreSend => "pre_send",
            ArchiveReason::PreRefresh => "pre_refresh",
            ArchiveReason::Manual => "manual",
        }
    }
}

impl fmt::Display for ArchiveReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ArchiveReason {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pre_send" => Ok(ArchiveReason::PreSend),
            "pre_refresh" => Ok(ArchiveReason::PreRefresh),
            "manual" => Ok(ArchiveReason::Manual),
            other => Err(format!("unknown archive reason '{}'", other)),
        }
    }
}

/// Row counts copied by one archival run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ArchiveSummary {
    pub articles: usize,
    pub content_items: usize,
    pub ratings: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ArchivedArticle {
    pub id: i64,
    pub original_id: i64,
    pub campaign_id: i64,
    pub campaign_date: NaiveDate,
    pub campaign_status: CampaignStatus,
    pub archive_reason: ArchiveReason,
    pub headline: String,
    pub rank: Option<i64>,
    pub is_active: bool,
    pub review_position: Option<i64>,
    pub final_position: Option<i64>,
    pub archived_at: DateTime<Utc>,
}
