use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Draft,
    InReview,
    ChangesMade,
    Approved,
    ReadyToSend,
    Sent,
    Failed,
}

impl CampaignStatus {
    pub const ALL: [CampaignStatus; 7] = [
        CampaignStatus::Draft,
        CampaignStatus::InReview,
        CampaignStatus::ChangesMade,
        CampaignStatus::Approved,
        CampaignStatus::ReadyToSend,
        CampaignStatus::Sent,
        CampaignStatus::Failed,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::InReview => "in_review",
            CampaignStatus::ChangesMade => "changes_made",
            CampaignStatus::Approved => "approved",
            CampaignStatus::ReadyToSend => "ready_to_send",
            CampaignStatus::Sent => "sent",
            CampaignStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CampaignStatus::Sent | CampaignStatus::Failed)
    }

    /// States from which a final send may start.
    pub fn is_pre_send(self) -> bool {
        matches!(
            self,
            CampaignStatus::InReview
                | CampaignStatus::ChangesMade
                | CampaignStatus::Approved
                | CampaignStatus::ReadyToSend
        )
    }

    pub fn allowed_targets(self) -> &'static [CampaignStatus] {
        use CampaignStatus::*;
        match self {
            Draft => &[InReview, Failed],
            InReview => &[ChangesMade, Approved, Sent, Failed],
            ChangesMade => &[InReview, Approved, Sent, Failed],
            Approved => &[ReadyToSend, ChangesMade, Sent, Failed],
            ReadyToSend => &[Sent, InReview, ChangesMade, Failed],
            Sent | Failed => &[],
        }
    }

    pub fn can_transition_to(self, target: CampaignStatus) -> bool {
        self.allowed_targets().contains(&target)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        CampaignStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| format!("unknown campaign status '{}'", s))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Campaign {
    pub id: i64,
    pub date: NaiveDate,
    pub status: CampaignStatus,
    pub subject_line: Option<String>,
    pub review_sent_at: Option<DateTime<Utc>>,
    pub final_sent_at: Option<DateTime<Utc>>,
    pub status_before_send: Option<CampaignStatus>,
    pub metrics: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub fn has_subject_line(&self) -> bool {
        self.subject_line
            .as_deref()
            .is_some_and(|s| !s.trim().is_empty())
    }
}
