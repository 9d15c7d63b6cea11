use std::fmt;

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, Utc};
use serde_json::json;

use crate::config::ScheduleConfig;
use crate::db::{Repository, StageClaim};
use crate::error::Result;
use crate::models::CampaignStatus;
use crate::services::{Notifier, Severity};

const SECONDS_PER_DAY: i64 = 24 * 60 * 60;

/// Marker recording that the overdue warning went out for a cycle.
pub const OVERDUE_WARNING_MARKER: &str = "final_send_overdue_warning";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Ingestion,
    EventPopulation,
    ReviewSend,
    FinalSend,
}

impl Stage {
    pub const ALL: [Stage; 4] = [
        Stage::Ingestion,
        Stage::EventPopulation,
        Stage::ReviewSend,
        Stage::FinalSend,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Ingestion => "ingestion",
            Stage::EventPopulation => "event_population",
            Stage::ReviewSend => "review_send",
            Stage::FinalSend => "final_send",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SkipReason {
    Disabled,
    OutsideWindow { minutes_from_target: i64 },
    AlreadyRan,
    NoCampaign,
    WrongStatus(CampaignStatus),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Disabled => write!(f, "stage disabled"),
            SkipReason::OutsideWindow {
                minutes_from_target,
            } => write!(f, "outside window ({:+} min from target)", minutes_from_target),
            SkipReason::AlreadyRan => write!(f, "already ran this cycle"),
            SkipReason::NoCampaign => write!(f, "no campaign for this cycle"),
            SkipReason::WrongStatus(status) => write!(f, "campaign is {}", status),
        }
    }
}

/// A stage cleared to run for one cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageRun {
    pub stage: Stage,
    pub cycle_date: NaiveDate,
    pub campaign_date: NaiveDate,
}

impl StageRun {
    pub fn claim(&self) -> StageClaim {
        StageClaim {
            stage: self.stage.as_str(),
            cycle_date: self.cycle_date,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    Run(StageRun),
    Skip(SkipReason),
}

/// Signed seconds from `target` to `local` on a 24h clock, wrapped into
/// `[-12h, 12h)` so windows around midnight compare correctly.
pub fn offset_from_target(local: NaiveTime, target: NaiveTime) -> i64 {
    let raw = (local - target).num_seconds();
    (raw + SECONDS_PER_DAY / 2).rem_euclid(SECONDS_PER_DAY) - SECONDS_PER_DAY / 2
}

pub fn within_window(offset_secs: i64, tolerance_minutes: i64) -> bool {
    offset_secs.abs() <= tolerance_minutes * 60
}

/// Decides, per trigger, which stage may run against which campaign.
pub struct DispatchController<'a> {
    repo: &'a Repository,
    schedule: &'a ScheduleConfig,
    notifier: &'a dyn Notifier,
}

impl<'a> DispatchController<'a> {
    pub fn new(
        repo: &'a Repository,
        schedule: &'a ScheduleConfig,
        notifier: &'a dyn Notifier,
    ) -> Self {
        Self {
            repo,
            schedule,
            notifier,
        }
    }

    /// Offset from the stage's target and the cycle date, which is the local
    /// date of the nearest target occurrence.
    pub fn locate(&self, stage: Stage, now: DateTime<Utc>) -> Result<(i64, NaiveDate)> {
        let tz = self.schedule.tz()?;
        let local = now.with_timezone(&tz).naive_local();
        let target = self.schedule.stage(stage).target_time()?;
        let offset = offset_from_target(local.time(), target);
        let cycle_date = (local - Duration::seconds(offset)).date();
        Ok((offset, cycle_date))
    }

    pub async fn decide(&self, stage: Stage, now: DateTime<Utc>) -> Result<Decision> {
        let stage_schedule = self.schedule.stage(stage);
        if !stage_schedule.enabled {
            return Ok(Decision::Skip(SkipReason::Disabled));
        }

        let (offset, cycle_date) = self.locate(stage, now)?;
        let campaign_date = cycle_date + Duration::days(stage_schedule.campaign_day_offset);

        if !within_window(offset, self.schedule.tolerance_minutes) {
            if stage == Stage::FinalSend && offset > 0 {
                self.warn_if_overdue(cycle_date, campaign_date).await?;
            }
            return Ok(Decision::Skip(SkipReason::OutsideWindow {
                minutes_from_target: offset / 60,
            }));
        }

        if self.repo.has_stage_run(stage.as_str(), cycle_date).await? {
            return Ok(Decision::Skip(SkipReason::AlreadyRan));
        }

        if let Some(reason) = self.check_pre_state(stage, campaign_date).await? {
            return Ok(Decision::Skip(reason));
        }

        Ok(Decision::Run(StageRun {
            stage,
            cycle_date,
            campaign_date,
        }))
    }

    async fn check_pre_state(&self, stage: Stage, campaign_date: NaiveDate) -> Result<Option<SkipReason>> {
        if stage == Stage::Ingestion {
            return Ok(None);
        }
        let Some(campaign) = self.repo.find_campaign_by_date(campaign_date).await? else {
            return Ok(Some(SkipReason::NoCampaign));
        };
        let ready = match stage {
            Stage::Ingestion => true,
            Stage::EventPopulation => !campaign.status.is_terminal(),
            Stage::ReviewSend => campaign.status == CampaignStatus::Draft,
            Stage::FinalSend => campaign.status.is_pre_send(),
        };
        Ok((!ready).then_some(SkipReason::WrongStatus(campaign.status)))
    }

    /// Warns once per cycle when the final send window has passed and the
    /// campaign is still waiting to go out. Returns whether a warning was sent.
    async fn warn_if_overdue(&self, cycle_date: NaiveDate, campaign_date: NaiveDate) -> Result<bool> {
        if self
            .repo
            .has_stage_run(Stage::FinalSend.as_str(), cycle_date)
            .await?
        {
            return Ok(false);
        }
        let Some(campaign) = self.repo.find_campaign_by_date(campaign_date).await? else {
            return Ok(false);
        };
        if !campaign.status.is_pre_send() {
            return Ok(false);
        }
        if !self
            .repo
            .claim_stage_run(OVERDUE_WARNING_MARKER, cycle_date)
            .await?
        {
            return Ok(false);
        }

        self.notifier
            .notify(
                "Final send window passed but the campaign has not been sent",
                Severity::Warning,
                json!({
                    "campaign_id": campaign.id,
                    "campaign_date": campaign.date.to_string(),
                    "status": campaign.status.as_str(),
                    "target": self.schedule.final_send.target,
                    "timezone": self.schedule.timezone,
                }),
            )
            .await;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use chrono_tz::America::Chicago;

    use super::*;
    use crate::services::testing::RecordingNotifier;

    fn t(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    fn chicago(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
        Chicago
            .with_ymd_and_hms(y, mo, d, h, mi, 0)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_offset_wraps_midnight() {
        assert_eq!(offset_from_target(t(0, 5), t(23, 55)), 10 * 60);
        assert_eq!(offset_from_target(t(23, 50), t(0, 5)), -15 * 60);
        assert_eq!(offset_from_target(t(4, 40), t(4, 55)), -15 * 60);
        assert!(within_window(offset_from_target(t(0, 5), t(23, 55)), 15));
        assert!(!within_window(offset_from_target(t(5, 11), t(4, 55)), 15));
    }

    #[tokio::test]
    async fn test_cycle_date_of_window_straddling_midnight() {
        let repo = Repository::in_memory().await.unwrap();
        let mut schedule = ScheduleConfig::default();
        schedule.review_send.target = "23:55".to_string();
        let notifier = RecordingNotifier::default();
        let controller = DispatchController::new(&repo, &schedule, &notifier);

        let (_, before) = controller
            .locate(Stage::ReviewSend, chicago(2026, 4, 9, 23, 50))
            .unwrap();
        let (_, after) = controller
            .locate(Stage::ReviewSend, chicago(2026, 4, 10, 0, 5))
            .unwrap();
        assert_eq!(before, NaiveDate::from_ymd_opt(2026, 4, 9).unwrap());
        assert_eq!(after, before);
    }

    #[tokio::test]
    async fn test_review_send_requires_draft_campaign_for_next_day() {
        let repo = Repository::in_memory().await.unwrap();
        let schedule = ScheduleConfig::default();
        let notifier = RecordingNotifier::default();
        let controller = DispatchController::new(&repo, &schedule, &notifier);
        let now = chicago(2026, 4, 9, 21, 4);

        assert_eq!(
            controller.decide(Stage::ReviewSend, now).await.unwrap(),
            Decision::Skip(SkipReason::NoCampaign)
        );

        let tomorrow = NaiveDate::from_ymd_opt(2026, 4, 10).unwrap();
        repo.ensure_campaign(tomorrow).await.unwrap();
        assert_eq!(
            controller.decide(Stage::ReviewSend, now).await.unwrap(),
            Decision::Run(StageRun {
                stage: Stage::ReviewSend,
                cycle_date: NaiveDate::from_ymd_opt(2026, 4, 9).unwrap(),
                campaign_date: tomorrow,
            })
        );

        assert!(matches!(
            controller
                .decide(Stage::ReviewSend, chicago(2026, 4, 9, 21, 20))
                .await
                .unwrap(),
            Decision::Skip(SkipReason::OutsideWindow { minutes_from_target: 20 })
        ));
    }

    #[tokio::test]
    async fn test_claimed_marker_skips_later_triggers() {
        let repo = Repository::in_memory().await.unwrap();
        let schedule = ScheduleConfig::default();
        let notifier = RecordingNotifier::default();
        let controller = DispatchController::new(&repo, &schedule, &notifier);
        let now = chicago(2026, 4, 9, 20, 1);

        let Decision::Run(run) = controller.decide(Stage::Ingestion, now).await.unwrap() else {
            panic!("ingestion should run inside its window");
        };
        assert!(repo.claim_stage_run(run.stage.as_str(), run.cycle_date).await.unwrap());

        assert_eq!(
            controller.decide(Stage::Ingestion, now).await.unwrap(),
            Decision::Skip(SkipReason::AlreadyRan)
        );
    }

    #[test]
    fn test_disabled_stage_is_skipped() {
        tokio_test::block_on(async {
            let repo = Repository::in_memory().await.unwrap();
            let mut schedule = ScheduleConfig::default();
            schedule.event_population.enabled = false;
            let notifier = RecordingNotifier::default();
            let controller = DispatchController::new(&repo, &schedule, &notifier);

            let decision = controller
                .decide(Stage::EventPopulation, chicago(2026, 4, 9, 20, 30))
                .await
                .unwrap();
            assert_eq!(decision, Decision::Skip(SkipReason::Disabled));
        });
    }

    #[tokio::test]
    async fn test_overdue_campaign_warns_once_per_cycle() {
        let repo = Repository::in_memory().await.unwrap();
        let schedule = ScheduleConfig::default();
        let notifier = RecordingNotifier::default();
        let controller = DispatchController::new(&repo, &schedule, &notifier);

        let today = NaiveDate::from_ymd_opt(2026, 4, 10).unwrap();
        let campaign = repo.ensure_campaign(today).await.unwrap();
        repo.compare_and_set_status(campaign.id, CampaignStatus::Draft, CampaignStatus::InReview)
            .await
            .unwrap();

        for minute in [30, 45] {
            let decision = controller
                .decide(Stage::FinalSend, chicago(2026, 4, 10, 5, minute))
                .await
                .unwrap();
            assert!(matches!(decision, Decision::Skip(SkipReason::OutsideWindow { .. })));
        }

        assert_eq!(notifier.count(Severity::Warning), 1);
        assert_eq!(notifier.count(Severity::Error), 0);
    }
}
