use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::config::EmailConfig;
use crate::error::{AppError, Result};
use crate::models::{Article, Campaign};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchReceipt {
    pub dispatch_id: String,
}

/// Outbound email collaborator. Both calls may fail on transport errors.
#[async_trait]
pub trait EmailDispatcher: Send + Sync {
    async fn send_review(
        &self,
        campaign: &Campaign,
        articles: &[Article],
        subject_line: &str,
    ) -> Result<DispatchReceipt>;

    async fn send_final(
        &self,
        campaign: &Campaign,
        articles: &[Article],
        audience_id: &str,
    ) -> Result<DispatchReceipt>;
}

#[derive(Debug, Serialize)]
struct CreateCampaignRequest<'a> {
    name: String,
    subject: &'a str,
    from_name: &'a str,
    audience_id: &'a str,
    sections: Vec<Section<'a>>,
}

#[derive(Debug, Serialize)]
struct Section<'a> {
    position: usize,
    headline: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct CreateCampaignResponse {
    id: serde_json::Value,
}

/// Sends campaigns through a JSON campaign API (`POST {api_url}/campaigns`).
pub struct HttpEmailDispatcher {
    client: Client,
    config: EmailConfig,
}

impl HttpEmailDispatcher {
    pub fn new(config: EmailConfig) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(60)).build()?;
        Ok(Self { client, config })
    }

    async fn create_and_send(
        &self,
        name: String,
        subject: &str,
        audience_id: &str,
        articles: &[Article],
    ) -> Result<DispatchReceipt> {
        let sections = articles
            .iter()
            .enumerate()
            .map(|(i, a)| Section {
                position: i + 1,
                headline: &a.headline,
                content: &a.content,
            })
            .collect();
        let request = CreateCampaignRequest {
            name,
            subject,
            from_name: &self.config.from_name,
            audience_id,
            sections,
        };

        let response = self
            .client
            .post(format!("{}/campaigns", self.config.api_url.trim_end_matches('/')))
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let error_text = response.text().await?;
            return Err(AppError::EmailApi(format!("API error: {}", error_text)));
        }

        let created: CreateCampaignResponse = response.json().await?;
        let dispatch_id = match created.id {
            serde_json::Value::String(s) => s,
            other => other.to_string(),
        };
        Ok(DispatchReceipt { dispatch_id })
    }
}

#[async_trait]
impl EmailDispatcher for HttpEmailDispatcher {
    async fn send_review(
        &self,
        campaign: &Campaign,
        articles: &[Article],
        subject_line: &str,
    ) -> Result<DispatchReceipt> {
        self.create_and_send(
            format!("Review: {}", campaign.date),
            &format!("[REVIEW] {}", subject_line),
            &self.config.review_audience_id,
            articles,
        )
        .await
    }

    async fn send_final(
        &self,
        campaign: &Campaign,
        articles: &[Article],
        audience_id: &str,
    ) -> Result<DispatchReceipt> {
        let subject = campaign.subject_line.as_deref().unwrap_or_default();
        self.create_and_send(format!("Daily: {}", campaign.date), subject, audience_id, articles)
            .await
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    use super::*;

    /// Counts sends; fails every call while `fail` is set.
    #[derive(Default)]
    pub struct FakeEmail {
        pub review_sends: AtomicUsize,
        pub final_sends: AtomicUsize,
        pub fail: AtomicBool,
    }

    impl FakeEmail {
        pub fn failing() -> Self {
            let fake = Self::default();
            fake.fail.store(true, Ordering::SeqCst);
            fake
        }

        fn outcome(&self, counter: &AtomicUsize, prefix: &str) -> Result<DispatchReceipt> {
            if self.fail.load(Ordering::SeqCst) {
                return Err(AppError::EmailApi("connection reset".to_string()));
            }
            let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(DispatchReceipt {
                dispatch_id: format!("{}-{}", prefix, n),
            })
        }
    }

    #[async_trait]
    impl EmailDispatcher for FakeEmail {
        async fn send_review(
            &self,
            _campaign: &Campaign,
            _articles: &[Article],
            _subject_line: &str,
        ) -> Result<DispatchReceipt> {
            self.outcome(&self.review_sends, "review")
        }

        async fn send_final(
            &self,
            _campaign: &Campaign,
            _articles: &[Article],
            _audience_id: &str,
        ) -> Result<DispatchReceipt> {
            self.outcome(&self.final_sends, "final")
        }
    }
}
