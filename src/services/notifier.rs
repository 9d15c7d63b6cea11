use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
}

impl Severity {
    fn emoji(self) -> &'static str {
        match self {
            Severity::Info => ":information_source:",
            Severity::Warning => ":warning:",
            Severity::Error => ":rotating_light:",
        }
    }
}

/// Fire-and-forget alerts. Implementations swallow their own failures so a
/// broken channel never blocks the pipeline.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &str, severity: Severity, context: serde_json::Value);
}

/// Writes notifications to the log only.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, message: &str, severity: Severity, context: serde_json::Value) {
        match severity {
            Severity::Info => tracing::info!(%context, "{}", message),
            Severity::Warning => tracing::warn!(%context, "{}", message),
            Severity::Error => tracing::error!(%context, "{}", message),
        }
    }
}

#[derive(Debug, Serialize)]
struct SlackMessage {
    text: String,
}

pub struct SlackNotifier {
    client: Client,
    webhook_url: String,
}

impl SlackNotifier {
    pub fn new(webhook_url: String) -> Result<Self> {
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            webhook_url,
        })
    }

    async fn post(&self, text: String) -> Result<()> {
        let response = self
            .client
            .post(&self.webhook_url)
            .json(&SlackMessage { text })
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(anyhow::anyhow!("Slack webhook returned HTTP {}", response.status()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for SlackNotifier {
    async fn notify(&self, message: &str, severity: Severity, context: serde_json::Value) {
        let text = format!("{} {}\n```{}```", severity.emoji(), message, context);
        if let Err(e) = self.post(text).await {
            tracing::warn!(error = %e, "Failed to deliver Slack notification");
        }
        LogNotifier.notify(message, severity, context).await;
    }
}
