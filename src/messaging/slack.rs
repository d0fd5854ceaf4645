use crate::events::{Emission, OutcomeEvent, OutcomeKind};
use crate::messaging::domain::EventSink;
use crate::shared::constants::slack::POST_MESSAGE_URL;
use crate::shared::error::WatcherError;
use crate::Result;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Serialize)]
struct PostMessage<'a> {
    channel: &'a str,
    text: String,
}

#[derive(Debug, Deserialize)]
struct PostMessageResponse {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
}

/// Posts alertable outcomes to a Slack channel.
pub struct SlackAlertSink {
    channel: String,
    token: String,
    url: String,
    http_client: Client,
}

impl SlackAlertSink {
    pub fn new(channel: String, token: String, request_timeout: Duration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            channel,
            token,
            url: POST_MESSAGE_URL.to_string(),
            http_client,
        })
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = url.into();
        self
    }

    fn failure(reason: impl ToString) -> WatcherError {
        WatcherError::Sink {
            sink: "slack".to_string(),
            reason: reason.to_string(),
        }
    }
}

/// Alert line for an outcome, `None` for kinds that never alert.
pub fn alert_text(event: &OutcomeEvent) -> Option<String> {
    if !event.kind.is_alert() {
        return None;
    }

    let marker = match event.kind {
        OutcomeKind::Slashed => "✂️",
        OutcomeKind::Exited => "🚶",
        OutcomeKind::WrongFeeRecipient => "🚩",
        OutcomeKind::DoubleMissed => "😱",
        _ => "💩",
    };
    Some(format!("{} {}", marker, event))
}

#[async_trait]
impl EventSink for SlackAlertSink {
    fn name(&self) -> &str {
        "slack"
    }

    async fn deliver(&mut self, emission: &Emission) -> Result<()> {
        let Emission::Outcome(event) = emission else {
            return Ok(());
        };
        let Some(text) = alert_text(event) else {
            return Ok(());
        };

        let response = self
            .http_client
            .post(&self.url)
            .bearer_auth(&self.token)
            .json(&PostMessage {
                channel: &self.channel,
                text,
            })
            .send()
            .await
            .map_err(Self::failure)?;

        if !response.status().is_success() {
            return Err(Self::failure(format!("status {}", response.status())).into());
        }

        let body: PostMessageResponse = response.json().await.map_err(Self::failure)?;
        if !body.ok {
            return Err(Self::failure(body.error.unwrap_or_else(|| "unknown error".to_string())).into());
        }

        debug!("Alert posted to {} for {}", self.channel, event.kind);
        Ok(())
    }
}
