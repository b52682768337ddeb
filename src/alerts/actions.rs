//! Alert delivery sinks
//!
//! Concrete delivery (email, SMS, paging) lives outside this crate; hosts
//! implement `AlertAction` and register it on the engine under a channel name
//! referenced by rules. Two actions ship here: `LogAction`, which reports
//! through the `log` facade, and `WebhookAction`, which POSTs the alert as JSON
//! (or as a Slack-style `{"text": ...}` payload).

use crate::alerts::engine::Alert;
use crate::error::AlertError;
use log::warn;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tokio::runtime::{Handle, Runtime};

/// A sink that receives fired alerts
///
/// Dispatch runs on the alert dispatcher's worker thread, so implementations
/// may block on I/O.
#[cfg_attr(test, mockall::automock)]
pub trait AlertAction: Send + Sync {
    fn dispatch(&self, alert: &Alert) -> Result<(), AlertError>;
}

/// Reports alerts as warnings through the `log` facade
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAction;

impl AlertAction for LogAction {
    fn dispatch(&self, alert: &Alert) -> Result<(), AlertError> {
        warn!(
            "ALERT [{}] {} (rule {}, observed {} {} {})",
            alert.rule_name,
            alert.message,
            alert.rule_id,
            alert.value,
            alert.operator.symbol(),
            alert.threshold
        );
        Ok(())
    }
}

/// Body format used by `WebhookAction`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WebhookFormat {
    /// The serialized `Alert`
    Json,
    /// `{"text": "..."}` as accepted by Slack incoming webhooks
    Slack,
}

#[derive(Debug, Serialize)]
struct SlackPayload {
    text: String,
}

/// POSTs alerts to an HTTP endpoint
pub struct WebhookAction {
    client: Client,
    runtime: Runtime,
    url: String,
    format: WebhookFormat,
}

impl WebhookAction {
    /// Create a webhook action posting JSON alerts to `url`
    ///
    /// # Errors
    ///
    /// Returns `AlertError::DispatchFailed` if the HTTP client or its runtime
    /// cannot be created.
    pub fn new(url: impl Into<String>) -> Result<Self, AlertError> {
        Self::with_format(url, WebhookFormat::Json)
    }

    /// Create a webhook action posting Slack-formatted messages to `url`
    pub fn slack(url: impl Into<String>) -> Result<Self, AlertError> {
        Self::with_format(url, WebhookFormat::Slack)
    }

    pub fn with_format(url: impl Into<String>, format: WebhookFormat) -> Result<Self, AlertError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|e| {
                AlertError::DispatchFailed(format!("Failed to create webhook runtime: {}", e))
            })?;

        Ok(Self {
            client,
            runtime,
            url: url.into(),
            format,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Render the Slack message text for an alert
    fn slack_text(alert: &Alert) -> String {
        let mut text = format!(":rotating_light: *{}*\n{}", alert.rule_name, alert.message);
        if let Some(ref error) = alert.error {
            text.push_str(&format!(
                "\nLatest: [{}/{}] {} (x{})",
                error.error_type, error.severity, error.message, error.count
            ));
        }
        text
    }

    async fn post(&self, alert: &Alert) -> Result<(), AlertError> {
        let request = self.client.post(&self.url);
        let request = match self.format {
            WebhookFormat::Json => request.json(alert),
            WebhookFormat::Slack => request.json(&SlackPayload {
                text: Self::slack_text(alert),
            }),
        };

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(AlertError::DispatchFailed(format!(
                "webhook {} responded with status {}",
                self.url,
                response.status()
            )));
        }
        Ok(())
    }
}

impl AlertAction for WebhookAction {
    /// Blocks until the POST completes
    ///
    /// Inside a tokio runtime (inline dispatch from async code) the request is
    /// driven on a scoped thread, since `block_on` cannot nest. The action
    /// itself must still be dropped outside any runtime.
    fn dispatch(&self, alert: &Alert) -> Result<(), AlertError> {
        if Handle::try_current().is_err() {
            return self.runtime.block_on(self.post(alert));
        }

        std::thread::scope(|scope| {
            scope
                .spawn(|| self.runtime.block_on(self.post(alert)))
                .join()
                .unwrap_or_else(|_| {
                    Err(AlertError::DispatchFailed(format!(
                        "webhook {} worker panicked",
                        self.url
                    )))
                })
        })
    }
}
