//! Notification delivery.
//!
//! Health changes are delivered to the log and to every configured webhook
//! as a small JSON document:
//!
//! ```json
//! {"source": "boilerroom", "text": "EMERGENCY in the plant: ...", "timestamp": "2024-01-15T06:00:00Z"}
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, warn};

use boilerroom_core::{LogNotifier, Notifier};

use crate::config::NotifyConfig;

/// Body posted to webhooks.
#[derive(Debug, Serialize)]
pub struct WebhookPayload<'a> {
    pub source: &'static str,
    pub text: &'a str,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Posts every notification to a list of URLs.
#[derive(Debug, Clone)]
pub struct WebhookNotifier {
    client: Client,
    urls: Vec<String>,
}

impl WebhookNotifier {
    /// Create a notifier with a per-request timeout.
    pub fn new(urls: Vec<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self { client, urls })
    }

    /// Target URLs.
    pub fn urls(&self) -> &[String] {
        &self.urls
    }

    async fn post(&self, url: &str, payload: &WebhookPayload<'_>) -> Result<(), reqwest::Error> {
        self.client
            .post(url)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn notify(&self, text: &str) {
        let payload = WebhookPayload {
            source: "boilerroom",
            text,
            timestamp: OffsetDateTime::now_utc(),
        };
        for url in &self.urls {
            match self.post(url, &payload).await {
                Ok(()) => debug!("Notification delivered to {}", url),
                Err(e) => warn!("Failed to deliver notification to {}: {}", url, e),
            }
        }
    }
}

/// Delivers to several notifiers in turn.
#[derive(Clone, Default)]
pub struct FanoutNotifier {
    targets: Vec<Arc<dyn Notifier>>,
}

impl FanoutNotifier {
    /// Create an empty fan-out.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a target.
    pub fn with(mut self, target: Arc<dyn Notifier>) -> Self {
        self.targets.push(target);
        self
    }

    /// Number of targets.
    pub fn len(&self) -> usize {
        self.targets.len()
    }

    /// Whether there are no targets.
    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }
}

#[async_trait]
impl Notifier for FanoutNotifier {
    async fn notify(&self, text: &str) {
        for target in &self.targets {
            target.notify(text).await;
        }
    }
}

/// Build the notifier described by the configuration.
pub fn build_notifier(config: &NotifyConfig) -> Result<FanoutNotifier, reqwest::Error> {
    let mut notifier = FanoutNotifier::new();
    if config.log {
        notifier = notifier.with(Arc::new(LogNotifier));
    }
    if !config.webhooks.is_empty() {
        let webhooks = WebhookNotifier::new(
            config.webhooks.clone(),
            Duration::from_secs(config.timeout_secs),
        )?;
        notifier = notifier.with(Arc::new(webhooks));
    }
    if notifier.is_empty() {
        warn!("No notification target configured, health changes will only be logged");
    }
    Ok(notifier)
}
