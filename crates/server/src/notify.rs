//! Outbound notifications. Delivery is fire-and-forget: failures are logged
//! and never reach the caller's result.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::{NotificationConfig, NotificationProvider};

const BOT_NAME: &str = "artsync";
const EMBED_COLOR: u32 = 0x9B59B6;
const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    #[error("webhook returned status {0}")]
    Status(u16),
    #[error("webhook request failed: {0}")]
    Transport(String),
}

#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        message: &str,
        image_url: Option<&str>,
        title: &str,
    ) -> Result<(), NotifyError>;
}

/// Posts a single embed to a Discord webhook. Discord answers 204 on success.
pub struct DiscordNotifier {
    webhook: String,
    client: reqwest::Client,
}

impl DiscordNotifier {
    pub fn new(webhook: String) -> Result<Self, NotifyError> {
        let client = reqwest::Client::builder()
            .timeout(NOTIFY_TIMEOUT)
            .build()
            .map_err(|e| NotifyError::Transport(e.to_string()))?;
        Ok(Self { webhook, client })
    }

    fn payload(message: &str, image_url: Option<&str>, title: &str) -> serde_json::Value {
        let mut embed = json!({
            "author": { "name": BOT_NAME },
            "title": title,
            "description": message,
            "color": EMBED_COLOR,
        });
        if let Some(url) = image_url.filter(|u| !u.is_empty()) {
            embed["image"] = json!({ "url": url });
        }
        json!({
            "username": BOT_NAME,
            "embeds": [embed],
        })
    }
}

#[async_trait::async_trait]
impl Notifier for DiscordNotifier {
    async fn notify(
        &self,
        message: &str,
        image_url: Option<&str>,
        title: &str,
    ) -> Result<(), NotifyError> {
        let resp = self
            .client
            .post(&self.webhook)
            .json(&Self::payload(message, image_url, title))
            .send()
            .await
            .map_err(|e| NotifyError::Transport(e.to_string()))?;

        match resp.status().as_u16() {
            204 => Ok(()),
            status => Err(NotifyError::Status(status)),
        }
    }
}

/// Hands notifications to a background task. A dispatcher without a
/// notifier drops everything silently.
#[derive(Clone, Default)]
pub struct NotificationDispatcher {
    notifier: Option<Arc<dyn Notifier>>,
}

impl NotificationDispatcher {
    pub fn new(notifier: Option<Arc<dyn Notifier>>) -> Self {
        Self { notifier }
    }

    pub fn from_config(config: Option<&NotificationConfig>) -> Result<Self, NotifyError> {
        let notifier: Option<Arc<dyn Notifier>> = match config {
            Some(NotificationConfig {
                provider: NotificationProvider::Discord,
                webhook,
            }) => Some(Arc::new(DiscordNotifier::new(webhook.clone())?)),
            None => None,
        };
        Ok(Self { notifier })
    }

    pub fn is_enabled(&self) -> bool {
        self.notifier.is_some()
    }

    /// Returns the delivery task so tests can wait for it.
    pub fn dispatch(
        &self,
        message: String,
        image_url: Option<String>,
        title: String,
    ) -> Option<JoinHandle<()>> {
        let notifier = self.notifier.clone()?;
        Some(tokio::spawn(async move {
            match notifier.notify(&message, image_url.as_deref(), &title).await {
                Ok(()) => debug!(title = %title, "notification sent"),
                Err(e) => warn!(title = %title, error = %e, "notification failed"),
            }
        }))
    }

    pub fn app_started(&self) -> Option<JoinHandle<()>> {
        self.dispatch(
            format!("{BOT_NAME} has started successfully!"),
            None,
            format!("{BOT_NAME} notification"),
        )
    }
}
