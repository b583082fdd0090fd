//! Notification delivery: sends operator alerts to configured channels.
//! Supports: Telegram Bot API, HTTP webhook, and a log-only fallback.

use std::sync::Arc;

use allaboutme_core::config::NotifyConfig;
use allaboutme_core::error::{AllAboutMeError, Result};
use async_trait::async_trait;

/// Somewhere an alert can be delivered.
#[async_trait]
pub trait NotificationChannel: Send + Sync {
    fn name(&self) -> &str;

    /// Deliver `text`. `Ok` only when the far side accepted it.
    async fn send(&self, text: &str) -> Result<()>;
}

/// Notification target configuration.
#[derive(Debug, Clone, PartialEq)]
pub enum NotifyTarget {
    /// Telegram Bot API: send via `sendMessage`.
    Telegram { bot_token: String, chat_id: String },
    /// Generic HTTP webhook: POST with JSON body.
    Webhook {
        url: String,
        headers: Vec<(String, String)>,
    },
    /// Write to the process log only.
    Log,
}

impl NotifyTarget {
    pub fn name(&self) -> &'static str {
        match self {
            NotifyTarget::Telegram { .. } => "telegram",
            NotifyTarget::Webhook { .. } => "webhook",
            NotifyTarget::Log => "log",
        }
    }
}

/// A single target reached over HTTP.
pub struct TargetChannel {
    target: NotifyTarget,
    client: reqwest::Client,
}

impl TargetChannel {
    pub fn new(target: NotifyTarget) -> Self {
        Self {
            target,
            client: reqwest::Client::new(),
        }
    }

    async fn send_telegram(&self, bot_token: &str, chat_id: &str, text: &str) -> Result<()> {
        let url = format!("https://api.telegram.org/bot{bot_token}/sendMessage");
        let resp = self
            .client
            .post(&url)
            .json(&serde_json::json!({
                "chat_id": chat_id,
                "text": text,
                "disable_web_page_preview": true
            }))
            .timeout(std::time::Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| AllAboutMeError::Channel(format!("Telegram send failed: {e}")))?;

        if resp.status().is_success() {
            tracing::info!("✅ Telegram alert sent");
            Ok(())
        } else {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            Err(AllAboutMeError::Channel(format!("Telegram API error {status}: {body}")))
        }
    }

    async fn send_webhook(&self, url: &str, headers: &[(String, String)], text: &str) -> Result<()> {
        let mut req = self
            .client
            .post(url)
            .json(&serde_json::json!({
                "source": "allaboutme-automation",
                "text": text,
                "timestamp": chrono::Utc::now().to_rfc3339(),
            }))
            .timeout(std::time::Duration::from_secs(10));

        for (key, value) in headers {
            req = req.header(key.as_str(), value.as_str());
        }

        let resp = req
            .send()
            .await
            .map_err(|e| AllAboutMeError::Channel(format!("Webhook send failed: {e}")))?;

        if resp.status().is_success() {
            tracing::info!("✅ Webhook alert sent to {url}");
            Ok(())
        } else {
            Err(AllAboutMeError::Channel(format!("Webhook error {}", resp.status())))
        }
    }
}

#[async_trait]
impl NotificationChannel for TargetChannel {
    fn name(&self) -> &str {
        self.target.name()
    }

    async fn send(&self, text: &str) -> Result<()> {
        match &self.target {
            NotifyTarget::Telegram { bot_token, chat_id } => {
                self.send_telegram(bot_token, chat_id, text).await
            }
            NotifyTarget::Webhook { url, headers } => self.send_webhook(url, headers, text).await,
            NotifyTarget::Log => {
                tracing::warn!("📢 Alert (no channel configured):\n{text}");
                Ok(())
            }
        }
    }
}

/// Delivers to every channel; fails if any of them fails.
pub struct FanOut {
    channels: Vec<Arc<dyn NotificationChannel>>,
}

impl FanOut {
    pub fn new(channels: Vec<Arc<dyn NotificationChannel>>) -> Self {
        Self { channels }
    }
}

#[async_trait]
impl NotificationChannel for FanOut {
    fn name(&self) -> &str {
        "fan-out"
    }

    async fn send(&self, text: &str) -> Result<()> {
        let mut failures = Vec::new();
        for channel in &self.channels {
            if let Err(e) = channel.send(text).await {
                tracing::warn!("⚠️ Alert via {} failed: {e}", channel.name());
                failures.push(format!("{}: {e}", channel.name()));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(AllAboutMeError::Channel(failures.join("; ")))
        }
    }
}

/// Build targets from the notify config. Falls back to `Log` when nothing
/// is configured.
pub fn targets_from_config(config: &NotifyConfig) -> Vec<NotifyTarget> {
    let mut targets = Vec::new();

    if !config.telegram_bot_token.is_empty() && !config.telegram_chat_id.is_empty() {
        targets.push(NotifyTarget::Telegram {
            bot_token: config.telegram_bot_token.clone(),
            chat_id: config.telegram_chat_id.clone(),
        });
    }

    if !config.webhook_url.is_empty() {
        targets.push(NotifyTarget::Webhook {
            url: config.webhook_url.clone(),
            headers: vec![],
        });
    }

    if targets.is_empty() {
        targets.push(NotifyTarget::Log);
    }
    targets
}

/// The channel the error notifier should use for this config.
pub fn channel_from_config(config: &NotifyConfig) -> Arc<dyn NotificationChannel> {
    let mut channels: Vec<Arc<dyn NotificationChannel>> = targets_from_config(config)
        .into_iter()
        .map(|t| Arc::new(TargetChannel::new(t)) as Arc<dyn NotificationChannel>)
        .collect();
    if channels.len() == 1 {
        channels.remove(0)
    } else {
        Arc::new(FanOut::new(channels))
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Records delivered texts; fails while `failing` is set.
    #[derive(Default)]
    pub struct RecordingChannel {
        pub sent: Mutex<Vec<String>>,
        pub failing: AtomicBool,
    }

    impl RecordingChannel {
        pub fn set_failing(&self, failing: bool) {
            self.failing.store(failing, Ordering::SeqCst);
        }

        pub fn sent(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl NotificationChannel for RecordingChannel {
        fn name(&self) -> &str {
            "recording"
        }

        async fn send(&self, text: &str) -> Result<()> {
            if self.failing.load(Ordering::SeqCst) {
                return Err(AllAboutMeError::Channel("bot was blocked by the user".into()));
            }
            self.sent.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }
}
