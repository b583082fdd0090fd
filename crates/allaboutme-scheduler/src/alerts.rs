//! Error notifier: folds unnotified ERROR log entries into one alert.
//!
//! Entries are flagged `notified` only after the channel accepts the alert.
//! A failed delivery is reported to the caller and never logged back into
//! the automation log, so alerts cannot feed on themselves.

use std::sync::Arc;

use allaboutme_core::config::NotifyConfig;
use allaboutme_core::error::Result;
use serde::Serialize;

use crate::logs::AutomationLog;
use crate::notify::NotificationChannel;
use crate::persistence::AutomationDb;

/// Outcome of one sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct NotifyReport {
    pub notified: usize,
    /// Delivery failure, if any. The entries stay eligible for the next sweep.
    pub error: Option<String>,
}

pub struct ErrorNotifier {
    db: Arc<AutomationDb>,
    channel: Arc<dyn NotificationChannel>,
    batch_size: usize,
    details_excerpt: usize,
}

impl ErrorNotifier {
    pub fn new(db: Arc<AutomationDb>, channel: Arc<dyn NotificationChannel>, config: &NotifyConfig) -> Self {
        Self {
            db,
            channel,
            batch_size: config.batch_size,
            details_excerpt: config.details_excerpt,
        }
    }

    pub async fn check_and_notify_errors(&self) -> Result<NotifyReport> {
        let entries = self.db.unnotified_errors(self.batch_size)?;
        if entries.is_empty() {
            return Ok(NotifyReport::default());
        }

        let text = compose_alert(&entries, self.details_excerpt);
        match self.channel.send(&text).await {
            Ok(()) => {
                let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
                self.db.mark_notified(&ids)?;
                tracing::info!("📨 Sent {} error notifications", ids.len());
                Ok(NotifyReport {
                    notified: ids.len(),
                    error: None,
                })
            }
            Err(e) => {
                tracing::error!("Failed to send error notifications: {e}");
                Ok(NotifyReport {
                    notified: 0,
                    error: Some(e.to_string()),
                })
            }
        }
    }
}

/// One line per entry: the message and a details excerpt of at most
/// `excerpt` chars.
pub fn compose_alert(entries: &[AutomationLog], excerpt: usize) -> String {
    let lines: Vec<String> = entries
        .iter()
        .map(|entry| match entry.details.as_deref().filter(|d| !d.is_empty()) {
            Some(details) => format!("• {}: {}", entry.message, truncate_chars(details, excerpt)),
            None => format!("• {}", entry.message),
        })
        .collect();
    format!(
        "🚨 Automation errors ({}):\n\n{}",
        entries.len(),
        lines.join("\n")
    )
}

fn truncate_chars(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}
