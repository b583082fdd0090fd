//! AllAboutMe configuration system.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{AllAboutMeError, Result};

/// Root configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AllAboutMeConfig {
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub notify: NotifyConfig,
}

impl AllAboutMeConfig {
    /// Load config from the default path (~/.allaboutme/config.toml).
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            let mut config = Self::default();
            config.apply_env();
            config.validate()?;
            Ok(config)
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AllAboutMeError::Config(format!("Failed to read config: {e}")))?;
        let mut config: Self = toml::from_str(&content)
            .map_err(|e| AllAboutMeError::Config(format!("Failed to parse config: {e}")))?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Save config to the given path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AllAboutMeError::Config(format!("Failed to serialize config: {e}")))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Get the default config path.
    pub fn default_path() -> PathBuf {
        Self::home_dir().join("config.toml")
    }

    /// Get the AllAboutMe home directory.
    pub fn home_dir() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".allaboutme")
    }

    /// Database path with `~` expanded.
    pub fn database_path(&self) -> PathBuf {
        PathBuf::from(shellexpand::tilde(&self.database.path).to_string())
    }

    /// Fill empty notification credentials from the environment.
    fn apply_env(&mut self) {
        if self.notify.telegram_bot_token.is_empty()
            && let Ok(token) = std::env::var("TELEGRAM_BOT_TOKEN")
        {
            self.notify.telegram_bot_token = token;
        }
        if self.notify.telegram_chat_id.is_empty()
            && let Ok(chat_id) = std::env::var("TG_MOD_CHAT_ID")
        {
            self.notify.telegram_chat_id = chat_id;
        }
    }

    /// Reject values the scheduler cannot work with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.schedule;
        if s.start_hour >= s.end_hour || s.end_hour > 24 {
            return Err(AllAboutMeError::Config(format!(
                "Invalid schedule window [{}, {}): need start < end <= 24",
                s.start_hour, s.end_hour
            )));
        }
        if s.default_daily_videos == 0 {
            return Err(AllAboutMeError::Config(
                "schedule.default_daily_videos must be positive".into(),
            ));
        }
        if self.dispatch.interval_secs == 0 || self.notify.interval_secs == 0 {
            return Err(AllAboutMeError::Config(
                "Trigger intervals must be positive".into(),
            ));
        }
        if self.notify.batch_size == 0 {
            return Err(AllAboutMeError::Config("notify.batch_size must be positive".into()));
        }
        Ok(())
    }
}

/// Automation database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: String,
}

fn default_db_path() -> String { "~/.allaboutme/automation.db".into() }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self { path: default_db_path() }
    }
}

/// Daily schedule generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// First publication hour (local time).
    #[serde(default = "default_start_hour")]
    pub start_hour: u32,
    /// End of the publication window, exclusive. 24 means midnight.
    #[serde(default = "default_end_hour")]
    pub end_hour: u32,
    /// Used when the `daily_videos` setting is absent.
    #[serde(default = "default_daily_videos")]
    pub default_daily_videos: u32,
    /// When the daily schedule is created (MIN HOUR DOM MON DOW).
    #[serde(default = "default_daily_cron")]
    pub daily_cron: String,
    /// Offset of "local time" from UTC. Unset = host timezone.
    #[serde(default)]
    pub utc_offset_minutes: Option<i32>,
}

fn default_start_hour() -> u32 { 7 }
fn default_end_hour() -> u32 { 24 }
fn default_daily_videos() -> u32 { 10 }
fn default_daily_cron() -> String { "1 0 * * *".into() }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            start_hour: default_start_hour(),
            end_hour: default_end_hour(),
            default_daily_videos: default_daily_videos(),
            daily_cron: default_daily_cron(),
            utc_offset_minutes: None,
        }
    }
}

/// Pending-post dispatch trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    #[serde(default = "default_dispatch_interval")]
    pub interval_secs: u64,
}

fn default_dispatch_interval() -> u64 { 300 }

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { interval_secs: default_dispatch_interval() }
    }
}

/// Error notification sweep and its delivery targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyConfig {
    #[serde(default = "default_notify_interval")]
    pub interval_secs: u64,
    /// Max unnotified errors folded into one alert.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Characters of `details` kept per entry.
    #[serde(default = "default_details_excerpt")]
    pub details_excerpt: usize,
    #[serde(default)]
    pub telegram_bot_token: String,
    #[serde(default)]
    pub telegram_chat_id: String,
    #[serde(default)]
    pub webhook_url: String,
}

fn default_notify_interval() -> u64 { 3600 }
fn default_batch_size() -> usize { 10 }
fn default_details_excerpt() -> usize { 200 }

impl Default for NotifyConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_notify_interval(),
            batch_size: default_batch_size(),
            details_excerpt: default_details_excerpt(),
            telegram_bot_token: String::new(),
            telegram_chat_id: String::new(),
            webhook_url: String::new(),
        }
    }
}
