//! Settings reader: flat string-keyed configuration consulted by the scheduler.

use allaboutme_core::error::Result;

use crate::persistence::AutomationDb;

/// Number of slots the schedule generator creates per day.
pub const DAILY_VIDEOS: &str = "daily_videos";
/// "true"/"false": whether the periodic triggers do any work.
pub const AUTOMATION_ENABLED: &str = "automation_enabled";

/// Read access to the settings table.
pub trait SettingsReader: Send + Sync {
    /// Value stored under `key`, or `default` when absent.
    fn get(&self, key: &str, default: &str) -> Result<String>;
}

impl SettingsReader for AutomationDb {
    fn get(&self, key: &str, default: &str) -> Result<String> {
        Ok(self
            .get_setting(key)?
            .unwrap_or_else(|| default.to_string()))
    }
}

/// Lenient boolean for operator-edited values.
pub fn parse_flag(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "true" | "1" | "yes" | "on"
    )
}
