//! Scheduled posts: one planned publication slot and its progress.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a slot.
///
/// `pending → generating_script → generating_video → published`, and any
/// non-terminal state may drop to `failed`. Nothing leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PostStatus {
    Pending,
    GeneratingScript,
    GeneratingVideo,
    Published,
    Failed,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Pending => "pending",
            PostStatus::GeneratingScript => "generating_script",
            PostStatus::GeneratingVideo => "generating_video",
            PostStatus::Published => "published",
            PostStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PostStatus::Pending),
            "generating_script" => Some(PostStatus::GeneratingScript),
            "generating_video" => Some(PostStatus::GeneratingVideo),
            "published" => Some(PostStatus::Published),
            "failed" => Some(PostStatus::Failed),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PostStatus::Published | PostStatus::Failed)
    }

    /// Whether the state machine allows `self → next`.
    pub fn can_transition_to(&self, next: PostStatus) -> bool {
        use PostStatus::*;
        match (self, next) {
            (Published | Failed, _) => false,
            (_, Failed) => true,
            (Pending, GeneratingScript) => true,
            // A slot whose refs were filled out-of-band may skip ahead, never back.
            (Pending | GeneratingScript, GeneratingVideo) => true,
            (Pending | GeneratingScript | GeneratingVideo, Published) => true,
            _ => false,
        }
    }
}

impl std::fmt::Display for PostStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Social platform a slot can be published to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Telegram,
    Youtube,
    Tiktok,
    Instagram,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Telegram => "telegram",
            Platform::Youtube => "youtube",
            Platform::Tiktok => "tiktok",
            Platform::Instagram => "instagram",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-platform targeting flags, fixed when the slot is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlatformTargets {
    pub telegram: bool,
    pub youtube: bool,
    pub tiktok: bool,
    pub instagram: bool,
}

impl PlatformTargets {
    pub fn all() -> Self {
        Self {
            telegram: true,
            youtube: true,
            tiktok: true,
            instagram: true,
        }
    }

    pub fn none() -> Self {
        Self {
            telegram: false,
            youtube: false,
            tiktok: false,
            instagram: false,
        }
    }

    /// Enabled platforms in publishing order.
    pub fn platforms(&self) -> Vec<Platform> {
        let mut out = Vec::with_capacity(4);
        if self.telegram {
            out.push(Platform::Telegram);
        }
        if self.youtube {
            out.push(Platform::Youtube);
        }
        if self.tiktok {
            out.push(Platform::Tiktok);
        }
        if self.instagram {
            out.push(Platform::Instagram);
        }
        out
    }
}

/// A planned publication slot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduledPost {
    pub id: i64,
    pub scheduled_time: DateTime<Utc>,
    pub status: PostStatus,
    /// Filled by the script worker.
    pub script_ref: Option<i64>,
    /// Filled by the video worker.
    pub video_ref: Option<i64>,
    pub targets: PlatformTargets,
    pub caption: Option<String>,
    pub hashtags: Option<String>,
    pub created_at: DateTime<Utc>,
    pub published_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl ScheduledPost {
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.scheduled_time <= now
    }

    /// Due and waiting on nothing: either untouched, or its in-flight stage
    /// has written its reference back.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        if !self.is_due(now) {
            return false;
        }
        match self.status {
            PostStatus::Pending => true,
            PostStatus::GeneratingScript => self.script_ref.is_some(),
            PostStatus::GeneratingVideo => self.video_ref.is_some(),
            PostStatus::Published | PostStatus::Failed => false,
        }
    }
}

/// A status change the dispatcher commits in one write.
#[derive(Debug, Clone, PartialEq)]
pub struct Transition {
    pub status: PostStatus,
    pub published_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl Transition {
    pub fn to(status: PostStatus) -> Self {
        Self {
            status,
            published_at: None,
            error_message: None,
        }
    }

    pub fn published(at: DateTime<Utc>) -> Self {
        Self {
            status: PostStatus::Published,
            published_at: Some(at),
            error_message: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: PostStatus::Failed,
            published_at: None,
            error_message: Some(message.into()),
        }
    }
}
