//! # AllAboutMe Scheduler
//!
//! Automation core of the video pipeline: turns a daily quota into
//! publication slots and walks each slot through script → video → publish.
//!
//! ## Design Principles
//! - SQLite persistence: slots and the audit log survive restarts
//! - The dispatcher is the only writer of post status
//! - Work is handed off through a typed queue and never awaited
//! - Tokio timers only: zero overhead when idle
//!
//! ## Architecture
//! ```text
//! AutomationEngine (tokio timers, single-flight per trigger)
//!   ├── daily "1 0 * * *"  → ScheduleGenerator  → N pending posts
//!   ├── every 5 min        → PendingDispatcher  → WorkQueue
//!   │                                               └── WorkerRuntime
//!   │                                                    ├── ScriptWriter  → script_ref
//!   │                                                    ├── VideoRenderer → video_ref
//!   │                                                    └── Publisher
//!   └── every hour         → ErrorNotifier      → NotificationChannel
//!                                                  ├── Telegram (sendMessage)
//!                                                  ├── Webhook (HTTP POST)
//!                                                  └── Log
//! ```

pub mod alerts;
pub mod clock;
pub mod cron;
pub mod dispatcher;
pub mod engine;
pub mod logs;
pub mod notify;
pub mod persistence;
pub mod posts;
pub mod queue;
pub mod schedule;
pub mod settings;
pub mod workers;

pub use alerts::{ErrorNotifier, NotifyReport};
pub use clock::{Clock, FixedClock, LocalZone, SystemClock};
pub use dispatcher::{DispatchReport, PendingDispatcher};
pub use engine::{AutomationEngine, AutomationStatus, TriggerOutcome};
pub use logs::{AutomationLog, LogLevel, NewLog};
pub use persistence::AutomationDb;
pub use posts::{Platform, PlatformTargets, PostStatus, ScheduledPost};
pub use queue::{ChannelQueue, PostText, WorkQueue, WorkRequest, work_channel};
pub use schedule::{ScheduleGenerator, ScheduleSummary};
pub use workers::{Publisher, Script, ScriptWriter, VideoRenderer, WorkerRuntime};
