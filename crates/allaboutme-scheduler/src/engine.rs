//! Automation engine: owns the three time triggers and the control
//! operations (enable, disable, status).
//!
//! ```text
//! daily  (cron, local offset)  → create_daily_schedule   [gated on enabled]
//! every dispatch.interval_secs → process_pending_posts   [gated on enabled]
//! every notify.interval_secs   → check_and_notify_errors [always]
//! ```
//!
//! Each trigger is single-flight: an invocation that finds the previous one
//! still running returns `Skipped`.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use allaboutme_core::config::AllAboutMeConfig;
use allaboutme_core::error::{AllAboutMeError, Result};
use chrono::{DateTime, FixedOffset, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::alerts::{ErrorNotifier, NotifyReport};
use crate::clock::{Clock, LocalZone};
use crate::cron;
use crate::dispatcher::{DispatchReport, PendingDispatcher};
use crate::notify::NotificationChannel;
use crate::persistence::AutomationDb;
use crate::posts::PostStatus;
use crate::queue::WorkQueue;
use crate::schedule::{ScheduleGenerator, ScheduleSummary};
use crate::settings::{AUTOMATION_ENABLED, SettingsReader, parse_flag};

/// What happened to one trigger invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "report", rename_all = "snake_case")]
pub enum TriggerOutcome<T> {
    Ran(T),
    /// The previous invocation of the same trigger was still running.
    Skipped,
    /// Automation is switched off.
    Disabled,
}

/// Snapshot for the `status` command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AutomationStatus {
    pub enabled: bool,
    pub pending_posts: usize,
    pub published_today: usize,
}

pub struct AutomationEngine {
    db: Arc<AutomationDb>,
    clock: Arc<dyn Clock>,
    generator: ScheduleGenerator,
    dispatcher: PendingDispatcher,
    notifier: ErrorNotifier,
    zone: LocalZone,
    daily_cron: String,
    dispatch_every: Duration,
    notify_every: Duration,
    schedule_lock: Mutex<()>,
    dispatch_lock: Mutex<()>,
    notify_lock: Mutex<()>,
}

impl AutomationEngine {
    pub fn new(
        db: Arc<AutomationDb>,
        clock: Arc<dyn Clock>,
        queue: Arc<dyn WorkQueue>,
        channel: Arc<dyn NotificationChannel>,
        config: &AllAboutMeConfig,
    ) -> Result<Self> {
        if !cron::is_valid(&config.schedule.daily_cron) {
            return Err(AllAboutMeError::Config(format!(
                "Invalid daily_cron '{}'",
                config.schedule.daily_cron
            )));
        }
        let generator = ScheduleGenerator::new(db.clone(), db.clone(), clock.clone(), &config.schedule)?;
        Ok(Self {
            zone: generator.zone(),
            dispatcher: PendingDispatcher::new(db.clone(), queue, clock.clone()),
            notifier: ErrorNotifier::new(db.clone(), channel, &config.notify),
            generator,
            db,
            clock,
            daily_cron: config.schedule.daily_cron.clone(),
            dispatch_every: Duration::from_secs(config.dispatch.interval_secs),
            notify_every: Duration::from_secs(config.notify.interval_secs),
            schedule_lock: Mutex::new(()),
            dispatch_lock: Mutex::new(()),
            notify_lock: Mutex::new(()),
        })
    }

    pub fn db(&self) -> &Arc<AutomationDb> {
        &self.db
    }

    /// Local offset in effect right now.
    pub fn offset(&self) -> FixedOffset {
        self.zone.offset_at(self.clock.as_ref(), self.clock.now())
    }

    // ─── Triggers ─────────────────────────────────────────────

    /// Daily trigger body.
    pub async fn run_schedule(&self) -> Result<TriggerOutcome<ScheduleSummary>> {
        if !self.automation_enabled()? {
            return Ok(TriggerOutcome::Disabled);
        }
        self.create_schedule().await
    }

    /// Dispatch trigger body.
    pub async fn run_dispatch(&self) -> Result<TriggerOutcome<DispatchReport>> {
        if !self.automation_enabled()? {
            return Ok(TriggerOutcome::Disabled);
        }
        self.dispatch().await
    }

    /// Notify trigger body. Runs whether or not automation is enabled.
    pub async fn run_notify(&self) -> Result<TriggerOutcome<NotifyReport>> {
        let Ok(_guard) = self.notify_lock.try_lock() else {
            return Ok(TriggerOutcome::Skipped);
        };
        Ok(TriggerOutcome::Ran(self.notifier.check_and_notify_errors().await?))
    }

    /// Create today's schedule regardless of the enabled flag.
    pub async fn create_schedule(&self) -> Result<TriggerOutcome<ScheduleSummary>> {
        let Ok(_guard) = self.schedule_lock.try_lock() else {
            return Ok(TriggerOutcome::Skipped);
        };
        Ok(TriggerOutcome::Ran(self.generator.create_daily_schedule()?))
    }

    /// One dispatch tick regardless of the enabled flag.
    pub async fn dispatch(&self) -> Result<TriggerOutcome<DispatchReport>> {
        let Ok(_guard) = self.dispatch_lock.try_lock() else {
            return Ok(TriggerOutcome::Skipped);
        };
        Ok(TriggerOutcome::Ran(self.dispatcher.process_pending_posts()?))
    }

    // ─── Control ──────────────────────────────────────────────

    pub fn automation_enabled(&self) -> Result<bool> {
        Ok(parse_flag(&self.db.get(AUTOMATION_ENABLED, "false")?))
    }

    /// Switch automation on. Creates today's schedule first if today has no
    /// slots; when that fails the flag is left unchanged.
    pub async fn enable(&self) -> Result<Option<ScheduleSummary>> {
        let (from, to) = self.zone.today_bounds(self.clock.as_ref(), self.clock.now());
        let created = if self.db.count_posts_between(from, to)? > 0 {
            None
        } else {
            match self.create_schedule().await? {
                TriggerOutcome::Ran(summary) => Some(summary),
                _ => None,
            }
        };

        self.db.set_setting(AUTOMATION_ENABLED, "true", self.clock.now())?;
        tracing::info!("▶️ Automation enabled");
        Ok(created)
    }

    pub fn disable(&self) -> Result<()> {
        self.db.set_setting(AUTOMATION_ENABLED, "false", self.clock.now())?;
        tracing::info!("⏸️ Automation disabled");
        Ok(())
    }

    pub fn status(&self) -> Result<AutomationStatus> {
        let (today_start, _) = self.zone.today_bounds(self.clock.as_ref(), self.clock.now());
        Ok(AutomationStatus {
            enabled: self.automation_enabled()?,
            pending_posts: self.db.count_by_status(PostStatus::Pending)?,
            published_today: self.db.count_published_since(today_start)?,
        })
    }

    // ─── Loops ────────────────────────────────────────────────

    /// Start the three trigger loops. They stop when `shutdown` flips or its
    /// sender is dropped.
    pub fn spawn(self: Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        tracing::info!(
            "⏰ Automation triggers started (daily '{}', dispatch every {}s, notify every {}s)",
            self.daily_cron,
            self.dispatch_every.as_secs(),
            self.notify_every.as_secs()
        );

        let daily = tokio::spawn(self.clone().daily_loop(shutdown.clone()));

        let engine = self.clone();
        let dispatch = tokio::spawn(every(self.dispatch_every, shutdown.clone(), move || {
            let engine = engine.clone();
            async move {
                match engine.run_dispatch().await {
                    Ok(TriggerOutcome::Ran(r)) if r.processed > 0 => tracing::info!(
                        "📬 Dispatch: {} processed, {} advanced, {} failed",
                        r.processed,
                        r.advanced,
                        r.failed
                    ),
                    Ok(TriggerOutcome::Skipped) => {
                        tracing::warn!("⏭️ Dispatch still running, tick skipped")
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("❌ Dispatch tick failed: {e}"),
                }
            }
        }));

        let engine = self.clone();
        let notify = tokio::spawn(every(self.notify_every, shutdown, move || {
            let engine = engine.clone();
            async move {
                match engine.run_notify().await {
                    Ok(TriggerOutcome::Ran(NotifyReport { error: Some(e), .. })) => {
                        tracing::warn!("⚠️ Error notification deferred: {e}")
                    }
                    Ok(TriggerOutcome::Skipped) => {
                        tracing::warn!("⏭️ Notifier still running, tick skipped")
                    }
                    Ok(_) => {}
                    Err(e) => tracing::error!("❌ Notify tick failed: {e}"),
                }
            }
        }));

        vec![daily, dispatch, notify]
    }

    /// Next daily run after `now`. The cron is matched on local wall time and
    /// that wall time is converted with the offset in effect at the run, so a
    /// DST change in between does not shift it by an hour.
    fn next_daily_run(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let clock = self.clock.as_ref();
        let offset = self.zone.offset_at(clock, now);
        let next_local = cron::next_run_from_cron(&self.daily_cron, now.with_timezone(&offset))?;
        let next = self.zone.local_instant(clock, next_local.naive_local(), offset);
        Some(if next > now { next } else { next_local.with_timezone(&Utc) })
    }

    async fn daily_loop(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        loop {
            let now = self.clock.now();
            let Some(next) = self.next_daily_run(now) else {
                tracing::error!("Daily trigger has no next run for '{}'", self.daily_cron);
                return;
            };
            let wait = (next - now).to_std().unwrap_or_default();
            tracing::debug!("Next schedule generation at {next}");

            tokio::select! {
                _ = tokio::time::sleep(wait) => {
                    match self.run_schedule().await {
                        Ok(TriggerOutcome::Disabled) => tracing::info!("Automation disabled, no schedule created"),
                        Ok(TriggerOutcome::Skipped) => tracing::warn!("⏭️ Schedule generation already running"),
                        Ok(TriggerOutcome::Ran(_)) => {}
                        Err(e) => tracing::error!("❌ Daily schedule failed: {e}"),
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        tracing::info!("Daily trigger stopped");
    }
}

/// Call `tick` every `period` until shutdown. Missed ticks are dropped, not
/// replayed.
async fn every<F, Fut>(period: Duration, mut shutdown: watch::Receiver<bool>, mut tick: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = ()>,
{
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        tokio::select! {
            _ = interval.tick() => tick().await,
            _ = shutdown.changed() => break,
        }
    }
}
