//! Daily schedule generation: evenly spaced publication slots over a
//! working window of the local day.

use std::sync::Arc;

use allaboutme_core::config::ScheduleConfig;
use allaboutme_core::error::{AllAboutMeError, Result};
use chrono::{DateTime, Duration, FixedOffset, NaiveDate, NaiveTime, Utc};
use serde::Serialize;

use crate::clock::{self, Clock, LocalZone};
use crate::logs::NewLog;
use crate::persistence::AutomationDb;
use crate::posts::PlatformTargets;
use crate::settings::{DAILY_VIDEOS, SettingsReader};

/// Publication window `[start_hour, end_hour)` in local hours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleWindow {
    start_hour: u32,
    end_hour: u32,
}

impl ScheduleWindow {
    pub fn new(start_hour: u32, end_hour: u32) -> Result<Self> {
        if start_hour >= end_hour || end_hour > 24 {
            return Err(AllAboutMeError::Config(format!(
                "Invalid schedule window [{start_hour}, {end_hour})"
            )));
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }

    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    pub fn minutes(&self) -> u32 {
        (self.end_hour - self.start_hour) * 60
    }
}

impl Default for ScheduleWindow {
    fn default() -> Self {
        Self {
            start_hour: 7,
            end_hour: 24,
        }
    }
}

/// `count` timestamps on `day`: the first at the window start, each next one
/// `window_minutes / count` later. The interval is not rounded to minutes.
pub fn calculate_schedule(
    day: NaiveDate,
    offset: FixedOffset,
    window: ScheduleWindow,
    count: u32,
) -> Result<Vec<DateTime<Utc>>> {
    let (midnight, _) = clock::day_bounds(day, offset);
    slots_from(midnight + Duration::hours(window.start_hour as i64), window, count)
}

/// `count` slots spread over `window` starting at `start`.
pub fn slots_from(start: DateTime<Utc>, window: ScheduleWindow, count: u32) -> Result<Vec<DateTime<Utc>>> {
    if count == 0 {
        return Err(AllAboutMeError::Config(
            "daily_videos must be positive".into(),
        ));
    }
    let window_ns = window.minutes() as i128 * 60 * 1_000_000_000;
    if window_ns < count as i128 {
        return Err(AllAboutMeError::Config(format!(
            "daily_videos={count} leaves no gap between slots"
        )));
    }
    Ok((0..count)
        .map(|i| start + slot_offset(window_ns, count, i))
        .collect())
}

/// Offset of slot `i` from the window start, exact to the nanosecond.
/// Strictly increasing in `i` whenever `window_ns >= count`.
fn slot_offset(window_ns: i128, count: u32, i: u32) -> Duration {
    Duration::nanoseconds((i as i128 * window_ns / count as i128) as i64)
}

/// Result of one generator run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleSummary {
    pub created: usize,
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub post_ids: Vec<i64>,
}

/// Materializes one day's slots as `pending` posts.
pub struct ScheduleGenerator {
    db: Arc<AutomationDb>,
    settings: Arc<dyn SettingsReader>,
    clock: Arc<dyn Clock>,
    zone: LocalZone,
    window: ScheduleWindow,
    default_daily_videos: u32,
}

impl ScheduleGenerator {
    pub fn new(
        db: Arc<AutomationDb>,
        settings: Arc<dyn SettingsReader>,
        clock: Arc<dyn Clock>,
        config: &ScheduleConfig,
    ) -> Result<Self> {
        Ok(Self {
            db,
            settings,
            clock,
            zone: LocalZone::from_minutes(config.utc_offset_minutes),
            window: ScheduleWindow::new(config.start_hour, config.end_hour)?,
            default_daily_videos: config.default_daily_videos,
        })
    }

    pub fn zone(&self) -> LocalZone {
        self.zone
    }

    /// Create today's schedule. Failures are logged as ERROR and returned;
    /// nothing is retried here.
    pub fn create_daily_schedule(&self) -> Result<ScheduleSummary> {
        match self.try_create() {
            Ok(summary) => {
                tracing::info!(
                    "✅ Schedule created: {} posts ({} → {})",
                    summary.created,
                    summary.first,
                    summary.last
                );
                Ok(summary)
            }
            Err(e) => {
                tracing::error!("❌ Failed to create daily schedule: {e}");
                let entry = NewLog::error("Failed to create daily schedule").with_details(e.to_string());
                if let Err(log_err) = self.db.append_log(&entry, self.clock.now()) {
                    tracing::error!("Could not record schedule failure: {log_err}");
                }
                Err(e)
            }
        }
    }

    fn try_create(&self) -> Result<ScheduleSummary> {
        let count = self.daily_videos()?;
        let now = self.clock.now();
        let (day, offset) = self.zone.today(self.clock.as_ref(), now);
        let local_start = day.and_time(NaiveTime::MIN) + Duration::hours(self.window.start_hour() as i64);
        let start = self.zone.local_instant(self.clock.as_ref(), local_start, offset);
        let times = slots_from(start, self.window, count)?;

        let (first, last) = match (times.first(), times.last()) {
            (Some(f), Some(l)) => (*f, *l),
            _ => return Err(AllAboutMeError::Config("Empty schedule".into())),
        };
        let summary_log = NewLog::info(format!("Created schedule for {} posts", times.len()))
            .with_details(format!("First: {first}, Last: {last}"));

        let post_ids = self
            .db
            .insert_schedule(&times, PlatformTargets::all(), &summary_log, now)?;

        Ok(ScheduleSummary {
            created: post_ids.len(),
            first,
            last,
            post_ids,
        })
    }

    /// `daily_videos` from settings. Absent → configured default; anything
    /// that is not a positive integer is a configuration error.
    fn daily_videos(&self) -> Result<u32> {
        let default = self.default_daily_videos.to_string();
        let raw = self.settings.get(DAILY_VIDEOS, &default)?;
        let n: i64 = raw.trim().parse().map_err(|_| {
            AllAboutMeError::Config(format!("Setting {DAILY_VIDEOS}='{raw}' is not an integer"))
        })?;
        if n <= 0 {
            return Err(AllAboutMeError::Config(format!(
                "Setting {DAILY_VIDEOS}={n} must be positive"
            )));
        }
        u32::try_from(n)
            .map_err(|_| AllAboutMeError::Config(format!("Setting {DAILY_VIDEOS}={n} is too large")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::logs::LogLevel;
    use crate::posts::PostStatus;
    use chrono::{TimeZone, Timelike};

    fn offset() -> FixedOffset {
        FixedOffset::east_opt(3 * 3600).unwrap()
    }

    fn generator(db: Arc<AutomationDb>) -> ScheduleGenerator {
        // 2026-02-22 00:01 at UTC+3.
        let now = Utc.with_ymd_and_hms(2026, 2, 21, 21, 1, 0).unwrap();
        let config = ScheduleConfig {
            utc_offset_minutes: Some(180),
            ..ScheduleConfig::default()
        };
        ScheduleGenerator::new(db.clone(), db, Arc::new(FixedClock::new(now)), &config).unwrap()
    }

    #[test]
    fn test_schedule_coverage_for_many_counts() {
        let day = NaiveDate::from_ymd_opt(2026, 2, 22).unwrap();
        for n in [1u32, 2, 3, 7, 10, 17, 60, 1020, 5000] {
            let times = calculate_schedule(day, offset(), ScheduleWindow::default(), n).unwrap();
            assert_eq!(times.len(), n as usize);

            let first = times[0].with_timezone(&offset());
            assert_eq!((first.hour(), first.minute(), first.second()), (7, 0, 0));
            assert_eq!(first.date_naive(), day);

            let expected_ms = 17.0 * 60.0 * 60_000.0 / n as f64;
            for (i, pair) in times.windows(2).enumerate() {
                assert!(pair[1] > pair[0], "n={n} not increasing at {i}");
                let gap = (pair[1] - pair[0]).num_milliseconds() as f64;
                assert!((gap - expected_ms).abs() <= 1.0, "n={n} gap {gap} vs {expected_ms}");
            }
            let last = times[times.len() - 1].with_timezone(&offset());
            assert!(last < (day + Duration::days(1)).and_hms_opt(0, 0, 0).unwrap().and_local_timezone(offset()).unwrap());
        }
    }

    #[test]
    fn test_ten_posts_every_102_minutes() {
        let day = NaiveDate::from_ymd_opt(2026, 2, 22).unwrap();
        let times = calculate_schedule(day, offset(), ScheduleWindow::default(), 10).unwrap();
        let second = times[1].with_timezone(&offset());
        assert_eq!((second.hour(), second.minute()), (8, 42));
    }

    #[test]
    fn test_slot_spacing_is_exact_for_huge_counts() {
        let window_ns = ScheduleWindow::default().minutes() as i128 * 60 * 1_000_000_000;
        for count in [61_200_001u32, 100_000_000, u32::MAX] {
            for i in [0u32, 1, count / 2, count - 2] {
                assert!(
                    slot_offset(window_ns, count, i + 1) > slot_offset(window_ns, count, i),
                    "count={count} slots {i} and {} collide",
                    i + 1
                );
            }
            assert!(slot_offset(window_ns, count, count - 1) < Duration::hours(17));
        }
        assert_eq!(slot_offset(window_ns, 10, 1), Duration::minutes(102));
    }

    #[test]
    fn test_zero_count_rejected() {
        let day = NaiveDate::from_ymd_opt(2026, 2, 22).unwrap();
        assert!(calculate_schedule(day, offset(), ScheduleWindow::default(), 0).is_err());
    }

    #[test]
    fn test_window_validation() {
        assert!(ScheduleWindow::new(7, 24).is_ok());
        assert!(ScheduleWindow::new(7, 7).is_err());
        assert!(ScheduleWindow::new(0, 25).is_err());
        assert_eq!(ScheduleWindow::default().minutes(), 17 * 60);
    }

    #[test]
    fn test_create_daily_schedule_uses_default() {
        let db = Arc::new(AutomationDb::open_in_memory().unwrap());
        let summary = generator(db.clone()).create_daily_schedule().unwrap();
        assert_eq!(summary.created, 10);
        assert_eq!(summary.first, Utc.with_ymd_and_hms(2026, 2, 22, 4, 0, 0).unwrap());

        let posts = db.list_posts().unwrap();
        assert_eq!(posts.len(), 10);
        assert!(posts.iter().all(|p| p.status == PostStatus::Pending
            && p.targets == PlatformTargets::all()
            && p.script_ref.is_none()
            && p.video_ref.is_none()));

        let logs = db.recent_logs(10, None).unwrap();
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, LogLevel::Info);
    }

    #[test]
    fn test_create_daily_schedule_reads_setting() {
        let db = Arc::new(AutomationDb::open_in_memory().unwrap());
        db.set_setting(DAILY_VIDEOS, " 3 ", Utc::now()).unwrap();
        let summary = generator(db.clone()).create_daily_schedule().unwrap();
        assert_eq!(summary.created, 3);
        assert_eq!(db.list_posts().unwrap().len(), 3);
    }

    #[test]
    fn test_invalid_setting_persists_nothing() {
        for bad in ["0", "-4", "ten", ""] {
            let db = Arc::new(AutomationDb::open_in_memory().unwrap());
            db.set_setting(DAILY_VIDEOS, bad, Utc::now()).unwrap();

            let err = generator(db.clone()).create_daily_schedule().unwrap_err();
            assert!(err.is_config(), "'{bad}' should be a config error");
            assert!(db.list_posts().unwrap().is_empty());

            let logs = db.recent_logs(10, None).unwrap();
            assert_eq!(logs.len(), 1);
            assert_eq!(logs[0].level, LogLevel::Error);
            assert!(logs[0].details.as_deref().unwrap_or("").contains(DAILY_VIDEOS));
        }
    }

    #[test]
    fn test_host_offset_resolved_at_generation() {
        // Built in summer at +02:00, generating in winter at +01:00.
        let clock = Arc::new(FixedClock::new(Utc.with_ymd_and_hms(2026, 7, 15, 10, 0, 0).unwrap()));
        clock.set_local_offset(FixedOffset::east_opt(2 * 3600).unwrap());
        let db = Arc::new(AutomationDb::open_in_memory().unwrap());
        let config = ScheduleConfig {
            utc_offset_minutes: None,
            ..ScheduleConfig::default()
        };
        let generator = ScheduleGenerator::new(db.clone(), db, clock.clone(), &config).unwrap();

        clock.set(Utc.with_ymd_and_hms(2026, 11, 30, 23, 1, 0).unwrap());
        clock.set_local_offset(FixedOffset::east_opt(3600).unwrap());
        let summary = generator.create_daily_schedule().unwrap();

        let first = summary.first.with_timezone(&FixedOffset::east_opt(3600).unwrap());
        assert_eq!(first.date_naive(), NaiveDate::from_ymd_opt(2026, 12, 1).unwrap());
        assert_eq!((first.hour(), first.minute()), (7, 0));
        assert_eq!(summary.first, Utc.with_ymd_and_hms(2026, 12, 1, 6, 0, 0).unwrap());
    }

    #[test]
    fn test_more_posts_than_minutes() {
        let db = Arc::new(AutomationDb::open_in_memory().unwrap());
        db.set_setting(DAILY_VIDEOS, "2000", Utc::now()).unwrap();
        let summary = generator(db).create_daily_schedule().unwrap();
        assert_eq!(summary.created, 2000);
    }
}
