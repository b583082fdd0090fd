//! Injectable time source.

use chrono::{DateTime, Duration, FixedOffset, Local, NaiveDate, TimeZone, Utc};
use std::sync::Mutex;

/// Source of "now" for every time-based decision in the scheduler.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;

    /// Host UTC offset in effect at `at`. Follows DST transitions.
    fn local_offset(&self, at: DateTime<Utc>) -> FixedOffset {
        host_offset(at)
    }
}

fn host_offset(at: DateTime<Utc>) -> FixedOffset {
    Local.offset_from_utc_datetime(&at.naive_utc())
}

/// Wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests and replays. The host offset can be
/// pinned with [`FixedClock::set_local_offset`].
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
    offset: Mutex<Option<FixedOffset>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
            offset: Mutex::new(None),
        }
    }

    pub fn set_local_offset(&self, offset: FixedOffset) {
        if let Ok(mut guard) = self.offset.lock() {
            *guard = Some(offset);
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        if let Ok(mut guard) = self.now.lock() {
            *guard = now;
        }
    }

    pub fn advance(&self, by: Duration) {
        if let Ok(mut guard) = self.now.lock() {
            *guard += by;
        }
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        match self.now.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    fn local_offset(&self, at: DateTime<Utc>) -> FixedOffset {
        let pinned = match self.offset.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        };
        pinned.unwrap_or_else(|| host_offset(at))
    }
}

/// What "local time" means for the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocalZone {
    /// Configured `utc_offset_minutes`, constant all year.
    Fixed(FixedOffset),
    /// Host timezone, resolved at each instant it is asked about.
    Host,
}

impl LocalZone {
    /// `None` or an out-of-range offset means the host timezone.
    pub fn from_minutes(utc_offset_minutes: Option<i32>) -> Self {
        match utc_offset_minutes.and_then(|m| FixedOffset::east_opt(m.checked_mul(60)?)) {
            Some(offset) => Self::Fixed(offset),
            None => {
                if let Some(m) = utc_offset_minutes {
                    tracing::warn!("utc_offset_minutes={m} out of range, using host timezone");
                }
                Self::Host
            }
        }
    }

    /// Offset in effect at `at`.
    pub fn offset_at(&self, clock: &dyn Clock, at: DateTime<Utc>) -> FixedOffset {
        match self {
            Self::Fixed(offset) => *offset,
            Self::Host => clock.local_offset(at),
        }
    }

    /// Local calendar day containing `now`, with the offset that applies to it.
    pub fn today(&self, clock: &dyn Clock, now: DateTime<Utc>) -> (NaiveDate, FixedOffset) {
        let offset = self.offset_at(clock, now);
        (local_date(now, offset), offset)
    }

    /// `[midnight, next midnight)` of the local day containing `now`. Each
    /// bound uses the offset in effect at that bound, so a DST day is 23 or
    /// 25 hours long.
    pub fn today_bounds(&self, clock: &dyn Clock, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        let (day, offset) = self.today(clock, now);
        let start = self.local_instant(clock, day.and_time(chrono::NaiveTime::MIN), offset);
        let next = day.succ_opt().unwrap_or(day);
        let end = self.local_instant(clock, next.and_time(chrono::NaiveTime::MIN), offset);
        (start, end)
    }

    /// UTC instant of local wall time `local`, starting from the `guess`
    /// offset and re-resolving once at the result.
    pub fn local_instant(
        &self,
        clock: &dyn Clock,
        local: chrono::NaiveDateTime,
        guess: FixedOffset,
    ) -> DateTime<Utc> {
        let first = (local - offset_duration(guess)).and_utc();
        let offset = self.offset_at(clock, first);
        if offset == guess {
            return first;
        }
        (local - offset_duration(offset)).and_utc()
    }
}

/// Calendar date of `now` in `offset`.
pub fn local_date(now: DateTime<Utc>, offset: FixedOffset) -> NaiveDate {
    now.with_timezone(&offset).date_naive()
}

/// `[midnight, next midnight)` of `day` in `offset`, as UTC instants.
pub fn day_bounds(day: NaiveDate, offset: FixedOffset) -> (DateTime<Utc>, DateTime<Utc>) {
    let midnight = day.and_time(chrono::NaiveTime::MIN);
    let start = (midnight - offset_duration(offset)).and_utc();
    (start, start + Duration::days(1))
}

fn offset_duration(offset: FixedOffset) -> Duration {
    Duration::seconds(offset.local_minus_utc() as i64)
}
