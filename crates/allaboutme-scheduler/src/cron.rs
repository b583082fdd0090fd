//! Lightweight cron expression parser for the daily trigger.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Minute/hour wildcards: *, */N, N, N,M. Day fields must be `*`.
//! Example: "1 0 * * *" = every day at 00:01

use chrono::{DateTime, Duration, TimeZone, Timelike};

/// Next time strictly after `after` that matches `expression`, in `after`'s
/// timezone. `None` for an invalid or unsupported expression.
pub fn next_run_from_cron<Tz: TimeZone>(expression: &str, after: DateTime<Tz>) -> Option<DateTime<Tz>> {
    let parts: Vec<&str> = expression.split_whitespace().collect();
    if parts.len() != 5 {
        tracing::warn!(
            "Invalid cron expression: '{}' (need 5 fields: MIN HOUR DOM MON DOW)",
            expression
        );
        return None;
    }
    if parts[2..].iter().any(|f| *f != "*") {
        tracing::warn!(
            "Unsupported cron expression: '{}' (day/month/weekday must be *)",
            expression
        );
        return None;
    }

    let minutes = parse_field(parts[0], 0, 59)?;
    let hours = parse_field(parts[1], 0, 23)?;
    if minutes.is_empty() || hours.is_empty() {
        return None;
    }

    let mut candidate = after + Duration::minutes(1);
    candidate = candidate
        .with_second(0)
        .and_then(|c| c.with_nanosecond(0))
        .unwrap_or(candidate);

    // Every daily pattern matches within 48 hours.
    for _ in 0..(48 * 60) {
        if minutes.contains(&candidate.minute()) && hours.contains(&candidate.hour()) {
            return Some(candidate);
        }
        candidate = candidate + Duration::minutes(1);
    }

    None
}

/// Whether `expression` is usable by [`next_run_from_cron`].
pub fn is_valid(expression: &str) -> bool {
    next_run_from_cron(expression, chrono::Utc::now()).is_some()
}

/// Parse a cron field into a list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    // */N: every N
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n as usize).collect());
    }

    // Comma-separated: "0,15,30,45"
    if field.contains(',') {
        let vals: Result<Vec<u32>, _> = field.split(',').map(|s| s.trim().parse()).collect();
        return vals
            .ok()
            .map(|v| v.into_iter().filter(|x| *x >= min && *x <= max).collect());
    }

    let n: u32 = field.parse().ok()?;
    if n >= min && n <= max {
        Some(vec![n])
    } else {
        None
    }
}
