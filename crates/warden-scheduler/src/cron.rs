//! Lightweight cron expression parser.
//! Supports: "MIN HOUR DOM MON DOW" (5-field, no seconds)
//! Minute/hour: *, */N, N, a,b,c. Day, month and weekday must be `*`.
//! Example: "0 8 * * *" = every day at 8:00
//!
//! Expressions are evaluated in a fixed UTC offset because group times are
//! local wall-clock times.

use chrono::{DateTime, Duration, FixedOffset, Timelike, Utc};
use warden_core::error::{Result, WardenError};

/// Convert a `HH:MM` time of day into a daily trigger `"<minute> <hour> * * *"`.
///
/// The two-digit fields are substituted verbatim, so `"09:05"` becomes
/// `"05 09 * * *"`.
pub fn time_to_cron(time: &str) -> Result<String> {
    let (hour, minute) = split_hhmm(time)?;
    Ok(format!("{minute} {hour} * * *"))
}

/// Validate a `HH:MM` string without building a trigger.
pub fn validate_time(time: &str) -> Result<()> {
    split_hhmm(time).map(|_| ())
}

/// Strict `^([01]\d|2[0-3]):[0-5]\d$`.
fn split_hhmm(time: &str) -> Result<(&str, &str)> {
    let invalid = || {
        WardenError::Validation(format!(
            "Invalid time '{time}' (expected HH:MM between 00:00 and 23:59)"
        ))
    };

    let bytes = time.as_bytes();
    if bytes.len() != 5 || bytes[2] != b':' {
        return Err(invalid());
    }
    if !bytes
        .iter()
        .enumerate()
        .all(|(i, b)| i == 2 || b.is_ascii_digit())
    {
        return Err(invalid());
    }

    let (hour, minute) = (&time[..2], &time[3..]);
    let h: u32 = hour.parse().map_err(|_| invalid())?;
    let m: u32 = minute.parse().map_err(|_| invalid())?;
    if h > 23 || m > 59 {
        return Err(invalid());
    }
    Ok((hour, minute))
}

/// A parsed daily cron expression.
#[derive(Debug, Clone, PartialEq)]
pub struct CronSchedule {
    minutes: Vec<u32>,
    hours: Vec<u32>,
}

impl CronSchedule {
    /// Parse a 5-field expression.
    pub fn parse(expression: &str) -> Result<Self> {
        let invalid = |why: &str| {
            WardenError::Validation(format!("Invalid cron expression '{expression}': {why}"))
        };

        let parts: Vec<&str> = expression.split_whitespace().collect();
        if parts.len() != 5 {
            return Err(invalid("need 5 fields: MIN HOUR DOM MON DOW"));
        }
        if parts[2..].iter().any(|p| *p != "*") {
            return Err(invalid("only '*' is supported for day, month and weekday"));
        }

        let minutes = parse_field(parts[0], 0, 59).ok_or_else(|| invalid("bad minute field"))?;
        let hours = parse_field(parts[1], 0, 23).ok_or_else(|| invalid("bad hour field"))?;
        Ok(Self { minutes, hours })
    }

    /// First matching minute strictly after `after`.
    pub fn next_after(&self, after: DateTime<Utc>, offset: FixedOffset) -> Option<DateTime<Utc>> {
        let mut candidate = (after + Duration::minutes(1)).with_timezone(&offset);
        // Zero out seconds
        candidate = candidate
            .with_second(0)
            .and_then(|c| c.with_nanosecond(0))
            .unwrap_or(candidate);

        // A daily schedule always matches within 24 hours.
        for _ in 0..(48 * 60) {
            if self.minutes.contains(&candidate.minute()) && self.hours.contains(&candidate.hour()) {
                return Some(candidate.with_timezone(&Utc));
            }
            candidate += Duration::minutes(1);
        }

        None
    }
}

/// Parse a cron expression and compute the next run time.
pub fn next_run_from_cron(
    expression: &str,
    after: DateTime<Utc>,
    offset: FixedOffset,
) -> Option<DateTime<Utc>> {
    match CronSchedule::parse(expression) {
        Ok(schedule) => schedule.next_after(after, offset),
        Err(e) => {
            tracing::warn!("{e}");
            None
        }
    }
}

/// Build a fixed offset from minutes east of UTC.
pub fn offset_from_minutes(minutes: i32) -> Result<FixedOffset> {
    FixedOffset::east_opt(minutes * 60)
        .ok_or_else(|| WardenError::Config(format!("Invalid UTC offset: {minutes} minutes")))
}

/// Parse a cron field into a list of matching values.
fn parse_field(field: &str, min: u32, max: u32) -> Option<Vec<u32>> {
    if field == "*" {
        return Some((min..=max).collect());
    }

    // */N — every N
    if let Some(step) = field.strip_prefix("*/") {
        let n: u32 = step.parse().ok()?;
        if n == 0 {
            return None;
        }
        return Some((min..=max).step_by(n as usize).collect());
    }

    // Comma-separated: "0,15,30,45"
    if field.contains(',') {
        let vals: Vec<u32> = field
            .split(',')
            .map(|s| s.trim().parse().ok())
            .collect::<Option<_>>()?;
        if vals.is_empty() || vals.iter().any(|v| *v < min || *v > max) {
            return None;
        }
        return Some(vals);
    }

    // Single number
    let n: u32 = field.parse().ok()?;
    if n >= min && n <= max {
        Some(vec![n])
    } else {
        None
    }
}
