//! Post readiness, random-window draws and schedule string parsing

use chrono::{DateTime, Duration, Utc};
use rand::Rng;

use crate::error::{FanoutError, Result};
use crate::types::{PublishMode, ScheduledPost};

const MIN_WINDOW_SECONDS: i64 = 30;
const MAX_WINDOW_SECONDS: i64 = 30 * 24 * 3600;

/// When a post should go out, as parsed from a schedule string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// A fixed instant
    At(i64),
    /// Some instant inside `[from, to]`, drawn later
    Window { from: i64, to: i64 },
}

impl Schedule {
    /// Apply this schedule to a post, replacing its publish mode
    pub fn apply(self, post: ScheduledPost) -> ScheduledPost {
        match self {
            Schedule::At(at) => post.at(at),
            Schedule::Window { from, to } => post.between(from, to),
        }
    }
}

/// Whether `post` may be dispatched at `now`.
///
/// Random-window posts are only due once their instant has been drawn. A
/// post whose window already closed is still due, so it goes out late
/// rather than never.
pub fn is_due(post: &ScheduledPost, now: i64) -> bool {
    match post.mode {
        PublishMode::Immediate => true,
        PublishMode::FixedTime => post.scheduled_at.is_some_and(|at| at <= now),
        PublishMode::RandomInRange => {
            let opened = post.scheduled_from.is_some_and(|from| from <= now);
            opened && post.scheduled_at.is_some_and(|at| at <= now)
        }
    }
}

/// Uniform draw in `[from, to]`, both ends inclusive
pub fn draw_instant(from: i64, to: i64) -> i64 {
    let (low, high) = if from <= to { (from, to) } else { (to, from) };
    rand::thread_rng().gen_range(low..=high)
}

/// Parse a schedule string relative to `now`.
///
/// Supports:
/// - Relative durations: "1h", "30m", "2d"
/// - Natural language: "tomorrow", "in 2 hours", "next monday 10am"
/// - Random windows: "random:10m-2h" (publish somewhere between 10 minutes
///   and 2 hours from now)
pub fn parse_schedule(input: &str, now: DateTime<Utc>) -> Result<Schedule> {
    let input = input.trim();
    if input.is_empty() {
        return Err(FanoutError::InvalidInput(
            "Schedule string cannot be empty".to_string(),
        ));
    }

    if let Some(range) = input.strip_prefix("random:") {
        return parse_window(range, now);
    }

    if let Ok(duration) = parse_duration(input) {
        return Ok(Schedule::At((now + duration).timestamp()));
    }

    chrono_english::parse_date_string(input, now, chrono_english::Dialect::Us)
        .map(|dt| Schedule::At(dt.timestamp()))
        .map_err(|_| {
            FanoutError::InvalidInput(format!("Could not parse schedule string: {}", input))
        })
}

fn parse_duration(input: &str) -> Result<Duration> {
    let std_duration = humantime::parse_duration(input)
        .map_err(|e| FanoutError::InvalidInput(format!("Could not parse duration: {}", e)))?;
    let seconds = i64::try_from(std_duration.as_secs())
        .map_err(|_| FanoutError::InvalidInput("Duration out of range".to_string()))?;
    Duration::try_seconds(seconds)
        .ok_or_else(|| FanoutError::InvalidInput("Duration out of range".to_string()))
}

fn parse_window(range: &str, now: DateTime<Utc>) -> Result<Schedule> {
    let (min, max) = range.split_once('-').ok_or_else(|| {
        FanoutError::InvalidInput("Random format must be random:MIN-MAX".to_string())
    })?;
    let min = parse_duration(min.trim())?.num_seconds();
    let max = parse_duration(max.trim())?.num_seconds();

    if min < MIN_WINDOW_SECONDS {
        return Err(FanoutError::InvalidInput(format!(
            "Random window must start at least {} seconds out",
            MIN_WINDOW_SECONDS
        )));
    }
    if max > MAX_WINDOW_SECONDS {
        return Err(FanoutError::InvalidInput(format!(
            "Random window must end within {} days",
            MAX_WINDOW_SECONDS / (24 * 3600)
        )));
    }
    if min >= max {
        return Err(FanoutError::InvalidInput(
            "Minimum must be less than maximum".to_string(),
        ));
    }

    let base = now.timestamp();
    Ok(Schedule::Window {
        from: base + min,
        to: base + max,
    })
}
