//! Local request throttling per account
//!
//! Fixed windows floored to the minute and the hour, counted in memory per
//! `(org, account, request kind)`. This only keeps Fanout from hammering a
//! platform; the platforms enforce their own limits on top.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use crate::config::RateLimitConfig;
use crate::error::PlatformError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Publish,
    Fetch,
    Send,
    Verify,
}

impl RequestKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestKind::Publish => "publish",
            RequestKind::Fetch => "fetch",
            RequestKind::Send => "send",
            RequestKind::Verify => "verify",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Span {
    Minute,
    Hour,
}

impl Span {
    fn seconds(&self) -> i64 {
        match self {
            Span::Minute => 60,
            Span::Hour => 3600,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    org_id: String,
    account_id: i64,
    kind: RequestKind,
    span: Span,
    window_start: i64,
}

/// Floor a timestamp to the start of its window
fn window_start(timestamp: i64, span: Span) -> i64 {
    timestamp - timestamp.rem_euclid(span.seconds())
}

/// Drop windows that ended at or before `now`
fn prune_ended(counters: &mut HashMap<WindowKey, u32>, now: i64) {
    counters.retain(|key, _| key.window_start + key.span.seconds() > now);
}

pub struct RateLimiter {
    per_minute: u32,
    per_hour: u32,
    max_wait: Duration,
    counters: Mutex<HashMap<WindowKey, u32>>,
}

impl RateLimiter {
    pub fn new(config: &RateLimitConfig) -> Self {
        Self {
            per_minute: config.per_minute,
            per_hour: config.per_hour,
            max_wait: config.max_wait,
            counters: Mutex::new(HashMap::new()),
        }
    }

    fn counters(&self) -> MutexGuard<'_, HashMap<WindowKey, u32>> {
        // The map stays consistent even if a holder panicked
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Count one request at `now` if both windows have room.
    ///
    /// On refusal nothing is recorded and the number of seconds until the
    /// blocking window rolls over is returned.
    pub fn try_acquire(
        &self,
        org_id: &str,
        account_id: i64,
        kind: RequestKind,
        now: i64,
    ) -> Result<(), i64> {
        let mut counters = self.counters();
        prune_ended(&mut counters, now);
        let key = |span| WindowKey {
            org_id: org_id.to_string(),
            account_id,
            kind,
            span,
            window_start: window_start(now, span),
        };
        let minute_key = key(Span::Minute);
        let hour_key = key(Span::Hour);

        let hour_count = counters.get(&hour_key).copied().unwrap_or(0);
        if hour_count >= self.per_hour {
            return Err(hour_key.window_start + Span::Hour.seconds() - now);
        }
        let minute_count = counters.get(&minute_key).copied().unwrap_or(0);
        if minute_count >= self.per_minute {
            return Err(minute_key.window_start + Span::Minute.seconds() - now);
        }

        *counters.entry(minute_key).or_insert(0) += 1;
        *counters.entry(hour_key).or_insert(0) += 1;
        Ok(())
    }

    /// Wait for room in the windows, at most once and at most `max_wait`.
    pub async fn acquire(
        &self,
        org_id: &str,
        account_id: i64,
        kind: RequestKind,
    ) -> Result<(), PlatformError> {
        let now = chrono::Utc::now().timestamp();
        let wait_secs = match self.try_acquire(org_id, account_id, kind, now) {
            Ok(()) => return Ok(()),
            Err(wait_secs) => wait_secs,
        };

        let wait = Duration::from_secs(wait_secs.max(0) as u64);
        if wait > self.max_wait {
            return Err(PlatformError::RateLimit(format!(
                "local {} limit reached for account {}; window resets in {}s",
                kind.as_str(),
                account_id,
                wait_secs
            )));
        }

        tracing::debug!(
            account_id,
            kind = kind.as_str(),
            wait_secs,
            "Local rate limit reached, waiting for window to roll"
        );
        tokio::time::sleep(wait).await;

        let now = chrono::Utc::now().timestamp();
        self.try_acquire(org_id, account_id, kind, now)
            .map_err(|retry_in| {
                PlatformError::RateLimit(format!(
                    "local {} limit still reached for account {}; retry in {}s",
                    kind.as_str(),
                    account_id,
                    retry_in
                ))
            })
    }

    #[cfg(test)]
    fn window_count(&self) -> usize {
        self.counters().len()
    }
}
