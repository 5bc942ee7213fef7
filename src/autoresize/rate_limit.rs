//! Rate limiting over the per-cluster resize event log.
//!
//! The limiter holds no state of its own: a decision is a function of the
//! event log, the expansion history stamped on the PVC, and the current
//! time. Only successful expansions inside the trailing 24 hour window count
//! against the budget.
//!
//! The PVC history is written in the same patch as the expansion, so it
//! survives a status write that fails after the PVC was already grown.

use chrono::{DateTime, Duration, SecondsFormat, Utc};

use super::volume::VolumeKey;
use crate::crd::{AutoResizeEvent, ResizeResult};

/// Lookback for counting successful expansions
pub const RATE_LIMIT_WINDOW_HOURS: i64 = 24;
/// Events older than this are dropped from the log
pub const EVENT_RETENTION_HOURS: i64 = 25;
/// Upper bound on the number of events kept in status. Successes inside the
/// rate limit window are kept even past the bound.
pub const MAX_EVENT_HISTORY: usize = 50;

pub fn format_timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

/// Remaining expansion budget for one volume
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Budget {
    Unlimited,
    Remaining(u32),
    Exhausted { used: usize, max: u32 },
}

impl Budget {
    pub fn allows(&self) -> bool {
        !matches!(self, Budget::Exhausted { .. })
    }

    /// Gauge value, -1 when unlimited
    pub fn remaining(&self) -> i64 {
        match self {
            Budget::Unlimited => -1,
            Budget::Remaining(n) => i64::from(*n),
            Budget::Exhausted { .. } => 0,
        }
    }
}

fn window_start(now: DateTime<Utc>) -> DateTime<Utc> {
    now - Duration::hours(RATE_LIMIT_WINDOW_HOURS)
}

fn in_window(e: &AutoResizeEvent, now: DateTime<Utc>) -> bool {
    e.result == ResizeResult::Success
        && parse_timestamp(&e.timestamp).is_some_and(|t| t > window_start(now))
}

/// Successful expansions of `key` within the trailing window ending at `now`
pub fn successes_in_window(events: &[AutoResizeEvent], key: &VolumeKey, now: DateTime<Utc>) -> usize {
    events.iter().filter(|e| key.matches(e) && in_window(e, now)).count()
}

/// Check the budget of `key`. `None` means unlimited.
///
/// `recorded` is the expansion history stamped on the volume's PVC. Both it
/// and the event log describe the same expansions, so the larger count wins.
pub fn check_budget(
    events: &[AutoResizeEvent],
    recorded: &[DateTime<Utc>],
    key: &VolumeKey,
    max_actions_per_day: Option<i32>,
    now: DateTime<Utc>,
) -> Budget {
    let Some(max) = max_actions_per_day else {
        return Budget::Unlimited;
    };
    let max = u32::try_from(max).unwrap_or(0);
    let stamped = recorded.iter().filter(|t| **t > window_start(now)).count();
    let used = successes_in_window(events, key, now).max(stamped);
    match u32::try_from(used) {
        Ok(used) if used < max => Budget::Remaining(max - used),
        _ => Budget::Exhausted { used, max },
    }
}

fn same_volume(a: &AutoResizeEvent, b: &AutoResizeEvent) -> bool {
    a.instance == b.instance && a.volume_type == b.volume_type && a.tablespace == b.tablespace
}

/// Append an event, keeping timestamps non-decreasing per volume, then prune
pub fn append_event(events: &mut Vec<AutoResizeEvent>, mut event: AutoResizeEvent, now: DateTime<Utc>) {
    let latest = events
        .iter()
        .filter(|e| same_volume(e, &event))
        .filter_map(|e| parse_timestamp(&e.timestamp))
        .max();
    let ts = parse_timestamp(&event.timestamp).unwrap_or(now);
    let ts = match latest {
        Some(latest) if latest > ts => latest,
        _ => ts,
    };
    event.timestamp = format_timestamp(ts);

    events.push(event);
    prune(events, now);
}

/// Drop expired or unreadable events, then enforce the size cap.
/// Blocked events go first, then successes that left the window. Successes
/// inside the window are never evicted.
pub fn prune(events: &mut Vec<AutoResizeEvent>, now: DateTime<Utc>) {
    let cutoff = now - Duration::hours(EVENT_RETENTION_HOURS);
    events.retain(|e| parse_timestamp(&e.timestamp).is_some_and(|t| t >= cutoff));

    while events.len() > MAX_EVENT_HISTORY {
        let victim = events
            .iter()
            .position(|e| e.result == ResizeResult::Blocked)
            .or_else(|| events.iter().position(|e| !in_window(e, now)));
        match victim {
            Some(i) => {
                events.remove(i);
            }
            None => break,
        }
    }
}

/// Parse the comma separated expansion history of a PVC annotation
pub fn parse_history(value: &str) -> Vec<DateTime<Utc>> {
    value
        .split(',')
        .filter_map(|t| parse_timestamp(t.trim()))
        .collect()
}

/// Add `at` to an expansion history, dropping entries outside the window
pub fn record_history(existing: Option<&str>, at: DateTime<Utc>) -> String {
    let mut history: Vec<_> = existing
        .map(parse_history)
        .unwrap_or_default()
        .into_iter()
        .filter(|t| *t > window_start(at))
        .collect();
    history.push(at);
    history.sort();
    history
        .into_iter()
        .map(format_timestamp)
        .collect::<Vec<_>>()
        .join(",")
}
