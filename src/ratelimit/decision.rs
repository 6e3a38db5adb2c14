//! Fixed-window admission decisions.
//!
//! Each client owns a counter that opens a window on its first request and
//! counts every request until the window closes. The window closes
//! `policy.window` after it opened; the next request after that starts a
//! fresh window. This admits bursts of up to twice the limit across a window
//! boundary, which is accepted in exchange for O(1) state per client.

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::error::{FloodgateError, Result};

/// How many requests a client may make per window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Policy {
    limit: u64,
    window: Duration,
    window_delta: chrono::Duration,
}

impl Policy {
    /// Create a policy, rejecting a zero limit or a zero-length window.
    pub fn new(limit: u64, window: Duration) -> Result<Self> {
        if limit == 0 {
            return Err(FloodgateError::Config(
                "rate limit must allow at least one request per window".to_string(),
            ));
        }
        if window.is_zero() {
            return Err(FloodgateError::Config(
                "rate limit window must be longer than zero".to_string(),
            ));
        }
        let window_delta = chrono::Duration::from_std(window).map_err(|_| {
            FloodgateError::Config(format!("rate limit window {:?} is out of range", window))
        })?;

        Ok(Self {
            limit,
            window,
            window_delta,
        })
    }

    /// Maximum requests admitted per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Length of each window.
    pub fn window(&self) -> Duration {
        self.window
    }

    pub(crate) fn window_delta(&self) -> chrono::Duration {
        self.window_delta
    }
}

/// Mutable per-client counter state.
#[derive(Debug, Clone)]
pub struct CounterEntry {
    /// Requests seen in the current window
    pub count: u64,
    /// When the current window opened
    pub window_start: DateTime<Utc>,
    /// Set once the entry has been dropped from the store
    pub(crate) evicted: bool,
}

impl CounterEntry {
    /// A counter with an empty window opening at `now`.
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            count: 0,
            window_start: now,
            evicted: false,
        }
    }

    /// Whether the window has closed as of `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, policy: &Policy) -> bool {
        now.signed_duration_since(self.window_start) >= policy.window_delta()
    }

    /// Whether the window closed more than one full window before `now`.
    pub fn is_expired(&self, now: DateTime<Utc>, policy: &Policy) -> bool {
        let age = now.signed_duration_since(self.window_start);
        match policy.window_delta().checked_add(&policy.window_delta()) {
            Some(two_windows) => age > two_windows,
            None => false,
        }
    }
}

/// Outcome of one admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request may proceed
    pub allowed: bool,
    /// The policy limit the decision was made against
    pub limit: u64,
    /// Requests left in the current window, never negative
    pub remaining: u64,
    /// When the current window closes
    pub reset_at: DateTime<Utc>,
}

impl Decision {
    /// The reset time as Unix epoch seconds.
    pub fn reset_timestamp(&self) -> i64 {
        self.reset_at.timestamp()
    }

    /// Whole seconds a denied caller should wait, rounded up and at least one.
    pub fn retry_after(&self, now: DateTime<Utc>) -> u64 {
        let wait = self.reset_at.signed_duration_since(now);
        let millis = wait.num_milliseconds().max(0) as u64;
        millis.div_ceil(1000).max(1)
    }
}

/// Record one request against `entry` and decide whether to admit it.
///
/// A stale window is reset before the increment, never carried over.
/// Counter overflow or an unrepresentable reset time is reported as a
/// store fault rather than an admission.
pub fn decide(entry: &mut CounterEntry, now: DateTime<Utc>, policy: &Policy) -> Result<Decision> {
    if entry.is_stale(now, policy) {
        entry.count = 0;
        entry.window_start = now;
    }

    entry.count = entry
        .count
        .checked_add(1)
        .ok_or_else(|| FloodgateError::Store("request counter overflowed".to_string()))?;

    let reset_at = entry
        .window_start
        .checked_add_signed(policy.window_delta())
        .ok_or_else(|| FloodgateError::Store("window reset time out of range".to_string()))?;

    Ok(Decision {
        allowed: entry.count <= policy.limit(),
        limit: policy.limit(),
        remaining: policy.limit().saturating_sub(entry.count),
        reset_at,
    })
}
