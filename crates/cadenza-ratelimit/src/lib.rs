// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Sliding-window rate limiter keyed by campaign id.
//!
//! Each key tracks the admission instants of the last second. The
//! check-and-insert is atomic per key (the map's entry guard), so concurrent
//! workers of one campaign cannot overshoot the limit. Keys idle for two
//! seconds are evicted.

use std::collections::VecDeque;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;

/// Idle seconds after which a key's window is dropped.
const KEY_TTL_SECS: i64 = 2;

/// Result of an admission attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Admission {
    pub admitted: bool,
    /// When not admitted: how long until the oldest admission leaves the
    /// window.
    pub retry_after: Option<Duration>,
}

#[derive(Debug)]
struct Window {
    admitted: VecDeque<DateTime<Utc>>,
    last_touch: DateTime<Utc>,
}

/// In-process sliding-window counter over a concurrent keyed map.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: DashMap<i64, Window>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attempts to admit one dispatch for `campaign_id` at `now`.
    ///
    /// Evicts admissions older than one second, admits and records `now`
    /// when the window has room, and otherwise reports when the oldest
    /// admission expires.
    pub fn try_acquire(
        &self,
        campaign_id: i64,
        limit_per_second: u32,
        now: DateTime<Utc>,
    ) -> Admission {
        self.evict_idle(now);

        let mut entry = self.windows.entry(campaign_id).or_insert_with(|| Window {
            admitted: VecDeque::new(),
            last_touch: now,
        });
        let window = entry.value_mut();
        window.last_touch = now;

        let cutoff = now - TimeDelta::seconds(1);
        while window.admitted.front().is_some_and(|t| *t <= cutoff) {
            window.admitted.pop_front();
        }

        if window.admitted.len() < limit_per_second as usize {
            window.admitted.push_back(now);
            return Admission {
                admitted: true,
                retry_after: None,
            };
        }

        let oldest = *window.admitted.front().expect("window is full");
        let retry_after = (oldest + TimeDelta::seconds(1) - now)
            .to_std()
            .unwrap_or(Duration::ZERO);
        Admission {
            admitted: false,
            retry_after: Some(retry_after),
        }
    }

    /// Number of live keys (for tests and introspection).
    pub fn key_count(&self) -> usize {
        self.windows.len()
    }

    fn evict_idle(&self, now: DateTime<Utc>) {
        self.windows
            .retain(|_, w| now - w.last_touch < TimeDelta::seconds(KEY_TTL_SECS));
    }
}
