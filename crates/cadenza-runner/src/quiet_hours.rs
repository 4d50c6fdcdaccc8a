// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Quiet-hour window evaluation.
//!
//! A window is two wall-clock times interpreted in a named zone; an end
//! before the start marks an overnight window (e.g. 22:00-08:00). Zone
//! resolution order: recipient attribute `timezone`, then the campaign
//! default, then UTC. Unparseable zones fall through to the next candidate.

use cadenza_core::types::{Campaign, Recipient};
use chrono::{DateTime, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;

/// A wall-clock quiet window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuietWindow {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl QuietWindow {
    /// Whether the window spans midnight.
    pub fn overnight(&self) -> bool {
        self.end < self.start
    }
}

/// The campaign's configured quiet window, if both bounds are set.
pub fn campaign_quiet_window(campaign: &Campaign) -> Option<QuietWindow> {
    match (campaign.quiet_hours_start, campaign.quiet_hours_end) {
        (Some(start), Some(end)) => Some(QuietWindow { start, end }),
        _ => None,
    }
}

/// Resolves the zone for quiet-hour checks: recipient -> campaign -> UTC.
pub fn resolve_zone(recipient: Option<&Recipient>, campaign: &Campaign) -> Tz {
    recipient
        .and_then(|r| r.attributes.get("timezone"))
        .and_then(|v| v.as_str())
        .and_then(|s| s.parse::<Tz>().ok())
        .or_else(|| campaign.quiet_tz.parse::<Tz>().ok())
        .unwrap_or(chrono_tz::UTC)
}

/// Whether `now` falls inside the window in the given zone.
///
/// The start bound is inclusive and the end bound exclusive, so an attempt
/// at exactly the end instant is admitted.
pub fn in_quiet_window(window: &QuietWindow, tz: Tz, now_utc: DateTime<Utc>) -> bool {
    let t = now_utc.with_timezone(&tz).time();
    if window.overnight() {
        t >= window.start || t < window.end
    } else {
        t >= window.start && t < window.end
    }
}

/// The next instant at which dispatch is allowed again.
///
/// Only meaningful while inside the window: the upcoming window end in the
/// given zone, mapped back to UTC. DST gaps resolve to the first valid
/// instant after the nominal end.
pub fn next_allowed(window: &QuietWindow, tz: Tz, now_utc: DateTime<Utc>) -> DateTime<Utc> {
    let local = now_utc.with_timezone(&tz);
    let date = if local.time() < window.end {
        local.date_naive()
    } else {
        local
            .date_naive()
            .succ_opt()
            .unwrap_or_else(|| local.date_naive())
    };
    let naive_end = date.and_time(window.end);

    tz.from_local_datetime(&naive_end)
        .earliest()
        .or_else(|| {
            tz.from_local_datetime(&(naive_end + TimeDelta::hours(1)))
                .earliest()
        })
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|| now_utc + TimeDelta::hours(1))
}
