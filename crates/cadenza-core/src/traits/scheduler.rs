// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Delayed-task primitive for retries and quiet-hour reschedules.

use std::time::Duration;

/// Schedules a message job to run again after a delay.
///
/// Delivery is at-least-once: duplicate invocations are harmless because
/// every message transition is guarded by a compare-and-set on status.
pub trait Scheduler: Send + Sync + 'static {
    /// Re-enqueue the message identified by `message_id` after `delay`.
    fn delay(&self, message_id: &str, delay: Duration);
}
