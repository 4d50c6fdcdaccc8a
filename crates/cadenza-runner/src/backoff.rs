// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Retry backoff for transient dispatch failures.

use std::time::Duration;

use rand::Rng;

/// Backoff before transient retry `k` (1-based):
/// `min(60 * 2^(k-1), 3600)` seconds with +/-20% jitter.
pub fn backoff(retry: u32) -> Duration {
    let exponent = retry.saturating_sub(1).min(6);
    let base_secs = 60u64.saturating_mul(1u64 << exponent).min(3600);
    let jitter = 0.8 + 0.4 * rand::rng().random::<f64>();
    Duration::from_secs_f64(base_secs as f64 * jitter)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds(retry: u32) -> (Duration, Duration) {
        let base = match retry {
            1 => 60u64,
            2 => 120,
            3 => 240,
            _ => 3600.min(60 * 2u64.pow(retry - 1)),
        };
        (
            Duration::from_secs_f64(base as f64 * 0.8),
            Duration::from_secs_f64(base as f64 * 1.2),
        )
    }

    #[test]
    fn doubles_within_jitter_bounds() {
        for retry in 1..=4 {
            let (lo, hi) = bounds(retry);
            for _ in 0..50 {
                let d = backoff(retry);
                assert!(d >= lo && d <= hi, "retry {retry}: {d:?} outside [{lo:?}, {hi:?}]");
            }
        }
    }

    #[test]
    fn caps_at_one_hour_before_jitter() {
        let (lo, hi) = (
            Duration::from_secs_f64(3600.0 * 0.8),
            Duration::from_secs_f64(3600.0 * 1.2),
        );
        for retry in [7, 10, 30] {
            let d = backoff(retry);
            assert!(d >= lo && d <= hi, "retry {retry}: {d:?}");
        }
    }
}
