// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Tokio-backed delayed re-enqueue of message jobs.

use std::time::Duration;

use cadenza_core::Scheduler;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Sleeps on the tokio timer, then pushes the message id back onto the
/// worker queue. Delivery is at-least-once; the status CAS absorbs
/// duplicates.
pub struct TokioScheduler {
    jobs: mpsc::Sender<String>,
    cancel: CancellationToken,
}

impl TokioScheduler {
    pub fn new(jobs: mpsc::Sender<String>, cancel: CancellationToken) -> Self {
        Self { jobs, cancel }
    }
}

impl Scheduler for TokioScheduler {
    fn delay(&self, message_id: &str, delay: Duration) {
        let jobs = self.jobs.clone();
        let cancel = self.cancel.clone();
        let message_id = message_id.to_string();
        debug!(message_id = message_id.as_str(), ?delay, "delaying message job");

        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(delay) => {
                    if jobs.send(message_id.clone()).await.is_err() {
                        // Worker queue is gone; the message stays QUEUED and
                        // is picked up on the next start.
                        warn!(message_id = message_id.as_str(), "worker queue closed, dropping delayed job");
                    }
                }
                _ = cancel.cancelled() => {
                    debug!(message_id = message_id.as_str(), "delayed job cancelled by shutdown");
                }
            }
        });
    }
}
