// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The cooperative worker pool draining message jobs.

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::orchestrator::Orchestrator;

/// Spawns `count` workers sharing one job queue. Workers exit when the
/// cancellation token fires or the queue closes; messages still QUEUED at
/// that point resume on the next start.
pub fn spawn_workers(
    orchestrator: Orchestrator,
    jobs: mpsc::Receiver<String>,
    cancel: CancellationToken,
    count: usize,
) -> Vec<JoinHandle<()>> {
    let jobs = Arc::new(Mutex::new(jobs));
    (0..count)
        .map(|worker| {
            let orchestrator = orchestrator.clone();
            let jobs = jobs.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                loop {
                    let job = {
                        let mut queue = jobs.lock().await;
                        tokio::select! {
                            _ = cancel.cancelled() => None,
                            job = queue.recv() => job,
                        }
                    };
                    let Some(message_id) = job else { break };
                    if let Err(e) = orchestrator.process_message(&message_id).await {
                        warn!(worker, message_id = message_id.as_str(), error = %e, "message job failed");
                    }
                }
                debug!(worker, "worker stopped");
            })
        })
        .collect()
}
