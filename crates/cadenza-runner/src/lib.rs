// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaign orchestration for the Cadenza messaging engine.
//!
//! Wires the orchestrator, its worker pool, the tokio-backed scheduler, and
//! the periodic scan that starts scheduled campaigns.

pub mod backoff;
pub mod orchestrator;
pub(crate) mod pipeline;
pub mod quiet_hours;
pub mod scheduler;
#[cfg(test)]
pub(crate) mod test_support;
pub mod worker;

use std::sync::Arc;
use std::time::Duration;

use cadenza_consent::ConsentService;
use cadenza_core::{Clock, ProviderClient, Scheduler};
use cadenza_ratelimit::RateLimiter;
use cadenza_segment::SegmentEvaluator;
use cadenza_storage::Store;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::warn;

pub use orchestrator::{Orchestrator, RunnerConfig, TriggerOutcome};
pub use scheduler::TokioScheduler;

/// Builds the orchestrator and spawns its worker pool.
///
/// The returned orchestrator is cheap to clone and shared with the gateway.
#[allow(clippy::too_many_arguments)]
pub fn start_runner(
    store: Store,
    consent: ConsentService,
    evaluator: SegmentEvaluator,
    limiter: Arc<RateLimiter>,
    provider: Arc<dyn ProviderClient>,
    clock: Arc<dyn Clock>,
    config: RunnerConfig,
    cancel: CancellationToken,
) -> Orchestrator {
    let (jobs_tx, jobs_rx) = mpsc::channel(config.queue_capacity);
    let scheduler: Arc<dyn Scheduler> =
        Arc::new(TokioScheduler::new(jobs_tx.clone(), cancel.clone()));
    let workers = config.workers;
    let orchestrator = Orchestrator::new(
        store, consent, evaluator, limiter, provider, clock, scheduler, jobs_tx, config,
    );
    worker::spawn_workers(orchestrator.clone(), jobs_rx, cancel, workers);
    orchestrator
}

/// Periodically starts READY campaigns whose schedule time has passed.
pub fn spawn_schedule_loop(
    orchestrator: Orchestrator,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // Skip the immediate first tick.
        ticker.tick().await;
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let now = orchestrator.clock().now_utc();
                    match orchestrator.store().campaigns_due_for_start(now).await {
                        Ok(due) => {
                            for campaign in due {
                                if let Err(e) = orchestrator.trigger(campaign.id).await {
                                    warn!(campaign_id = campaign.id, error = %e, "scheduled start failed");
                                }
                            }
                        }
                        Err(e) => warn!(error = %e, "scheduled campaign scan failed"),
                    }
                }
                _ = cancel.cancelled() => break,
            }
        }
    })
}
