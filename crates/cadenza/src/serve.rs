// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `cadenza serve` command implementation.
//!
//! Wires the store, rate limiter, provider adapter, ingestor, orchestrator
//! with its worker pool, the scheduled-campaign scan, and the HTTP gateway.
//! Shutdown is cooperative: on SIGTERM/SIGINT the gateway stops accepting
//! requests, workers drain in-flight dispatches up to the grace window, and
//! QUEUED messages resume on the next start.

use std::sync::Arc;
use std::time::{Duration, Instant};

use cadenza_config::CadenzaConfig;
use cadenza_consent::ConsentService;
use cadenza_core::{CadenzaError, Clock, ProviderClient, SystemClock};
use cadenza_gateway::{GatewayState, ServerConfig};
use cadenza_ingest::WebhookIngestor;
use cadenza_provider::HttpProviderClient;
use cadenza_ratelimit::RateLimiter;
use cadenza_runner::{spawn_schedule_loop, start_runner, RunnerConfig};
use cadenza_segment::SegmentEvaluator;
use cadenza_storage::Store;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Interval at which READY campaigns are checked against their schedule.
const SCHEDULE_SCAN_INTERVAL: Duration = Duration::from_secs(30);

/// Runs the `cadenza serve` command.
pub async fn run_serve(config: CadenzaConfig) -> Result<(), CadenzaError> {
    init_tracing(&config.log.level);
    info!("starting cadenza serve");

    // Storage (runs migrations on open).
    let store = Store::open(&config.store.dsn).await?;
    info!(dsn = config.store.dsn.as_str(), "store opened");

    // Rate limiter. Only the in-process backend exists; anything else in
    // config is accepted and mapped onto it.
    if config.ratelimiter.backend != "memory" {
        warn!(
            backend = config.ratelimiter.backend.as_str(),
            "unknown ratelimiter backend, using in-process memory"
        );
    }
    let limiter = Arc::new(RateLimiter::new());

    // Provider adapter.
    let provider: Arc<dyn ProviderClient> = {
        let client = HttpProviderClient::new(&config.provider).map_err(|e| {
            error!(error = %e, "failed to initialize provider client");
            eprintln!(
                "error: provider credentials required. Set provider.account_sid, \
                 provider.auth_token, and provider.sender_id via config or CADENZA_PROVIDER_* \
                 environment variables."
            );
            e
        })?;
        Arc::new(client)
    };

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let consent = ConsentService::new(store.clone());
    let cancel = install_signal_handler();

    // Orchestrator and worker pool.
    let orchestrator = start_runner(
        store.clone(),
        consent.clone(),
        SegmentEvaluator::new(store.clone()),
        limiter,
        provider,
        clock.clone(),
        RunnerConfig {
            workers: config.workers.count,
            ..RunnerConfig::default()
        },
        cancel.clone(),
    );
    info!(workers = config.workers.count, "worker pool started");

    // Crash recovery: campaigns left RUNNING resume from their cursor.
    let resumed = orchestrator.recover().await?;
    if resumed > 0 {
        info!(resumed, "resumed interrupted campaigns");
    }

    // Scheduled campaign scan.
    spawn_schedule_loop(orchestrator.clone(), SCHEDULE_SCAN_INTERVAL, cancel.clone());

    // HTTP gateway; serves until the cancellation token fires.
    let ingestor = Arc::new(WebhookIngestor::new(store.clone(), consent, clock));
    let state = GatewayState {
        ingestor,
        orchestrator,
        start_time: Instant::now(),
    };
    let server_config = ServerConfig {
        host: config.gateway.host.clone(),
        port: config.gateway.port,
    };
    cadenza_gateway::start_server(&server_config, state, cancel.clone()).await?;

    // Drain: wait for in-flight dispatches up to the grace window. Messages
    // still QUEUED stay put and resume on next start.
    drain(&store, Duration::from_secs(config.shutdown.grace_seconds)).await;

    store.close().await?;
    info!("cadenza serve shutdown complete");
    Ok(())
}

/// Waits until no message is mid-dispatch or the grace window elapses.
async fn drain(store: &Store, grace: Duration) {
    let deadline = tokio::time::Instant::now() + grace;
    loop {
        match store.count_sending_messages().await {
            Ok(0) => {
                info!("all in-flight messages drained");
                return;
            }
            Ok(in_flight) => {
                if tokio::time::Instant::now() >= deadline {
                    warn!(in_flight, "grace window elapsed with messages still in flight");
                    return;
                }
                debug!(in_flight, "waiting for in-flight messages");
            }
            Err(e) => {
                warn!(error = %e, "drain check failed");
                return;
            }
        }
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
}

/// Installs signal handlers for SIGTERM and SIGINT.
///
/// Returns a token that is cancelled when either signal is received.
fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{signal, SignalKind};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    info!("received SIGINT (Ctrl+C), initiating shutdown");
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, initiating shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, initiating shutdown");
        }

        token_clone.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("cadenza={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
