// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The campaign orchestrator: trigger handling, resumable materialization,
//! completion detection, and the storage-failure escalation policy.
//!
//! One orchestrator task runs per in-flight campaign, guarded by a
//! single-flight registry so a second trigger observes the existing run.
//! Messages are driven by the worker pool; the orchestrator only watches
//! for completion.

use std::sync::Arc;
use std::time::Duration;

use cadenza_consent::ConsentService;
use cadenza_core::types::{Campaign, CampaignStatus};
use cadenza_core::{CadenzaError, Clock, ProviderClient, Scheduler};
use cadenza_ratelimit::RateLimiter;
use cadenza_segment::{Rule, SegmentEvaluator};
use cadenza_storage::{NewAudit, Store};
use dashmap::DashMap;
use serde_json::json;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::pipeline;

/// Consecutive storage failures after which a campaign is failed.
const STORAGE_FAILURE_LIMIT: u32 = 5;

/// Orchestrator tuning knobs.
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// Worker pool size.
    pub workers: usize,
    /// Recipients materialized per committed cursor step.
    pub page_size: usize,
    /// Transient dispatch retries before a message fails.
    pub max_transient_retries: u32,
    /// Worker queue capacity.
    pub queue_capacity: usize,
    /// Completion poll interval for running campaigns.
    pub completion_poll: Duration,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            page_size: 100,
            max_transient_retries: 3,
            queue_capacity: 1024,
            completion_poll: Duration::from_secs(1),
        }
    }
}

/// Outcome of a trigger call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerOutcome {
    pub status: CampaignStatus,
    /// Run token; concurrent triggers of a running campaign observe the
    /// same token.
    pub task_id: String,
}

/// Drives campaigns through materialization and the compliance pipeline.
#[derive(Clone)]
pub struct Orchestrator {
    store: Store,
    consent: ConsentService,
    evaluator: SegmentEvaluator,
    limiter: Arc<RateLimiter>,
    provider: Arc<dyn ProviderClient>,
    clock: Arc<dyn Clock>,
    scheduler: Arc<dyn Scheduler>,
    jobs: mpsc::Sender<String>,
    running: Arc<DashMap<i64, String>>,
    storage_failures: Arc<DashMap<i64, u32>>,
    config: Arc<RunnerConfig>,
}

impl Orchestrator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Store,
        consent: ConsentService,
        evaluator: SegmentEvaluator,
        limiter: Arc<RateLimiter>,
        provider: Arc<dyn ProviderClient>,
        clock: Arc<dyn Clock>,
        scheduler: Arc<dyn Scheduler>,
        jobs: mpsc::Sender<String>,
        config: RunnerConfig,
    ) -> Self {
        Self {
            store,
            consent,
            evaluator,
            limiter,
            provider,
            clock,
            scheduler,
            jobs,
            running: Arc::new(DashMap::new()),
            storage_failures: Arc::new(DashMap::new()),
            config: Arc::new(config),
        }
    }

    pub(crate) fn store(&self) -> &Store {
        &self.store
    }

    pub(crate) fn consent(&self) -> &ConsentService {
        &self.consent
    }

    pub(crate) fn limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    pub(crate) fn provider(&self) -> &dyn ProviderClient {
        self.provider.as_ref()
    }

    pub(crate) fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    pub(crate) fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    pub(crate) fn config(&self) -> &RunnerConfig {
        &self.config
    }

    /// Explicit campaign trigger.
    ///
    /// DRAFT campaigns advance to READY; READY campaigns with no pending
    /// schedule start immediately; a RUNNING campaign resumes (crash
    /// recovery) or, when its run is live, returns the existing run token.
    pub async fn trigger(&self, campaign_id: i64) -> Result<TriggerOutcome, CadenzaError> {
        if let Some(existing) = self.running.get(&campaign_id) {
            return Ok(TriggerOutcome {
                status: CampaignStatus::Running,
                task_id: existing.value().clone(),
            });
        }

        let campaign = self.require_campaign(campaign_id).await?;
        let now = self.clock.now_utc();

        match campaign.status {
            CampaignStatus::Draft => {
                self.store
                    .transition_campaign(campaign_id, CampaignStatus::Draft, CampaignStatus::Ready, now)
                    .await?;
                if scheduled_for_later(&campaign, now) {
                    info!(campaign_id, "campaign readied, awaiting schedule time");
                    return Ok(TriggerOutcome {
                        status: CampaignStatus::Ready,
                        task_id: uuid::Uuid::new_v4().to_string(),
                    });
                }
                self.start_run(campaign_id).await
            }
            CampaignStatus::Ready => {
                if scheduled_for_later(&campaign, now) {
                    return Ok(TriggerOutcome {
                        status: CampaignStatus::Ready,
                        task_id: uuid::Uuid::new_v4().to_string(),
                    });
                }
                self.start_run(campaign_id).await
            }
            CampaignStatus::Running => self.start_run(campaign_id).await,
            CampaignStatus::Paused => Err(CadenzaError::Validation(format!(
                "campaign {campaign_id} is paused; resume it instead"
            ))),
            status @ (CampaignStatus::Completed | CampaignStatus::Failed) => Err(
                CadenzaError::Validation(format!("campaign {campaign_id} is {status}")),
            ),
        }
    }

    /// Stops scheduling new pipeline stages; in-flight dispatches complete
    /// and QUEUED messages wait for resume.
    pub async fn pause(&self, campaign_id: i64) -> Result<(), CadenzaError> {
        let now = self.clock.now_utc();
        let paused = self
            .store
            .transition_campaign(campaign_id, CampaignStatus::Running, CampaignStatus::Paused, now)
            .await?;
        if !paused {
            return Err(CadenzaError::Validation(format!(
                "campaign {campaign_id} is not running"
            )));
        }
        info!(campaign_id, "campaign paused");
        Ok(())
    }

    /// Resumes a paused campaign and restarts its orchestrator task.
    pub async fn resume(&self, campaign_id: i64) -> Result<TriggerOutcome, CadenzaError> {
        let now = self.clock.now_utc();
        let resumed = self
            .store
            .transition_campaign(campaign_id, CampaignStatus::Paused, CampaignStatus::Running, now)
            .await?;
        if !resumed {
            return Err(CadenzaError::Validation(format!(
                "campaign {campaign_id} is not paused"
            )));
        }
        info!(campaign_id, "campaign resumed");
        self.start_run(campaign_id).await
    }

    /// Restarts orchestrator tasks for campaigns left RUNNING by a previous
    /// process (crash recovery). Returns how many were resumed.
    pub async fn recover(&self) -> Result<usize, CadenzaError> {
        let running = self.store.campaigns_in_status(CampaignStatus::Running).await?;
        for campaign in &running {
            info!(campaign_id = campaign.id, "resuming interrupted campaign");
            if let Err(e) = self.start_run(campaign.id).await {
                warn!(campaign_id = campaign.id, error = %e, "failed to resume campaign");
            }
        }
        Ok(running.len())
    }

    /// Worker entry point for one message job.
    pub async fn process_message(&self, message_id: &str) -> Result<(), CadenzaError> {
        match pipeline::run_message(self, message_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                if matches!(e, CadenzaError::Storage { .. }) {
                    if let Ok(Some(message)) = self.store.get_message(message_id).await {
                        self.note_storage_failure(message.campaign_id).await;
                    }
                }
                Err(e)
            }
        }
    }

    /// Single-flight run start. The campaign must be READY (it is moved to
    /// RUNNING here) or already RUNNING.
    async fn start_run(&self, campaign_id: i64) -> Result<TriggerOutcome, CadenzaError> {
        let token = uuid::Uuid::new_v4().to_string();
        match self.running.entry(campaign_id) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                return Ok(TriggerOutcome {
                    status: CampaignStatus::Running,
                    task_id: existing.get().clone(),
                });
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(token.clone());
            }
        }

        let now = self.clock.now_utc();
        let campaign = match self.require_campaign(campaign_id).await {
            Ok(c) => c,
            Err(e) => {
                self.running.remove(&campaign_id);
                return Err(e);
            }
        };
        if campaign.status == CampaignStatus::Ready {
            let started = self
                .store
                .transition_campaign(campaign_id, CampaignStatus::Ready, CampaignStatus::Running, now)
                .await;
            match started {
                Ok(true) => {}
                Ok(false) => {
                    // Someone else moved it; fall through only if RUNNING now.
                    let current = self.require_campaign(campaign_id).await?;
                    if current.status != CampaignStatus::Running {
                        self.running.remove(&campaign_id);
                        return Err(CadenzaError::Validation(format!(
                            "campaign {campaign_id} is {}",
                            current.status
                        )));
                    }
                }
                Err(e) => {
                    self.running.remove(&campaign_id);
                    return Err(e);
                }
            }
        } else if campaign.status != CampaignStatus::Running {
            self.running.remove(&campaign_id);
            return Err(CadenzaError::Validation(format!(
                "campaign {campaign_id} is {}",
                campaign.status
            )));
        }

        let orchestrator = self.clone();
        let run_token = token.clone();
        tokio::spawn(async move {
            orchestrator.run_campaign(campaign_id, run_token).await;
        });

        info!(campaign_id, task_id = token.as_str(), "campaign run started");
        Ok(TriggerOutcome {
            status: CampaignStatus::Running,
            task_id: token,
        })
    }

    /// The per-campaign orchestrator task.
    async fn run_campaign(self, campaign_id: i64, token: String) {
        let result = self.drive_campaign(campaign_id).await;
        if let Err(e) = result {
            error!(campaign_id, error = %e, "campaign run aborted");
            let now = self.clock.now_utc();
            let failed = self
                .store
                .transition_campaign(campaign_id, CampaignStatus::Running, CampaignStatus::Failed, now)
                .await;
            if matches!(failed, Ok(true)) {
                let _ = self
                    .store
                    .append_audit(
                        NewAudit {
                            kind: "campaign_failed".into(),
                            campaign_id: Some(campaign_id),
                            message_id: None,
                            recipient_phone: None,
                            detail: json!({"error": e.to_string()}),
                        },
                        now,
                    )
                    .await;
            }
        }
        self.running.remove(&campaign_id);
        debug!(campaign_id, task_id = token.as_str(), "campaign run finished");
    }

    async fn drive_campaign(&self, campaign_id: i64) -> Result<(), CadenzaError> {
        self.materialize(campaign_id).await?;

        // Fill the worker queue with everything QUEUED (fresh rows and
        // leftovers from a previous process).
        let queued = self.store.list_queued_message_ids(campaign_id).await?;
        info!(campaign_id, queued = queued.len(), "enqueueing messages");
        for message_id in queued {
            if self.jobs.send(message_id).await.is_err() {
                warn!(campaign_id, "worker queue closed during enqueue");
                return Ok(());
            }
        }

        // Completion watch: drain + every message settled.
        loop {
            tokio::time::sleep(self.config.completion_poll).await;

            let campaign = match self.store.get_campaign(campaign_id).await? {
                Some(c) => c,
                None => return Ok(()),
            };
            match campaign.status {
                CampaignStatus::Running => {
                    if campaign.materialized_at.is_some()
                        && self.store.count_unsettled_messages(campaign_id).await? == 0
                    {
                        let now = self.clock.now_utc();
                        let completed = self
                            .store
                            .transition_campaign(
                                campaign_id,
                                CampaignStatus::Running,
                                CampaignStatus::Completed,
                                now,
                            )
                            .await?;
                        if completed {
                            info!(campaign_id, "campaign completed");
                            self.store
                                .append_audit(
                                    NewAudit {
                                        kind: "campaign_completed".into(),
                                        campaign_id: Some(campaign_id),
                                        message_id: None,
                                        recipient_phone: None,
                                        detail: json!({}),
                                    },
                                    now,
                                )
                                .await?;
                        }
                        return Ok(());
                    }
                }
                // Pause releases the run; resume starts a new one.
                CampaignStatus::Paused => {
                    info!(campaign_id, "campaign run parked by pause");
                    return Ok(());
                }
                _ => return Ok(()),
            }
        }
    }

    /// Cursor-resumable materialization: renders and creates QUEUED message
    /// rows for every recipient in the segment stream.
    async fn materialize(&self, campaign_id: i64) -> Result<(), CadenzaError> {
        let campaign = self.require_campaign(campaign_id).await?;
        if campaign.materialized_at.is_some() {
            debug!(campaign_id, "materialization already drained");
            return Ok(());
        }

        let template = self
            .store
            .get_template(campaign.template_id)
            .await?
            .ok_or_else(|| {
                CadenzaError::Validation(format!(
                    "campaign {campaign_id} references unknown template {}",
                    campaign.template_id
                ))
            })?;
        let rule = match campaign.segment_id {
            Some(segment_id) => {
                let segment = self.store.get_segment(segment_id).await?.ok_or_else(|| {
                    CadenzaError::Validation(format!(
                        "campaign {campaign_id} references unknown segment {segment_id}"
                    ))
                })?;
                Rule::parse(&segment.definition)?
            }
            None => Rule::match_all(),
        };

        let mut cursor = campaign.materialize_cursor.clone();
        let mut created = 0usize;
        let mut skipped = 0usize;

        loop {
            // A pause or failure mid-materialization stops the loop; the
            // cursor keeps the progress.
            let current = self.require_campaign(campaign_id).await?;
            if current.status != CampaignStatus::Running {
                info!(campaign_id, status = %current.status, "materialization interrupted");
                return Ok(());
            }

            let page = self
                .evaluator
                .page(&rule, cursor.as_deref(), self.config.page_size)
                .await?;
            let now = self.clock.now_utc();

            for recipient in &page.recipients {
                match cadenza_template::render(
                    &template.content,
                    &template.variables,
                    &recipient.attributes,
                ) {
                    Ok(content) => {
                        let message_id = uuid::Uuid::new_v4().to_string();
                        let was_new = self
                            .store
                            .create_message(&message_id, campaign_id, &recipient.phone, &content, now)
                            .await?;
                        if was_new {
                            created += 1;
                        }
                    }
                    Err(missing) => {
                        skipped += 1;
                        self.store
                            .append_audit(
                                NewAudit {
                                    kind: "materialize_skip".into(),
                                    campaign_id: Some(campaign_id),
                                    message_id: None,
                                    recipient_phone: Some(recipient.phone.clone()),
                                    detail: json!({"missing_variables": missing.missing}),
                                },
                                now,
                            )
                            .await?;
                    }
                }
            }

            match page.next_cursor {
                Some(next) => {
                    self.store
                        .set_campaign_cursor(campaign_id, Some(next.clone()), now)
                        .await?;
                    cursor = Some(next);
                }
                None => {
                    self.store.mark_campaign_materialized(campaign_id, now).await?;
                    info!(campaign_id, created, skipped, "materialization drained");
                    return Ok(());
                }
            }
        }
    }

    async fn require_campaign(&self, campaign_id: i64) -> Result<Campaign, CadenzaError> {
        self.store
            .get_campaign(campaign_id)
            .await?
            .ok_or_else(|| CadenzaError::Validation(format!("unknown campaign {campaign_id}")))
    }

    async fn note_storage_failure(&self, campaign_id: i64) {
        let failures = {
            let mut entry = self.storage_failures.entry(campaign_id).or_insert(0);
            *entry += 1;
            *entry
        };
        if failures != STORAGE_FAILURE_LIMIT {
            return;
        }
        error!(campaign_id, failures, "repeated storage failures, failing campaign");
        let now = self.clock.now_utc();
        let paused = self
            .store
            .transition_campaign(campaign_id, CampaignStatus::Running, CampaignStatus::Paused, now)
            .await
            .unwrap_or(false);
        if paused {
            let _ = self
                .store
                .transition_campaign(campaign_id, CampaignStatus::Paused, CampaignStatus::Failed, now)
                .await;
        }
    }
}

fn scheduled_for_later(campaign: &Campaign, now: chrono::DateTime<chrono::Utc>) -> bool {
    campaign.schedule_time.is_some_and(|at| at > now)
}
