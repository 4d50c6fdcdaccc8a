// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end test harness.
//!
//! Assembles the full stack (temp SQLite store, consent, segments, rate
//! limiter, mock provider, orchestrator with workers, ingestor) so tests
//! can drive webhooks and campaigns exactly the way production does.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use cadenza_consent::ConsentService;
use cadenza_core::types::{AttributeMap, CampaignStatus, ConsentState};
use cadenza_core::{CadenzaError, SystemClock};
use cadenza_ingest::WebhookIngestor;
use cadenza_ratelimit::RateLimiter;
use cadenza_runner::{start_runner, Orchestrator, RunnerConfig};
use cadenza_segment::SegmentEvaluator;
use cadenza_storage::{NewCampaign, NewTemplate, Store};
use chrono::Utc;
use tokio_util::sync::CancellationToken;

use crate::mock_provider::MockProvider;

/// Builder for the harness.
pub struct TestHarnessBuilder {
    workers: usize,
}

impl TestHarnessBuilder {
    fn new() -> Self {
        Self { workers: 4 }
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub async fn build(self) -> Result<TestHarness, CadenzaError> {
        let temp_dir = tempfile::TempDir::new().map_err(CadenzaError::storage)?;
        let db_path = temp_dir.path().join("harness.db");
        let store = Store::open(db_path.to_string_lossy().as_ref()).await?;

        let provider = Arc::new(MockProvider::new());
        let clock = Arc::new(SystemClock);
        let consent = ConsentService::new(store.clone());
        let cancel = CancellationToken::new();

        let orchestrator = start_runner(
            store.clone(),
            consent.clone(),
            SegmentEvaluator::new(store.clone()),
            Arc::new(RateLimiter::new()),
            provider.clone(),
            clock.clone(),
            RunnerConfig {
                workers: self.workers,
                completion_poll: Duration::from_millis(25),
                ..RunnerConfig::default()
            },
            cancel.clone(),
        );
        let ingestor = Arc::new(WebhookIngestor::new(store.clone(), consent, clock));

        Ok(TestHarness {
            store,
            orchestrator,
            ingestor,
            provider,
            cancel,
            _temp_dir: temp_dir,
        })
    }
}

/// A complete stack over a temp database.
pub struct TestHarness {
    pub store: Store,
    pub orchestrator: Orchestrator,
    pub ingestor: Arc<WebhookIngestor>,
    pub provider: Arc<MockProvider>,
    cancel: CancellationToken,
    _temp_dir: tempfile::TempDir,
}

impl Drop for TestHarness {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

impl TestHarness {
    pub fn builder() -> TestHarnessBuilder {
        TestHarnessBuilder::new()
    }

    /// Seed a recipient with string attributes.
    pub async fn seed_recipient(
        &self,
        phone: &str,
        attrs: &[(&str, &str)],
        consent: ConsentState,
    ) -> Result<(), CadenzaError> {
        let attributes: AttributeMap = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), serde_json::Value::from(*v)))
            .collect();
        self.store
            .upsert_recipient(phone, attributes, consent, Utc::now())
            .await?;
        Ok(())
    }

    pub async fn seed_template(
        &self,
        name: &str,
        content: &str,
        variables: &[&str],
    ) -> Result<i64, CadenzaError> {
        self.store
            .insert_template(
                NewTemplate {
                    name: name.to_string(),
                    channel: "whatsapp".to_string(),
                    locale: "en_US".to_string(),
                    content: content.to_string(),
                    variables: variables.iter().map(|v| v.to_string()).collect(),
                },
                Utc::now(),
            )
            .await
    }

    pub async fn seed_segment(
        &self,
        name: &str,
        definition: serde_json::Value,
    ) -> Result<i64, CadenzaError> {
        self.store.insert_segment(name, definition, Utc::now()).await
    }

    /// Seed a DRAFT campaign with no quiet hours.
    pub async fn seed_campaign(
        &self,
        topic: &str,
        template_id: i64,
        segment_id: Option<i64>,
        rate_limit_per_second: u32,
    ) -> Result<i64, CadenzaError> {
        self.store
            .insert_campaign(
                NewCampaign {
                    topic: topic.to_string(),
                    template_id,
                    segment_id,
                    schedule_time: None,
                    rate_limit_per_second,
                    quiet_hours_start: None,
                    quiet_hours_end: None,
                    quiet_tz: "UTC".to_string(),
                },
                Utc::now(),
            )
            .await
    }

    /// Post a form-encoded inbound webhook the way the gateway would.
    pub async fn post_inbound(&self, fields: &[(&str, &str)]) -> Result<String, CadenzaError> {
        self.ingestor.process_inbound(&to_map(fields)).await
    }

    /// Post a form-encoded status callback the way the gateway would.
    pub async fn post_status(&self, fields: &[(&str, &str)]) -> Result<String, CadenzaError> {
        self.ingestor.process_status(&to_map(fields)).await
    }

    /// Trigger the campaign and wait for a terminal campaign status.
    ///
    /// Tolerates a campaign that already reached a terminal status between
    /// an earlier trigger and this call.
    pub async fn trigger_and_wait(
        &self,
        campaign_id: i64,
        timeout: Duration,
    ) -> Result<CampaignStatus, CadenzaError> {
        if let Err(trigger_error) = self.orchestrator.trigger(campaign_id).await {
            let campaign = self
                .store
                .get_campaign(campaign_id)
                .await?
                .ok_or(trigger_error)?;
            if !matches!(
                campaign.status,
                CampaignStatus::Completed | CampaignStatus::Failed
            ) {
                return Err(CadenzaError::Validation(format!(
                    "trigger failed with campaign in {}",
                    campaign.status
                )));
            }
            return Ok(campaign.status);
        }
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let campaign = self
                .store
                .get_campaign(campaign_id)
                .await?
                .ok_or_else(|| CadenzaError::Validation("campaign vanished".into()))?;
            if matches!(
                campaign.status,
                CampaignStatus::Completed | CampaignStatus::Failed
            ) {
                return Ok(campaign.status);
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(campaign.status);
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }
}

fn to_map(fields: &[(&str, &str)]) -> HashMap<String, String> {
    fields
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}
