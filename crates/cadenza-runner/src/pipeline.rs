// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The six-stage compliance pipeline: consent, quiet hours, rate limit,
//! content, dispatch, audit.
//!
//! A stage either passes, terminates the message (FAILED), or defers it
//! (reschedule with no state change). The audit stage always runs, on every
//! path, and records the outcome of each stage that executed.

use cadenza_core::types::{Campaign, CampaignStatus, Message, MessageStatus};
use cadenza_core::CadenzaError;
use cadenza_storage::{NewAudit, TransitionUpdate};
use serde_json::json;
use tracing::{debug, info, warn};

use crate::backoff::backoff;
use crate::orchestrator::Orchestrator;
use crate::quiet_hours::{campaign_quiet_window, in_quiet_window, next_allowed, resolve_zone};

/// Per-stage outcomes collected for the audit record.
#[derive(Debug, Default)]
struct StageReport {
    stages: Vec<serde_json::Value>,
}

impl StageReport {
    fn push(&mut self, stage: &str, outcome: impl Into<String>) {
        self.stages
            .push(json!({"stage": stage, "outcome": outcome.into()}));
    }
}

/// Runs one QUEUED message through the pipeline.
///
/// Per-message failures never propagate: they terminate in the message row
/// and the audit trail. Only storage faults return an error.
pub(crate) async fn run_message(
    orchestrator: &Orchestrator,
    message_id: &str,
) -> Result<(), CadenzaError> {
    let Some(message) = orchestrator.store().get_message(message_id).await? else {
        debug!(message_id, "job references an unknown message");
        return Ok(());
    };
    if message.status != MessageStatus::Queued {
        // Duplicate scheduler delivery or a raced worker; guards make this a
        // no-op.
        debug!(message_id, status = %message.status, "skipping non-queued message");
        return Ok(());
    }
    let Some(campaign) = orchestrator.store().get_campaign(message.campaign_id).await? else {
        warn!(message_id, campaign_id = message.campaign_id, "message references an unknown campaign");
        return Ok(());
    };
    if campaign.status != CampaignStatus::Running {
        // PAUSED leaves the message QUEUED; resume re-enqueues it.
        debug!(message_id, campaign_status = %campaign.status, "campaign is not running");
        return Ok(());
    }

    let mut report = StageReport::default();
    let result = run_stages(orchestrator, &message, &campaign, &mut report).await;

    // Stage 6: audit, unconditionally.
    let final_status = orchestrator
        .store()
        .get_message(message_id)
        .await
        .ok()
        .flatten()
        .map(|m| m.status.to_string());
    let audit = NewAudit {
        kind: "message_pipeline".into(),
        campaign_id: Some(campaign.id),
        message_id: Some(message.id.clone()),
        recipient_phone: Some(message.recipient_phone.clone()),
        detail: json!({
            "stages": report.stages,
            "final_status": final_status,
        }),
    };
    let audit_result = orchestrator
        .store()
        .append_audit(audit, orchestrator.clock().now_utc())
        .await;

    result.and(audit_result)
}

async fn run_stages(
    orchestrator: &Orchestrator,
    message: &Message,
    campaign: &Campaign,
    report: &mut StageReport,
) -> Result<(), CadenzaError> {
    let store = orchestrator.store();
    let now = orchestrator.clock().now_utc();

    // Stage 1: consent.
    let eligibility = orchestrator.consent().is_eligible(&message.recipient_phone).await?;
    if !eligibility.ok {
        let reason = eligibility
            .reason
            .map(|s| s.to_string())
            .unwrap_or_else(|| "unknown".into());
        report.push("consent", format!("blocked:{reason}"));
        store
            .transition_message(
                &message.id,
                MessageStatus::Queued,
                MessageStatus::Failed,
                TransitionUpdate::default(),
            )
            .await?;
        info!(
            message_id = message.id.as_str(),
            recipient = message.recipient_phone.as_str(),
            reason = reason.as_str(),
            "message blocked by consent"
        );
        return Ok(());
    }
    report.push("consent", "ok");

    // Stage 2: quiet hours.
    if let Some(window) = campaign_quiet_window(campaign) {
        let recipient = store.get_recipient(&message.recipient_phone).await?;
        let tz = resolve_zone(recipient.as_ref(), campaign);
        if in_quiet_window(&window, tz, now) {
            let resume_at = next_allowed(&window, tz, now);
            let delay = (resume_at - now).to_std().unwrap_or_default();
            orchestrator.scheduler().delay(&message.id, delay);
            report.push("quiet_hours", format!("deferred_until:{}", resume_at.to_rfc3339()));
            debug!(
                message_id = message.id.as_str(),
                %tz,
                resume_at = %resume_at,
                "message deferred by quiet hours"
            );
            return Ok(());
        }
    }
    report.push("quiet_hours", "clear");

    // Stage 3: rate limit. Deferrals here never consume the retry budget.
    let admission = orchestrator.limiter().try_acquire(
        campaign.id,
        campaign.rate_limit_per_second,
        now,
    );
    if !admission.admitted {
        let retry_after = admission
            .retry_after
            .unwrap_or(std::time::Duration::from_secs(1));
        orchestrator.scheduler().delay(&message.id, retry_after);
        report.push("rate_limit", "deferred");
        debug!(
            message_id = message.id.as_str(),
            campaign_id = campaign.id,
            ?retry_after,
            "message deferred by rate limit"
        );
        return Ok(());
    }
    report.push("rate_limit", "admitted");

    // Stage 4: content re-validation.
    if let Err(invalid) = cadenza_template::validate_content(&message.rendered_content) {
        report.push("content", format!("invalid:{invalid}"));
        store
            .transition_message(
                &message.id,
                MessageStatus::Queued,
                MessageStatus::Failed,
                TransitionUpdate::default(),
            )
            .await?;
        info!(message_id = message.id.as_str(), error = %invalid, "message failed content validation");
        return Ok(());
    }
    report.push("content", "ok");

    // Stage 5: dispatch.
    if !store
        .transition_message(
            &message.id,
            MessageStatus::Queued,
            MessageStatus::Sending,
            TransitionUpdate::default(),
        )
        .await?
    {
        // A concurrent worker or callback won; nothing to do.
        report.push("dispatch", "lost_cas");
        return Ok(());
    }

    match orchestrator
        .provider()
        .send(&message.recipient_phone, &message.rendered_content)
        .await
    {
        Ok(provider_sid) => {
            let sent_at = orchestrator.clock().now_utc();
            let moved = store
                .transition_message(
                    &message.id,
                    MessageStatus::Sending,
                    MessageStatus::Sent,
                    TransitionUpdate {
                        provider_sid: Some(provider_sid.clone()),
                        sent_at: Some(sent_at),
                        ..Default::default()
                    },
                )
                .await?;
            if !moved {
                warn!(message_id = message.id.as_str(), "SENDING->SENT lost a race");
            }
            report.push("dispatch", format!("sent:{provider_sid}"));
            info!(
                message_id = message.id.as_str(),
                recipient = message.recipient_phone.as_str(),
                provider_sid = provider_sid.as_str(),
                "message dispatched"
            );
        }
        Err(e) if e.is_transient() => {
            let retries = message.retry_count + 1;
            if retries > i64::from(orchestrator.config().max_transient_retries) {
                store
                    .transition_message(
                        &message.id,
                        MessageStatus::Sending,
                        MessageStatus::Failed,
                        TransitionUpdate {
                            error_code: Some(e.code),
                            ..Default::default()
                        },
                    )
                    .await?;
                report.push("dispatch", format!("retries_exhausted:{}", e.code));
                warn!(
                    message_id = message.id.as_str(),
                    code = e.code,
                    "transient retry budget exhausted"
                );
            } else {
                store
                    .transition_message(
                        &message.id,
                        MessageStatus::Sending,
                        MessageStatus::Queued,
                        TransitionUpdate {
                            retry_count: Some(retries),
                            ..Default::default()
                        },
                    )
                    .await?;
                let delay = backoff(retries as u32);
                orchestrator.scheduler().delay(&message.id, delay);
                report.push("dispatch", format!("transient:{} retry:{retries}", e.code));
                debug!(
                    message_id = message.id.as_str(),
                    code = e.code,
                    retry = retries,
                    ?delay,
                    "transient provider error, retrying"
                );
            }
        }
        Err(e) => {
            store
                .transition_message(
                    &message.id,
                    MessageStatus::Sending,
                    MessageStatus::Failed,
                    TransitionUpdate {
                        error_code: Some(e.code),
                        ..Default::default()
                    },
                )
                .await?;
            report.push("dispatch", format!("permanent:{}", e.code));
            info!(
                message_id = message.id.as_str(),
                code = e.code,
                "permanent provider error"
            );
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use cadenza_consent::ConsentService;
    use cadenza_core::types::{AttributeMap, ConsentSource, ConsentState};
    use cadenza_core::Clock;
    use cadenza_core::ProviderError;
    use cadenza_ratelimit::RateLimiter;
    use cadenza_segment::SegmentEvaluator;
    use cadenza_storage::{NewCampaign, NewTemplate, Store};
    use chrono::{TimeZone, Utc};
    use tempfile::tempdir;

    use super::*;
    use crate::orchestrator::{Orchestrator, RunnerConfig};
    use crate::test_support::{ManualScheduler, MockClock, ScriptedProvider};

    struct Fixture {
        orchestrator: Orchestrator,
        store: Store,
        scheduler: Arc<ManualScheduler>,
        provider: Arc<ScriptedProvider>,
        clock: Arc<MockClock>,
        campaign_id: i64,
        _dir: tempfile::TempDir,
    }

    async fn fixture(
        script: Vec<Result<String, ProviderError>>,
        rate_limit: u32,
        quiet: Option<(&str, &str)>,
    ) -> Fixture {
        let dir = tempdir().unwrap();
        let store = Store::open(dir.path().join("pipeline.db").to_str().unwrap())
            .await
            .unwrap();
        let clock = MockClock::at(Utc.with_ymd_and_hms(2026, 6, 1, 12, 0, 0).unwrap());
        let now = clock.now_utc();

        store
            .upsert_recipient("+14155550001", AttributeMap::new(), ConsentState::OptIn, now)
            .await
            .unwrap();
        let template_id = store
            .insert_template(
                NewTemplate {
                    name: "plain".into(),
                    channel: "whatsapp".into(),
                    locale: "en_US".into(),
                    content: "hello".into(),
                    variables: vec![],
                },
                now,
            )
            .await
            .unwrap();
        let campaign_id = store
            .insert_campaign(
                NewCampaign {
                    topic: "test".into(),
                    template_id,
                    segment_id: None,
                    schedule_time: None,
                    rate_limit_per_second: rate_limit,
                    quiet_hours_start: quiet.map(|(s, _)| s.parse().unwrap()),
                    quiet_hours_end: quiet.map(|(_, e)| e.parse().unwrap()),
                    quiet_tz: "UTC".into(),
                },
                now,
            )
            .await
            .unwrap();
        store
            .transition_campaign(campaign_id, CampaignStatus::Draft, CampaignStatus::Ready, now)
            .await
            .unwrap();
        store
            .transition_campaign(campaign_id, CampaignStatus::Ready, CampaignStatus::Running, now)
            .await
            .unwrap();

        let scheduler = Arc::new(ManualScheduler::default());
        let provider = ScriptedProvider::new(script);
        let (jobs_tx, _jobs_rx) = tokio::sync::mpsc::channel(8);
        let orchestrator = Orchestrator::new(
            store.clone(),
            ConsentService::new(store.clone()),
            SegmentEvaluator::new(store.clone()),
            Arc::new(RateLimiter::new()),
            provider.clone(),
            clock.clone(),
            scheduler.clone(),
            jobs_tx,
            RunnerConfig::default(),
        );
        Fixture {
            orchestrator,
            store,
            scheduler,
            provider,
            clock,
            campaign_id,
            _dir: dir,
        }
    }

    impl Fixture {
        async fn queue_message(&self, id: &str, content: &str) {
            self.store
                .create_message(
                    id,
                    self.campaign_id,
                    "+14155550001",
                    content,
                    self.clock.now_utc(),
                )
                .await
                .unwrap();
        }

        async fn status(&self, id: &str) -> MessageStatus {
            self.store.get_message(id).await.unwrap().unwrap().status
        }
    }

    #[tokio::test]
    async fn successful_dispatch_marks_sent() {
        let f = fixture(vec![], 10, None).await;
        f.queue_message("m1", "hello").await;

        f.orchestrator.process_message("m1").await.unwrap();

        let message = f.store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Sent);
        assert!(message.provider_sid.is_some());
        assert!(message.sent_at.unwrap() >= message.created_at);

        let audit = f.store.audit_for_message("m1").await.unwrap();
        assert_eq!(audit.len(), 1);
        assert_eq!(audit[0].kind, "message_pipeline");
        assert_eq!(audit[0].detail["final_status"], "SENT");
    }

    #[tokio::test]
    async fn consent_blocked_fails_without_dispatch() {
        let f = fixture(vec![], 10, None).await;
        f.queue_message("m1", "hello").await;
        f.store
            .update_consent(
                "+14155550001",
                ConsentState::Stop,
                ConsentSource::InboundKeyword,
                f.clock.now_utc(),
            )
            .await
            .unwrap();

        f.orchestrator.process_message("m1").await.unwrap();

        assert_eq!(f.status("m1").await, MessageStatus::Failed);
        assert_eq!(f.provider.calls(), 0);

        let audit = f.store.audit_for_message("m1").await.unwrap();
        let stages = audit[0].detail["stages"].as_array().unwrap();
        assert_eq!(stages[0]["outcome"], "blocked:STOP");
    }

    #[tokio::test]
    async fn transient_then_permanent_matches_retry_budget() {
        let f = fixture(
            vec![
                Err(ProviderError::transient(30001, "queue overflow")),
                Err(ProviderError::permanent(21614, "not a mobile")),
            ],
            10,
            None,
        )
        .await;
        f.queue_message("m1", "hello").await;

        // First attempt: transient, back to QUEUED with one retry consumed.
        f.orchestrator.process_message("m1").await.unwrap();
        let message = f.store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Queued);
        assert_eq!(message.retry_count, 1);

        let delays = f.scheduler.take();
        assert_eq!(delays.len(), 1);
        // backoff(1) = 60s +/- 20%.
        assert!(delays[0].1 >= Duration::from_secs(48) && delays[0].1 <= Duration::from_secs(72));

        // Second attempt: permanent, terminal.
        f.orchestrator.process_message("m1").await.unwrap();
        let message = f.store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.error_code, Some(21614));
        assert_eq!(message.retry_count, 1);

        // Both attempts audited.
        assert_eq!(f.store.audit_for_message("m1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn transient_budget_exhausts_to_failed() {
        let always_transient: Vec<_> = (0..4)
            .map(|_| Err(ProviderError::transient(30001, "overflow")))
            .collect();
        let f = fixture(always_transient, 10, None).await;
        f.queue_message("m1", "hello").await;

        for _ in 0..4 {
            f.orchestrator.process_message("m1").await.unwrap();
        }

        let message = f.store.get_message("m1").await.unwrap().unwrap();
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.error_code, Some(30001));
        assert_eq!(message.retry_count, 3);
    }

    #[tokio::test]
    async fn rate_limit_defers_without_consuming_retries() {
        let f = fixture(vec![], 1, None).await;
        f.queue_message("m1", "hello").await;
        f.store
            .upsert_recipient("+14155550002", AttributeMap::new(), ConsentState::OptIn, f.clock.now_utc())
            .await
            .unwrap();
        f.store
            .create_message("m2", f.campaign_id, "+14155550002", "hello", f.clock.now_utc())
            .await
            .unwrap();

        f.orchestrator.process_message("m1").await.unwrap();
        f.orchestrator.process_message("m2").await.unwrap();

        assert_eq!(f.status("m1").await, MessageStatus::Sent);
        let deferred = f.store.get_message("m2").await.unwrap().unwrap();
        assert_eq!(deferred.status, MessageStatus::Queued);
        assert_eq!(deferred.retry_count, 0);

        let delays = f.scheduler.take();
        assert_eq!(delays.len(), 1);
        assert_eq!(delays[0].0, "m2");
        assert!(delays[0].1 <= Duration::from_secs(1));
    }

    #[tokio::test]
    async fn quiet_hours_defer_until_window_end() {
        let f = fixture(vec![], 10, Some(("22:00:00", "08:00:00"))).await;
        // 23:30 UTC is inside the overnight window.
        f.clock
            .set(Utc.with_ymd_and_hms(2026, 6, 1, 23, 30, 0).unwrap());
        f.queue_message("m1", "hello").await;

        f.orchestrator.process_message("m1").await.unwrap();
        assert_eq!(f.status("m1").await, MessageStatus::Queued);
        assert_eq!(f.provider.calls(), 0);

        let delays = f.scheduler.take();
        assert_eq!(delays.len(), 1);
        assert_eq!(delays[0].1, Duration::from_secs(8 * 3600 + 30 * 60));

        // At the window end the pipeline proceeds.
        f.clock
            .set(Utc.with_ymd_and_hms(2026, 6, 2, 8, 0, 0).unwrap());
        f.orchestrator.process_message("m1").await.unwrap();
        assert_eq!(f.status("m1").await, MessageStatus::Sent);
    }

    #[tokio::test]
    async fn invalid_content_fails_before_dispatch() {
        let f = fixture(vec![], 10, None).await;
        f.queue_message("m1", "residual {name} token").await;

        f.orchestrator.process_message("m1").await.unwrap();

        assert_eq!(f.status("m1").await, MessageStatus::Failed);
        assert_eq!(f.provider.calls(), 0);
    }

    #[tokio::test]
    async fn paused_campaign_leaves_messages_queued() {
        let f = fixture(vec![], 10, None).await;
        f.queue_message("m1", "hello").await;
        f.store
            .transition_campaign(
                f.campaign_id,
                CampaignStatus::Running,
                CampaignStatus::Paused,
                f.clock.now_utc(),
            )
            .await
            .unwrap();

        f.orchestrator.process_message("m1").await.unwrap();
        assert_eq!(f.status("m1").await, MessageStatus::Queued);
        assert_eq!(f.provider.calls(), 0);
    }
}
