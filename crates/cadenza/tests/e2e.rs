// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! End-to-end scenarios driven through the full stack: webhook ingestion,
//! consent, campaign trigger, materialization, the compliance pipeline, and
//! status callbacks.

use std::time::{Duration, Instant};

use cadenza_test_utils::{MockOutcome, TestHarness};
use chrono::Utc;
use serde_json::json;

use cadenza_core::types::{CampaignStatus, ConsentState, MessageStatus};

async fn harness() -> TestHarness {
    TestHarness::builder().build().await.unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_suppresses_delivery_and_start_does_not_restore() {
    let h = harness().await;

    h.seed_recipient("+14155550001", &[("city", "X")], ConsentState::OptIn)
        .await
        .unwrap();
    h.seed_recipient("+14155550002", &[("city", "X")], ConsentState::OptIn)
        .await
        .unwrap();

    // The recipient texts STOP before the campaign fires.
    h.post_inbound(&[("From", "+14155550001"), ("Body", "STOP"), ("MessageSid", "SMin1")])
        .await
        .unwrap();

    let template_id = h.seed_template("promo", "hello", &[]).await.unwrap();
    let segment_id = h
        .seed_segment(
            "city-x",
            json!({"attribute": "city", "operator": "equals", "value": "X"}),
        )
        .await
        .unwrap();
    let campaign_id = h
        .seed_campaign("promo", template_id, Some(segment_id), 10)
        .await
        .unwrap();

    let status = h
        .trigger_and_wait(campaign_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(status, CampaignStatus::Completed);

    // No outbound call ever reached the stopped recipient; the other
    // matching recipient was delivered.
    assert!(h.provider.calls_to("+14155550001").is_empty());
    assert_eq!(h.provider.calls_to("+14155550002").len(), 1);

    // A later START does not restore delivery eligibility.
    h.post_inbound(&[("From", "+14155550001"), ("Body", "START"), ("MessageSid", "SMin2")])
        .await
        .unwrap();
    let recipient = h.store.get_recipient("+14155550001").await.unwrap().unwrap();
    assert_eq!(recipient.consent_state, ConsentState::Stop);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn rate_limit_paces_dispatch() {
    let h = harness().await;

    for i in 0..12 {
        h.seed_recipient(&format!("+1415555{i:04}"), &[], ConsentState::OptIn)
            .await
            .unwrap();
    }
    let template_id = h.seed_template("paced", "steady on", &[]).await.unwrap();
    let campaign_id = h.seed_campaign("paced", template_id, None, 5).await.unwrap();

    let started = Instant::now();
    let status = h
        .trigger_and_wait(campaign_id, Duration::from_secs(30))
        .await
        .unwrap();
    assert_eq!(status, CampaignStatus::Completed);
    assert!(started.elapsed() >= Duration::from_millis(1500));

    let calls = h.provider.calls();
    assert_eq!(calls.len(), 12);

    // At most the limit inside any sliding window.
    for call in &calls {
        let window_end = call.at + chrono::TimeDelta::milliseconds(800);
        let in_window = calls
            .iter()
            .filter(|c| c.at >= call.at && c.at < window_end)
            .count();
        assert!(in_window <= 5, "{in_window} dispatches within one window");
    }

    let first = calls.iter().map(|c| c.at).min().unwrap();
    let last = calls.iter().map(|c| c.at).max().unwrap();
    assert!(last - first >= chrono::TimeDelta::milliseconds(1500));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn out_of_order_callbacks_settle_on_delivered() {
    let h = harness().await;

    h.seed_recipient("+14155550001", &[], ConsentState::OptIn)
        .await
        .unwrap();
    let template_id = h.seed_template("single", "just one", &[]).await.unwrap();
    let campaign_id = h.seed_campaign("single", template_id, None, 10).await.unwrap();
    let status = h
        .trigger_and_wait(campaign_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(status, CampaignStatus::Completed);

    let call = &h.provider.calls_to("+14155550001")[0];
    let sid = call.sid.clone().unwrap();
    let message = h.store.find_message_by_provider_sid(&sid).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Sent);

    // delivered lands first; the late sent must be a no-op.
    h.post_status(&[("MessageSid", &sid), ("MessageStatus", "delivered")])
        .await
        .unwrap();
    h.post_status(&[("MessageSid", &sid), ("MessageStatus", "sent")])
        .await
        .unwrap();

    let message = h.store.get_message(&message.id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Delivered);
    assert!(message.delivered_at.unwrap() >= message.sent_at.unwrap());

    // Replaying delivered is also a no-op, and read still progresses.
    h.post_status(&[("MessageSid", &sid), ("MessageStatus", "delivered")])
        .await
        .unwrap();
    h.post_status(&[("MessageSid", &sid), ("MessageStatus", "read")])
        .await
        .unwrap();
    let message = h.store.get_message(&message.id).await.unwrap().unwrap();
    assert_eq!(message.status, MessageStatus::Read);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn permanent_provider_error_fails_message_with_code() {
    let h = harness().await;

    h.seed_recipient("+14155550042", &[], ConsentState::OptIn)
        .await
        .unwrap();
    let template_id = h.seed_template("doomed", "will bounce", &[]).await.unwrap();
    let campaign_id = h.seed_campaign("doomed", template_id, None, 10).await.unwrap();

    h.provider.inject(
        "+14155550042",
        "will bounce",
        vec![MockOutcome::Permanent { code: 21614 }],
    );

    let status = h
        .trigger_and_wait(campaign_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(status, CampaignStatus::Completed);

    assert_eq!(
        h.store
            .count_messages_in_status(campaign_id, MessageStatus::Failed)
            .await
            .unwrap(),
        1
    );
    let audit = h.store.audit_for_campaign(campaign_id).await.unwrap();
    let pipeline_records: Vec<_> = audit
        .iter()
        .filter(|r| r.kind == "message_pipeline")
        .collect();
    assert_eq!(pipeline_records.len(), 1);
    assert_eq!(pipeline_records[0].detail["final_status"], "FAILED");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn materialization_is_exactly_once_per_recipient() {
    let h = harness().await;

    for i in 0..40 {
        h.seed_recipient(
            &format!("+1415666{i:04}"),
            &[("name", "Kim")],
            ConsentState::OptIn,
        )
        .await
        .unwrap();
    }
    let template_id = h
        .seed_template("bulk", "Hi {name}!", &["name"])
        .await
        .unwrap();
    let campaign_id = h.seed_campaign("bulk", template_id, None, 100).await.unwrap();

    // Concurrent triggers observe one run.
    let first = h.orchestrator.trigger(campaign_id).await.unwrap();
    let second = h.orchestrator.trigger(campaign_id).await.unwrap();
    assert_eq!(first.task_id, second.task_id);

    let status = h
        .trigger_and_wait(campaign_id, Duration::from_secs(20))
        .await
        .unwrap();
    assert_eq!(status, CampaignStatus::Completed);

    assert_eq!(
        h.store
            .count_messages_in_status(campaign_id, MessageStatus::Sent)
            .await
            .unwrap(),
        40
    );
    assert_eq!(h.provider.calls().len(), 40);

    // Every provider sid observed is unique.
    let mut sids: Vec<String> = h
        .provider
        .calls()
        .into_iter()
        .filter_map(|c| c.sid)
        .collect();
    sids.sort();
    sids.dedup();
    assert_eq!(sids.len(), 40);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_variables_skip_recipient_with_audit() {
    let h = harness().await;

    h.seed_recipient("+14155550001", &[("name", "Ada")], ConsentState::OptIn)
        .await
        .unwrap();
    h.seed_recipient("+14155550002", &[], ConsentState::OptIn)
        .await
        .unwrap();
    h.seed_recipient("+14155550003", &[("name", "")], ConsentState::OptIn)
        .await
        .unwrap();

    let template_id = h
        .seed_template("personal", "Hi {name}!", &["name"])
        .await
        .unwrap();
    let campaign_id = h
        .seed_campaign("personal", template_id, None, 10)
        .await
        .unwrap();

    let status = h
        .trigger_and_wait(campaign_id, Duration::from_secs(10))
        .await
        .unwrap();
    assert_eq!(status, CampaignStatus::Completed);

    // Only the fully-attributed recipient got a message; the empty-string
    // attribute counts as missing.
    assert_eq!(h.provider.calls().len(), 1);
    assert_eq!(h.provider.calls()[0].to, "+14155550001");
    assert_eq!(h.provider.calls()[0].body, "Hi Ada!");

    let skips: Vec<String> = h
        .store
        .audit_for_campaign(campaign_id)
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.kind == "materialize_skip")
        .filter_map(|r| r.recipient_phone)
        .collect();
    assert_eq!(skips.len(), 2);
    assert!(skips.contains(&"+14155550002".to_string()));
    assert!(skips.contains(&"+14155550003".to_string()));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn inbound_replay_keeps_raw_rows_and_single_effect() {
    let h = harness().await;
    h.seed_recipient("+14155550007", &[], ConsentState::OptIn)
        .await
        .unwrap();

    for _ in 0..3 {
        h.post_inbound(&[
            ("From", "whatsapp:+14155550007"),
            ("Body", "unsubscribe"),
            ("MessageSid", "SMreplay"),
        ])
        .await
        .unwrap();
    }

    assert_eq!(h.store.count_inbound_from("+14155550007").await.unwrap(), 3);
    let transitions = h
        .store
        .audit_for_recipient("+14155550007")
        .await
        .unwrap()
        .into_iter()
        .filter(|r| r.kind == "consent_transition")
        .count();
    assert_eq!(transitions, 1);

    let recipient = h.store.get_recipient("+14155550007").await.unwrap().unwrap();
    assert_eq!(recipient.consent_state, ConsentState::Stop);
    assert!(recipient.updated_at <= Utc::now());
}
