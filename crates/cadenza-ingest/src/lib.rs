// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook ingestion: inbound messages and delivery status callbacks.
//!
//! Both entry points persist the raw payload first; everything after raw
//! capture is best-effort. Malformed extraction, unknown recipients, and
//! unmatched sids never fail the request, so the provider never retries a
//! payload because of a consumer-side normalization failure. Replays create
//! duplicate raw rows; the message-state guards make the side-effects
//! idempotent.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use cadenza_consent::ConsentService;
use cadenza_core::phone::extract_channel_and_phone;
use cadenza_core::types::{AttributeMap, CallbackStatus, ConsentState, MessageStatus};
use cadenza_core::{CadenzaError, Clock};
use cadenza_storage::{Store, TransitionUpdate};
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

/// Attempts to apply a status callback against a raced CAS before giving up.
const CALLBACK_CAS_ATTEMPTS: usize = 3;

/// Processes raw webhook payloads into normalized events and side-effects.
#[derive(Clone)]
pub struct WebhookIngestor {
    store: Store,
    consent: ConsentService,
    clock: Arc<dyn Clock>,
}

impl WebhookIngestor {
    pub fn new(store: Store, consent: ConsentService, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            consent,
            clock,
        }
    }

    /// Handles `POST /webhooks/inbound`.
    ///
    /// Returns the raw event id. Only a failure to persist the raw payload
    /// is an error; every later step logs and succeeds.
    pub async fn process_inbound(
        &self,
        fields: &HashMap<String, String>,
    ) -> Result<String, CadenzaError> {
        let now = self.clock.now_utc();
        let raw = serde_json::to_string(fields)
            .map_err(|e| CadenzaError::Internal(format!("payload serialization: {e}")))?;
        let event_id = self.store.insert_raw_inbound(&raw, now).await?;

        if let Err(e) = self.normalize_inbound(&event_id, fields, now).await {
            warn!(event_id, error = %e, "inbound normalization failed; raw row retained");
        }
        Ok(event_id)
    }

    async fn normalize_inbound(
        &self,
        event_id: &str,
        fields: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<(), CadenzaError> {
        let provider_message_id = fields.get("MessageSid").cloned();
        let body = fields.get("Body").cloned().unwrap_or_default();
        let normalized_body = body.trim().to_lowercase();

        let Some(from_raw) = fields.get("From") else {
            self.store
                .annotate_inbound(event_id, provider_message_id, None, None, Some(normalized_body))
                .await?;
            debug!(event_id, "inbound payload has no From field");
            return Ok(());
        };

        let (channel, phone) = extract_channel_and_phone(from_raw);
        self.store
            .annotate_inbound(
                event_id,
                provider_message_id,
                phone.clone(),
                Some(channel.to_string()),
                Some(normalized_body),
            )
            .await?;

        let Some(phone) = phone else {
            debug!(event_id, from = from_raw.as_str(), "sender is not a valid E.164 number");
            return Ok(());
        };

        // Known senders get profile enrichment; unknown senders are created
        // opted in.
        let mut attrs = AttributeMap::new();
        if let Some(profile_name) = fields.get("ProfileName") {
            attrs.insert("profile_name".into(), profile_name.clone().into());
        }
        if let Some(wa_id) = fields.get("WaId") {
            attrs.insert("wa_id".into(), wa_id.clone().into());
        }
        attrs.insert("last_inbound_at".into(), now.to_rfc3339().into());
        self.store
            .upsert_recipient(&phone, attrs, ConsentState::OptIn, now)
            .await?;

        self.consent.apply_inbound_keyword(&phone, &body, now).await?;
        Ok(())
    }

    /// Handles `POST /webhooks/status`.
    ///
    /// Returns the raw receipt id; like inbound, only raw capture can fail.
    pub async fn process_status(
        &self,
        fields: &HashMap<String, String>,
    ) -> Result<String, CadenzaError> {
        let now = self.clock.now_utc();
        let raw = serde_json::to_string(fields)
            .map_err(|e| CadenzaError::Internal(format!("payload serialization: {e}")))?;
        let receipt_id = self.store.insert_raw_receipt(&raw, now).await?;

        if let Err(e) = self.normalize_status(&receipt_id, fields, now).await {
            warn!(receipt_id, error = %e, "status normalization failed; raw row retained");
        }
        Ok(receipt_id)
    }

    async fn normalize_status(
        &self,
        receipt_id: &str,
        fields: &HashMap<String, String>,
        now: DateTime<Utc>,
    ) -> Result<(), CadenzaError> {
        let provider_sid = fields.get("MessageSid").cloned();
        let status_raw = fields.get("MessageStatus").cloned();
        let error_code = fields
            .get("ErrorCode")
            .and_then(|c| c.trim().parse::<i64>().ok());

        self.store
            .annotate_receipt(receipt_id, provider_sid.clone(), status_raw.clone(), error_code)
            .await?;

        let (Some(sid), Some(status_raw)) = (provider_sid, status_raw) else {
            debug!(receipt_id, "status payload missing MessageSid or MessageStatus");
            return Ok(());
        };
        let Ok(callback) = CallbackStatus::from_str(status_raw.trim()) else {
            debug!(receipt_id, status = status_raw.as_str(), "unknown callback status");
            return Ok(());
        };

        self.apply_callback(&sid, callback, error_code, now).await
    }

    /// Applies a callback through the message DAG. Replays and out-of-order
    /// callbacks collapse to no-ops; a raced compare-and-set is retried
    /// against the fresh status.
    async fn apply_callback(
        &self,
        sid: &str,
        callback: CallbackStatus,
        error_code: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<(), CadenzaError> {
        for _ in 0..CALLBACK_CAS_ATTEMPTS {
            let Some(message) = self.store.find_message_by_provider_sid(sid).await? else {
                debug!(sid, "no message correlated to provider sid");
                return Ok(());
            };

            let Some(target) = message.status.on_callback(callback) else {
                debug!(
                    sid,
                    current = %message.status,
                    callback = %callback,
                    "callback is a no-op from the current status"
                );
                return Ok(());
            };

            let update = TransitionUpdate {
                sent_at: (target == MessageStatus::Sent).then_some(now),
                delivered_at: (target == MessageStatus::Delivered).then_some(now),
                error_code: matches!(
                    target,
                    MessageStatus::Failed | MessageStatus::Undelivered
                )
                .then_some(error_code)
                .flatten(),
                ..Default::default()
            };

            if self
                .store
                .transition_message(&message.id, message.status, target, update)
                .await?
            {
                debug!(sid, message_id = message.id.as_str(), from = %message.status, to = %target, "callback applied");
                return Ok(());
            }
            // Lost the CAS to a concurrent transition; re-read and retry.
        }
        warn!(sid, "gave up applying callback after repeated CAS losses");
        Ok(())
    }
}
