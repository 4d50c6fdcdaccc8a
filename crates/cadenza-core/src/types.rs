// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Domain types shared across the Cadenza workspace.
//!
//! The three state machines (consent, message, campaign) live here so every
//! crate agrees on the same transition rules. Timestamps are `DateTime<Utc>`
//! end to end; the storage layer maps them to TEXT columns.

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// String-keyed JSON attribute bag carried by every recipient.
pub type AttributeMap = serde_json::Map<String, serde_json::Value>;

/// A recipient's messaging consent state.
///
/// `Stop` is sticky: once observed it can only be left through an explicit
/// admin re-opt-in, never through an inbound keyword.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConsentState {
    OptIn,
    OptOut,
    Stop,
}

/// Where a consent transition originated. Inbound keywords cannot leave
/// `STOP`; the admin source can.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ConsentSource {
    InboundKeyword,
    Api,
    Admin,
}

/// The outbound message state machine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageStatus {
    Queued,
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
    Undelivered,
}

/// Lower-case message status as reported by provider status callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum CallbackStatus {
    Queued,
    Sending,
    Sent,
    Delivered,
    Read,
    Failed,
    Undelivered,
}

impl MessageStatus {
    /// Whether this status admits no further provider callbacks.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            MessageStatus::Read | MessageStatus::Failed | MessageStatus::Undelivered
        )
    }

    /// Whether this status counts as settled for campaign completion.
    ///
    /// `SENT` is settled: dispatch succeeded and any late callback still
    /// lands through the callback table without holding the campaign open.
    pub fn is_settled(self) -> bool {
        !matches!(self, MessageStatus::Queued | MessageStatus::Sending)
    }

    /// Target status for a provider callback, or `None` when the callback is
    /// a no-op from the current status.
    ///
    /// Out-of-order callbacks are absorbed: `delivered` before `sent` jumps
    /// straight to `DELIVERED`, and a late `sent` is then a no-op. Late
    /// failure reports after `DELIVERED` are ignored.
    pub fn on_callback(self, callback: CallbackStatus) -> Option<MessageStatus> {
        use CallbackStatus as Cb;
        use MessageStatus::*;
        match (self, callback) {
            (Queued | Sending, Cb::Sent) => Some(Sent),
            (Queued | Sending | Sent, Cb::Delivered) => Some(Delivered),
            (Queued | Sending | Sent | Delivered, Cb::Read) => Some(Read),
            (Queued | Sending | Sent, Cb::Failed) => Some(Failed),
            (Queued | Sending | Sent, Cb::Undelivered) => Some(Undelivered),
            _ => None,
        }
    }
}

/// The campaign lifecycle state machine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CampaignStatus {
    Draft,
    Ready,
    Running,
    Paused,
    Completed,
    Failed,
}

impl CampaignStatus {
    /// Whether a direct transition to `to` is allowed.
    pub fn can_transition_to(self, to: CampaignStatus) -> bool {
        use CampaignStatus::*;
        matches!(
            (self, to),
            (Draft, Ready)
                | (Ready, Running)
                | (Running, Paused)
                | (Paused, Running)
                | (Running, Completed)
                | (Draft | Ready | Running | Paused, Failed)
        )
    }
}

/// A messaging recipient, keyed by E.164 phone number.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    /// E.164 phone number (immutable primary key).
    pub phone: String,
    /// Open attribute bag used for personalization and segmentation.
    pub attributes: AttributeMap,
    /// Current messaging consent state.
    pub consent_state: ConsentState,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A message template with `{name}`-style placeholders.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: i64,
    /// Unique internal name.
    pub name: String,
    /// Delivery channel, e.g. "whatsapp" or "sms".
    pub channel: String,
    /// Locale tag, e.g. "en_US".
    pub locale: String,
    /// Message text with `{placeholder}` tokens.
    pub content: String,
    /// Declared variable names; every placeholder in `content` must appear here.
    pub variables: Vec<String>,
    pub created_at: DateTime<Utc>,
}

/// A recipient filter expressed as a JSON rule tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Segment {
    pub id: i64,
    pub name: String,
    /// Raw rule tree; parsed and validated by the segment evaluator.
    pub definition: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// An outbound campaign binding a topic, template, and segment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: i64,
    pub topic: String,
    pub template_id: i64,
    /// `None` targets every opted-in recipient.
    pub segment_id: Option<i64>,
    /// Optional launch instant; the scheduler starts READY campaigns past it.
    pub schedule_time: Option<DateTime<Utc>>,
    pub status: CampaignStatus,
    /// Maximum messages per second, >= 1.
    pub rate_limit_per_second: u32,
    /// Wall-clock quiet window start, interpreted in the resolved zone.
    pub quiet_hours_start: Option<NaiveTime>,
    /// Wall-clock quiet window end. An end before the start marks an
    /// overnight window.
    pub quiet_hours_end: Option<NaiveTime>,
    /// Campaign-default IANA zone for quiet hours.
    pub quiet_tz: String,
    /// Last committed materialization cursor (recipient phone).
    pub materialize_cursor: Option<String>,
    /// Set once the segment stream has been fully drained.
    pub materialized_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A per-recipient materialized message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// Opaque internal id (UUID).
    pub id: String,
    pub campaign_id: i64,
    pub recipient_phone: String,
    /// Rendered content, set once at materialization.
    pub rendered_content: String,
    pub status: MessageStatus,
    /// Provider-assigned id, unique when present; set on successful dispatch.
    pub provider_sid: Option<String>,
    /// Provider error code on FAILED or UNDELIVERED.
    pub error_code: Option<i64>,
    /// Transient dispatch retries consumed so far.
    pub retry_count: i64,
    pub created_at: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// An append-only raw inbound webhook event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundEvent {
    pub id: String,
    /// Verbatim payload as received; never rewritten.
    pub raw_payload: String,
    pub provider_message_id: Option<String>,
    pub from_phone: Option<String>,
    /// Channel type extracted from the provider prefix (whatsapp, sms, ...).
    pub channel: Option<String>,
    /// Trimmed, lower-cased body.
    pub normalized_body: Option<String>,
    pub received_at: DateTime<Utc>,
}

/// An append-only raw delivery status callback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub id: String,
    /// Verbatim payload as received; never rewritten.
    pub raw_payload: String,
    pub provider_sid: Option<String>,
    pub message_status: Option<String>,
    pub error_code: Option<i64>,
    pub received_at: DateTime<Utc>,
}

/// A structured audit record. Append-only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: i64,
    /// Record kind, e.g. "consent_transition", "materialize_skip",
    /// "message_pipeline", "re_opt_in".
    pub kind: String,
    pub campaign_id: Option<i64>,
    pub message_id: Option<String>,
    pub recipient_phone: Option<String>,
    /// Structured detail payload.
    pub detail: serde_json::Value,
    pub at: DateTime<Utc>,
}
