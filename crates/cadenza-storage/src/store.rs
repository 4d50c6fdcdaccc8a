// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The Store facade: a cheap-to-clone handle bundling the database and
//! exposing the typed repository contract.
//!
//! The Store exclusively owns all row lifecycles. Messages are created at
//! materialization and thereafter mutated only through [`Store::transition_message`];
//! raw event rows are append-only.

use std::sync::Arc;

use cadenza_core::types::{
    AttributeMap, AuditRecord, Campaign, CampaignStatus, ConsentSource, ConsentState,
    DeliveryReceipt, InboundEvent, Message, MessageStatus, Recipient, Segment, Template,
};
use cadenza_core::CadenzaError;
use chrono::{DateTime, Utc};

use crate::database::Database;
use crate::queries;

pub use crate::queries::audit::NewAudit;
pub use crate::queries::campaigns::NewCampaign;
pub use crate::queries::messages::TransitionUpdate;
pub use crate::queries::recipients::{ConsentChange, RecipientFilter, SqlValue};
pub use crate::queries::templates::NewTemplate;

/// Shared handle to the persistence layer.
#[derive(Clone)]
pub struct Store {
    db: Arc<Database>,
}

impl Store {
    /// Opens the store at `path`, running migrations.
    pub async fn open(path: &str) -> Result<Self, CadenzaError> {
        let db = Database::open(path).await?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// WAL checkpoint; called on graceful shutdown.
    pub async fn close(&self) -> Result<(), CadenzaError> {
        self.db.close().await
    }

    // --- Recipients ---

    pub async fn get_recipient(&self, phone: &str) -> Result<Option<Recipient>, CadenzaError> {
        queries::recipients::get(&self.db, phone).await
    }

    pub async fn upsert_recipient(
        &self,
        phone: &str,
        attrs: AttributeMap,
        default_consent: ConsentState,
        now: DateTime<Utc>,
    ) -> Result<Recipient, CadenzaError> {
        queries::recipients::upsert(&self.db, phone, attrs, default_consent, now).await
    }

    pub async fn update_consent(
        &self,
        phone: &str,
        new_state: ConsentState,
        source: ConsentSource,
        at: DateTime<Utc>,
    ) -> Result<ConsentChange, CadenzaError> {
        queries::recipients::update_consent(&self.db, phone, new_state, source, at).await
    }

    pub async fn list_recipients_page(
        &self,
        filter: RecipientFilter,
        after: Option<String>,
        limit: usize,
    ) -> Result<Vec<Recipient>, CadenzaError> {
        queries::recipients::list_page(&self.db, filter, after, limit).await
    }

    // --- Messages ---

    pub async fn create_message(
        &self,
        id: &str,
        campaign_id: i64,
        recipient_phone: &str,
        rendered_content: &str,
        created_at: DateTime<Utc>,
    ) -> Result<bool, CadenzaError> {
        queries::messages::create(&self.db, id, campaign_id, recipient_phone, rendered_content, created_at)
            .await
    }

    pub async fn get_message(&self, id: &str) -> Result<Option<Message>, CadenzaError> {
        queries::messages::get(&self.db, id).await
    }

    pub async fn transition_message(
        &self,
        id: &str,
        from: MessageStatus,
        to: MessageStatus,
        update: TransitionUpdate,
    ) -> Result<bool, CadenzaError> {
        queries::messages::transition(&self.db, id, from, to, update).await
    }

    pub async fn find_message_by_provider_sid(
        &self,
        provider_sid: &str,
    ) -> Result<Option<Message>, CadenzaError> {
        queries::messages::find_by_provider_sid(&self.db, provider_sid).await
    }

    pub async fn count_unsettled_messages(&self, campaign_id: i64) -> Result<i64, CadenzaError> {
        queries::messages::count_unsettled(&self.db, campaign_id).await
    }

    pub async fn count_sending_messages(&self) -> Result<i64, CadenzaError> {
        queries::messages::count_sending(&self.db).await
    }

    pub async fn count_messages_in_status(
        &self,
        campaign_id: i64,
        status: MessageStatus,
    ) -> Result<i64, CadenzaError> {
        queries::messages::count_in_status(&self.db, campaign_id, status).await
    }

    pub async fn list_queued_message_ids(
        &self,
        campaign_id: i64,
    ) -> Result<Vec<String>, CadenzaError> {
        queries::messages::list_queued_ids(&self.db, campaign_id).await
    }

    // --- Campaigns ---

    pub async fn insert_campaign(
        &self,
        campaign: NewCampaign,
        now: DateTime<Utc>,
    ) -> Result<i64, CadenzaError> {
        queries::campaigns::insert(&self.db, campaign, now).await
    }

    pub async fn get_campaign(&self, id: i64) -> Result<Option<Campaign>, CadenzaError> {
        queries::campaigns::get(&self.db, id).await
    }

    pub async fn transition_campaign(
        &self,
        id: i64,
        from: CampaignStatus,
        to: CampaignStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, CadenzaError> {
        queries::campaigns::transition_status(&self.db, id, from, to, now).await
    }

    pub async fn set_campaign_cursor(
        &self,
        id: i64,
        cursor: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), CadenzaError> {
        queries::campaigns::set_cursor(&self.db, id, cursor, now).await
    }

    pub async fn mark_campaign_materialized(
        &self,
        id: i64,
        at: DateTime<Utc>,
    ) -> Result<(), CadenzaError> {
        queries::campaigns::mark_materialized(&self.db, id, at).await
    }

    pub async fn campaigns_due_for_start(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<Campaign>, CadenzaError> {
        queries::campaigns::due_for_start(&self.db, now).await
    }

    pub async fn campaigns_in_status(
        &self,
        status: CampaignStatus,
    ) -> Result<Vec<Campaign>, CadenzaError> {
        queries::campaigns::list_in_status(&self.db, status).await
    }

    // --- Subscriptions ---

    pub async fn subscribe(&self, phone: &str, topic: &str) -> Result<(), CadenzaError> {
        queries::subscriptions::subscribe(&self.db, phone, topic).await
    }

    pub async fn unsubscribe(&self, phone: &str, topic: &str) -> Result<(), CadenzaError> {
        queries::subscriptions::unsubscribe(&self.db, phone, topic).await
    }

    pub async fn topics_for(&self, phone: &str) -> Result<Vec<String>, CadenzaError> {
        queries::subscriptions::topics_for(&self.db, phone).await
    }

    pub async fn subscribers_of(&self, topic: &str) -> Result<Vec<String>, CadenzaError> {
        queries::subscriptions::subscribers_of(&self.db, topic).await
    }

    // --- Templates and segments ---

    pub async fn insert_template(
        &self,
        template: NewTemplate,
        now: DateTime<Utc>,
    ) -> Result<i64, CadenzaError> {
        queries::templates::insert(&self.db, template, now).await
    }

    pub async fn get_template(&self, id: i64) -> Result<Option<Template>, CadenzaError> {
        queries::templates::get(&self.db, id).await
    }

    pub async fn insert_segment(
        &self,
        name: &str,
        definition: serde_json::Value,
        now: DateTime<Utc>,
    ) -> Result<i64, CadenzaError> {
        queries::segments::insert(&self.db, name, definition, now).await
    }

    pub async fn get_segment(&self, id: i64) -> Result<Option<Segment>, CadenzaError> {
        queries::segments::get(&self.db, id).await
    }

    // --- Raw events ---

    pub async fn insert_raw_inbound(
        &self,
        raw_payload: &str,
        received_at: DateTime<Utc>,
    ) -> Result<String, CadenzaError> {
        queries::events::insert_raw_inbound(&self.db, raw_payload, received_at).await
    }

    pub async fn annotate_inbound(
        &self,
        id: &str,
        provider_message_id: Option<String>,
        from_phone: Option<String>,
        channel: Option<String>,
        normalized_body: Option<String>,
    ) -> Result<(), CadenzaError> {
        queries::events::annotate_inbound(
            &self.db,
            id,
            provider_message_id,
            from_phone,
            channel,
            normalized_body,
        )
        .await
    }

    pub async fn get_inbound_event(&self, id: &str) -> Result<Option<InboundEvent>, CadenzaError> {
        queries::events::get_inbound(&self.db, id).await
    }

    pub async fn count_inbound_from(&self, from_phone: &str) -> Result<i64, CadenzaError> {
        queries::events::count_inbound_from(&self.db, from_phone).await
    }

    pub async fn insert_raw_receipt(
        &self,
        raw_payload: &str,
        received_at: DateTime<Utc>,
    ) -> Result<String, CadenzaError> {
        queries::events::insert_raw_receipt(&self.db, raw_payload, received_at).await
    }

    pub async fn annotate_receipt(
        &self,
        id: &str,
        provider_sid: Option<String>,
        message_status: Option<String>,
        error_code: Option<i64>,
    ) -> Result<(), CadenzaError> {
        queries::events::annotate_receipt(&self.db, id, provider_sid, message_status, error_code)
            .await
    }

    pub async fn receipts_for_sid(
        &self,
        provider_sid: &str,
    ) -> Result<Vec<DeliveryReceipt>, CadenzaError> {
        queries::events::receipts_for_sid(&self.db, provider_sid).await
    }

    // --- Audit ---

    pub async fn append_audit(&self, entry: NewAudit, at: DateTime<Utc>) -> Result<(), CadenzaError> {
        queries::audit::append(&self.db, entry, at).await
    }

    pub async fn audit_for_message(
        &self,
        message_id: &str,
    ) -> Result<Vec<AuditRecord>, CadenzaError> {
        queries::audit::list_for_message(&self.db, message_id).await
    }

    pub async fn audit_for_recipient(
        &self,
        recipient_phone: &str,
    ) -> Result<Vec<AuditRecord>, CadenzaError> {
        queries::audit::list_for_recipient(&self.db, recipient_phone).await
    }

    pub async fn audit_for_campaign(
        &self,
        campaign_id: i64,
    ) -> Result<Vec<AuditRecord>, CadenzaError> {
        queries::audit::list_for_campaign(&self.db, campaign_id).await
    }
}
