// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Consent eligibility and inbound keyword handling.
//!
//! Operator note: `STOP` is sticky. An inbound `START` only restores
//! recipients that are `OPT_OUT`; leaving `STOP` requires
//! [`ConsentService::admin_re_opt_in`], which records an explicit
//! `re_opt_in` audit event before the transition.
//!
//! This service never reads or writes messages.

use cadenza_core::types::{ConsentSource, ConsentState};
use cadenza_core::CadenzaError;
use cadenza_storage::{NewAudit, Store};
use chrono::{DateTime, Utc};
use tracing::info;

/// Keywords that transition a recipient to `STOP`.
pub const STOP_KEYWORDS: [&str; 5] = ["STOP", "QUIT", "CANCEL", "UNSUBSCRIBE", "END"];

/// Keywords that restore `OPT_OUT` recipients to `OPT_IN`.
pub const RESUBSCRIBE_KEYWORDS: [&str; 2] = ["START", "UNSTOP"];

/// Eligibility verdict for outbound delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Eligibility {
    pub ok: bool,
    /// The blocking consent state when not ok.
    pub reason: Option<ConsentState>,
}

/// The effect an inbound keyword had, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeywordEffect {
    pub from: ConsentState,
    pub to: ConsentState,
}

/// Computes eligibility and applies keyword-driven consent transitions.
#[derive(Clone)]
pub struct ConsentService {
    store: Store,
}

impl ConsentService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// `OPT_IN` recipients are eligible; anything else is blocked with the
    /// current state as the reason.
    pub async fn is_eligible(&self, phone: &str) -> Result<Eligibility, CadenzaError> {
        let recipient = self
            .store
            .get_recipient(phone)
            .await?
            .ok_or_else(|| CadenzaError::Validation(format!("unknown recipient {phone}")))?;
        match recipient.consent_state {
            ConsentState::OptIn => Ok(Eligibility {
                ok: true,
                reason: None,
            }),
            blocked => Ok(Eligibility {
                ok: false,
                reason: Some(blocked),
            }),
        }
    }

    /// Applies the consent effect of an inbound message body, if any.
    ///
    /// The body is trimmed and upper-cased before matching. Returns the
    /// applied transition, or `None` when the body is not a keyword, the
    /// recipient does not exist, or the transition was refused or a replay.
    pub async fn apply_inbound_keyword(
        &self,
        phone: &str,
        body: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<KeywordEffect>, CadenzaError> {
        let keyword = body.trim().to_uppercase();

        let target = if STOP_KEYWORDS.contains(&keyword.as_str()) {
            ConsentState::Stop
        } else if RESUBSCRIBE_KEYWORDS.contains(&keyword.as_str()) {
            ConsentState::OptIn
        } else {
            return Ok(None);
        };

        // The recipient must already exist; unknown senders have been
        // upserted by the ingestor before keywords apply.
        if self.store.get_recipient(phone).await?.is_none() {
            return Ok(None);
        }

        let change = self
            .store
            .update_consent(phone, target, ConsentSource::InboundKeyword, at)
            .await?;
        if !change.applied {
            return Ok(None);
        }

        info!(
            phone,
            from = %change.prior,
            to = %target,
            keyword = keyword.as_str(),
            "consent transition from inbound keyword"
        );
        Ok(Some(KeywordEffect {
            from: change.prior,
            to: target,
        }))
    }

    /// Admin-level re-opt-in, the only path out of `STOP`.
    ///
    /// Writes the explicit `re_opt_in` audit event and then applies the
    /// transition with the admin source.
    pub async fn admin_re_opt_in(&self, phone: &str, at: DateTime<Utc>) -> Result<(), CadenzaError> {
        self.store
            .append_audit(
                NewAudit {
                    kind: "re_opt_in".into(),
                    campaign_id: None,
                    message_id: None,
                    recipient_phone: Some(phone.to_string()),
                    detail: serde_json::json!({"source": "admin"}),
                },
                at,
            )
            .await?;
        let change = self
            .store
            .update_consent(phone, ConsentState::OptIn, ConsentSource::Admin, at)
            .await?;
        info!(phone, applied = change.applied, "admin re-opt-in");
        Ok(())
    }
}
