// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Cadenza messaging engine.
//!
//! Provides the shared error enum, the domain entities with their three
//! state machines (consent, message, campaign), E.164 handling, and the
//! capability traits (`ProviderClient`, `Clock`, `Scheduler`) that the
//! orchestrator and ingestor receive by injection.

pub mod error;
pub mod phone;
pub mod traits;
pub mod types;

pub use error::CadenzaError;
pub use traits::{Clock, ProviderClient, ProviderError, ProviderErrorKind, Scheduler, SystemClock};
pub use types::{
    AttributeMap, AuditRecord, CallbackStatus, Campaign, CampaignStatus, ConsentSource,
    ConsentState, DeliveryReceipt, InboundEvent, Message, MessageStatus, Recipient, Segment,
    Template,
};
