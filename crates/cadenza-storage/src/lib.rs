// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Cadenza messaging engine.
//!
//! Provides WAL-mode SQLite storage with embedded migrations, a
//! single-writer concurrency model via `tokio-rusqlite`, and typed
//! repositories for recipients, campaigns, templates, segments, messages,
//! raw webhook events, and the audit log.

pub mod database;
pub mod migrations;
pub mod queries;
pub mod store;

pub use database::Database;
pub use store::{
    ConsentChange, NewAudit, NewCampaign, NewTemplate, RecipientFilter, SqlValue, Store,
    TransitionUpdate,
};
