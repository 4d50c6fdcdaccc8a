// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message repository.
//!
//! `transition` is the only status mutator: a compare-and-set on the status
//! column. Concurrent transitions collapse to one winner; losers observe
//! `false` and treat the attempt as a no-op.

use cadenza_core::types::{Message, MessageStatus};
use cadenza_core::CadenzaError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::database::{map_db_err, Database};
use crate::queries::parse_text_col;

const MESSAGE_COLS: &str = "id, campaign_id, recipient_phone, rendered_content, status, \
                            provider_sid, error_code, retry_count, created_at, sent_at, delivered_at";

fn row_to_message(row: &Row<'_>) -> rusqlite::Result<Message> {
    let status_raw: String = row.get(4)?;
    Ok(Message {
        id: row.get(0)?,
        campaign_id: row.get(1)?,
        recipient_phone: row.get(2)?,
        rendered_content: row.get(3)?,
        status: parse_text_col(4, status_raw)?,
        provider_sid: row.get(5)?,
        error_code: row.get(6)?,
        retry_count: row.get(7)?,
        created_at: row.get(8)?,
        sent_at: row.get(9)?,
        delivered_at: row.get(10)?,
    })
}

/// Optional column updates applied together with a status transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionUpdate {
    pub provider_sid: Option<String>,
    pub error_code: Option<i64>,
    pub retry_count: Option<i64>,
    pub sent_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Creates a message in QUEUED.
///
/// Uses `INSERT OR IGNORE` against the `(campaign_id, recipient_phone)`
/// unique index so crash-resumed materialization cannot create duplicates.
/// Returns whether a row was actually created.
pub async fn create(
    db: &Database,
    id: &str,
    campaign_id: i64,
    recipient_phone: &str,
    rendered_content: &str,
    created_at: DateTime<Utc>,
) -> Result<bool, CadenzaError> {
    let id = id.to_string();
    let recipient_phone = recipient_phone.to_string();
    let rendered_content = rendered_content.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO messages
                     (id, campaign_id, recipient_phone, rendered_content, status, created_at)
                 VALUES (?1, ?2, ?3, ?4, 'QUEUED', ?5)",
                params![id, campaign_id, recipient_phone, rendered_content, created_at],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_db_err)
}

/// Fetch a message by id.
pub async fn get(db: &Database, id: &str) -> Result<Option<Message>, CadenzaError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1"))?;
            let mut rows = stmt.query_map(params![id], row_to_message)?;
            match rows.next() {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(map_db_err)
}

/// Compare-and-set status transition; fails (returns false) when the current
/// status is not `from`. Additional fields are only written when provided.
pub async fn transition(
    db: &Database,
    id: &str,
    from: MessageStatus,
    to: MessageStatus,
    update: TransitionUpdate,
) -> Result<bool, CadenzaError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE messages SET
                     status = ?1,
                     provider_sid = COALESCE(?2, provider_sid),
                     error_code = COALESCE(?3, error_code),
                     retry_count = COALESCE(?4, retry_count),
                     sent_at = COALESCE(?5, sent_at),
                     delivered_at = COALESCE(?6, delivered_at)
                 WHERE id = ?7 AND status = ?8",
                params![
                    to.to_string(),
                    update.provider_sid,
                    update.error_code,
                    update.retry_count,
                    update.sent_at,
                    update.delivered_at,
                    id,
                    from.to_string(),
                ],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_db_err)
}

/// Locates a message by its provider sid (status-callback correlation).
pub async fn find_by_provider_sid(
    db: &Database,
    provider_sid: &str,
) -> Result<Option<Message>, CadenzaError> {
    let provider_sid = provider_sid.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLS} FROM messages WHERE provider_sid = ?1"
            ))?;
            let mut rows = stmt.query_map(params![provider_sid], row_to_message)?;
            match rows.next() {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(map_db_err)
}

/// Counts messages still in flight (QUEUED or SENDING) for a campaign.
pub async fn count_unsettled(db: &Database, campaign_id: i64) -> Result<i64, CadenzaError> {
    db.connection()
        .call(move |conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM messages
                 WHERE campaign_id = ?1 AND status IN ('QUEUED', 'SENDING')",
                params![campaign_id],
                |row| row.get(0),
            )?;
            Ok(n)
        })
        .await
        .map_err(map_db_err)
}

/// Counts messages mid-dispatch across all campaigns (shutdown drain).
pub async fn count_sending(db: &Database) -> Result<i64, CadenzaError> {
    db.connection()
        .call(|conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE status = 'SENDING'",
                [],
                |row| row.get(0),
            )?;
            Ok(n)
        })
        .await
        .map_err(map_db_err)
}

/// Counts messages per campaign and status (reporting and tests).
pub async fn count_in_status(
    db: &Database,
    campaign_id: i64,
    status: MessageStatus,
) -> Result<i64, CadenzaError> {
    db.connection()
        .call(move |conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM messages WHERE campaign_id = ?1 AND status = ?2",
                params![campaign_id, status.to_string()],
                |row| row.get(0),
            )?;
            Ok(n)
        })
        .await
        .map_err(map_db_err)
}

/// Ids of QUEUED messages for a campaign, creation order. Used to (re)fill
/// the worker queue on start and resume.
pub async fn list_queued_ids(db: &Database, campaign_id: i64) -> Result<Vec<String>, CadenzaError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id FROM messages
                 WHERE campaign_id = ?1 AND status = 'QUEUED'
                 ORDER BY created_at ASC, id ASC",
            )?;
            let rows = stmt.query_map(params![campaign_id], |row| row.get::<_, String>(0))?;
            let mut ids = Vec::new();
            for row in rows {
                ids.push(row?);
            }
            Ok(ids)
        })
        .await
        .map_err(map_db_err)
}
