// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Append-only audit log.

use cadenza_core::types::AuditRecord;
use cadenza_core::CadenzaError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::database::{map_db_err, Database};
use crate::queries::parse_json_col;

/// Fields for one audit entry.
#[derive(Debug, Clone)]
pub struct NewAudit {
    pub kind: String,
    pub campaign_id: Option<i64>,
    pub message_id: Option<String>,
    pub recipient_phone: Option<String>,
    pub detail: serde_json::Value,
}

fn row_to_audit(row: &Row<'_>) -> rusqlite::Result<AuditRecord> {
    let detail_raw: String = row.get(5)?;
    Ok(AuditRecord {
        id: row.get(0)?,
        kind: row.get(1)?,
        campaign_id: row.get(2)?,
        message_id: row.get(3)?,
        recipient_phone: row.get(4)?,
        detail: parse_json_col(5, &detail_raw)?,
        at: row.get(6)?,
    })
}

const AUDIT_COLS: &str = "id, kind, campaign_id, message_id, recipient_phone, detail, at";

/// Append one audit record.
pub async fn append(db: &Database, entry: NewAudit, at: DateTime<Utc>) -> Result<(), CadenzaError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO audit_log (kind, campaign_id, message_id, recipient_phone, detail, at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entry.kind,
                    entry.campaign_id,
                    entry.message_id,
                    entry.recipient_phone,
                    entry.detail.to_string(),
                    at,
                ],
            )?;
            Ok(())
        })
        .await
        .map_err(map_db_err)
}

/// All audit records for one message, oldest first.
pub async fn list_for_message(
    db: &Database,
    message_id: &str,
) -> Result<Vec<AuditRecord>, CadenzaError> {
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AUDIT_COLS} FROM audit_log WHERE message_id = ?1 ORDER BY id ASC"
            ))?;
            let rows = stmt.query_map(params![message_id], row_to_audit)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
        .await
        .map_err(map_db_err)
}

/// All audit records for one recipient, oldest first.
pub async fn list_for_recipient(
    db: &Database,
    recipient_phone: &str,
) -> Result<Vec<AuditRecord>, CadenzaError> {
    let recipient_phone = recipient_phone.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AUDIT_COLS} FROM audit_log WHERE recipient_phone = ?1 ORDER BY id ASC"
            ))?;
            let rows = stmt.query_map(params![recipient_phone], row_to_audit)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
        .await
        .map_err(map_db_err)
}

/// All audit records for one campaign, oldest first.
pub async fn list_for_campaign(
    db: &Database,
    campaign_id: i64,
) -> Result<Vec<AuditRecord>, CadenzaError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {AUDIT_COLS} FROM audit_log WHERE campaign_id = ?1 ORDER BY id ASC"
            ))?;
            let rows = stmt.query_map(params![campaign_id], row_to_audit)?;
            let mut records = Vec::new();
            for row in rows {
                records.push(row?);
            }
            Ok(records)
        })
        .await
        .map_err(map_db_err)
}
