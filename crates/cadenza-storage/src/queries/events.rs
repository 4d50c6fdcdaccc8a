// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Raw webhook event capture.
//!
//! Raw rows are append-only and inserted before any normalization or
//! side-effect. Normalized columns are filled in afterwards; the raw
//! payload column is never rewritten. Replays create duplicate raw rows,
//! which is accepted.

use cadenza_core::types::{DeliveryReceipt, InboundEvent};
use cadenza_core::CadenzaError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::database::{map_db_err, Database};

/// Persist a raw inbound payload; returns the new event id.
pub async fn insert_raw_inbound(
    db: &Database,
    raw_payload: &str,
    received_at: DateTime<Utc>,
) -> Result<String, CadenzaError> {
    let id = uuid::Uuid::new_v4().to_string();
    let raw_payload = raw_payload.to_string();
    let id_out = id.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO inbound_events (id, raw_payload, received_at) VALUES (?1, ?2, ?3)",
                params![id, raw_payload, received_at],
            )?;
            Ok(())
        })
        .await
        .map_err(map_db_err)?;
    Ok(id_out)
}

/// Fill in the normalized columns of an inbound event after extraction.
pub async fn annotate_inbound(
    db: &Database,
    id: &str,
    provider_message_id: Option<String>,
    from_phone: Option<String>,
    channel: Option<String>,
    normalized_body: Option<String>,
) -> Result<(), CadenzaError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE inbound_events
                 SET provider_message_id = ?1, from_phone = ?2, channel = ?3, normalized_body = ?4
                 WHERE id = ?5",
                params![provider_message_id, from_phone, channel, normalized_body, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_db_err)
}

fn row_to_inbound(row: &Row<'_>) -> rusqlite::Result<InboundEvent> {
    Ok(InboundEvent {
        id: row.get(0)?,
        raw_payload: row.get(1)?,
        provider_message_id: row.get(2)?,
        from_phone: row.get(3)?,
        channel: row.get(4)?,
        normalized_body: row.get(5)?,
        received_at: row.get(6)?,
    })
}

/// Fetch an inbound event by id.
pub async fn get_inbound(db: &Database, id: &str) -> Result<Option<InboundEvent>, CadenzaError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, raw_payload, provider_message_id, from_phone, channel,
                        normalized_body, received_at
                 FROM inbound_events WHERE id = ?1",
            )?;
            let mut rows = stmt.query_map(params![id], row_to_inbound)?;
            match rows.next() {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(map_db_err)
}

/// Count inbound events by sender (idempotence tests: N replays, N raw rows).
pub async fn count_inbound_from(db: &Database, from_phone: &str) -> Result<i64, CadenzaError> {
    let from_phone = from_phone.to_string();
    db.connection()
        .call(move |conn| {
            let n = conn.query_row(
                "SELECT COUNT(*) FROM inbound_events WHERE from_phone = ?1",
                params![from_phone],
                |row| row.get(0),
            )?;
            Ok(n)
        })
        .await
        .map_err(map_db_err)
}

/// Persist a raw delivery receipt payload; returns the new receipt id.
pub async fn insert_raw_receipt(
    db: &Database,
    raw_payload: &str,
    received_at: DateTime<Utc>,
) -> Result<String, CadenzaError> {
    let id = uuid::Uuid::new_v4().to_string();
    let raw_payload = raw_payload.to_string();
    let id_out = id.clone();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO delivery_receipts (id, raw_payload, received_at) VALUES (?1, ?2, ?3)",
                params![id, raw_payload, received_at],
            )?;
            Ok(())
        })
        .await
        .map_err(map_db_err)?;
    Ok(id_out)
}

/// Fill in the normalized columns of a delivery receipt after extraction.
pub async fn annotate_receipt(
    db: &Database,
    id: &str,
    provider_sid: Option<String>,
    message_status: Option<String>,
    error_code: Option<i64>,
) -> Result<(), CadenzaError> {
    let id = id.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE delivery_receipts
                 SET provider_sid = ?1, message_status = ?2, error_code = ?3
                 WHERE id = ?4",
                params![provider_sid, message_status, error_code, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_db_err)
}

fn row_to_receipt(row: &Row<'_>) -> rusqlite::Result<DeliveryReceipt> {
    Ok(DeliveryReceipt {
        id: row.get(0)?,
        raw_payload: row.get(1)?,
        provider_sid: row.get(2)?,
        message_status: row.get(3)?,
        error_code: row.get(4)?,
        received_at: row.get(5)?,
    })
}

/// All receipts recorded for a provider sid, oldest first.
pub async fn receipts_for_sid(
    db: &Database,
    provider_sid: &str,
) -> Result<Vec<DeliveryReceipt>, CadenzaError> {
    let provider_sid = provider_sid.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, raw_payload, provider_sid, message_status, error_code, received_at
                 FROM delivery_receipts WHERE provider_sid = ?1
                 ORDER BY received_at ASC",
            )?;
            let rows = stmt.query_map(params![provider_sid], row_to_receipt)?;
            let mut receipts = Vec::new();
            for row in rows {
                receipts.push(row?);
            }
            Ok(receipts)
        })
        .await
        .map_err(map_db_err)
}
