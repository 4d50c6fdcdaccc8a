// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Segment catalog. Definitions are stored as raw JSON; the segment
//! evaluator owns parsing and validation.

use cadenza_core::types::Segment;
use cadenza_core::CadenzaError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::database::{map_db_err, Database};
use crate::queries::parse_json_col;

fn row_to_segment(row: &Row<'_>) -> rusqlite::Result<Segment> {
    let definition_raw: String = row.get(2)?;
    Ok(Segment {
        id: row.get(0)?,
        name: row.get(1)?,
        definition: parse_json_col(2, &definition_raw)?,
        created_at: row.get(3)?,
    })
}

/// Insert a segment; returns its id.
pub async fn insert(
    db: &Database,
    name: &str,
    definition: serde_json::Value,
    now: DateTime<Utc>,
) -> Result<i64, CadenzaError> {
    let name = name.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO segments (name, definition, created_at) VALUES (?1, ?2, ?3)",
                params![name, definition.to_string(), now],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_db_err)
}

/// Fetch a segment by id.
pub async fn get(db: &Database, id: i64) -> Result<Option<Segment>, CadenzaError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, definition, created_at FROM segments WHERE id = ?1",
            )?;
            let mut rows = stmt.query_map(params![id], row_to_segment)?;
            match rows.next() {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(map_db_err)
}
