// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Recipient repository: upsert with attribute merge, consent transitions,
//! and the paged listing that backs segment evaluation.

use cadenza_core::types::{AttributeMap, ConsentSource, ConsentState, Recipient};
use cadenza_core::CadenzaError;
use chrono::{DateTime, Utc};
use rusqlite::types::ToSqlOutput;
use rusqlite::{params, params_from_iter, Row, ToSql};

use crate::database::{map_db_err, Database};
use crate::queries::{parse_json_col, parse_text_col};

/// A dynamically typed SQL parameter for composed filters.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Real(f64),
}

impl ToSql for SqlValue {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        match self {
            SqlValue::Text(s) => Ok(ToSqlOutput::from(s.as_str())),
            SqlValue::Integer(i) => Ok(ToSqlOutput::from(*i)),
            SqlValue::Real(f) => Ok(ToSqlOutput::from(*f)),
        }
    }
}

/// A pushed-down recipient predicate: a SQL boolean expression over the
/// `recipients` table plus its bound parameters.
#[derive(Debug, Clone, Default)]
pub struct RecipientFilter {
    /// Conjoined boolean fragments; empty means "match all".
    pub clauses: Vec<String>,
    pub params: Vec<SqlValue>,
}

impl RecipientFilter {
    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            "1=1".to_string()
        } else {
            self.clauses.join(" AND ")
        }
    }
}

/// The result of a consent transition attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsentChange {
    /// State before the call.
    pub prior: ConsentState,
    /// Whether a transition was actually applied. False on replays and on
    /// STOP-sticky refusals.
    pub applied: bool,
}

fn row_to_recipient(row: &Row<'_>) -> rusqlite::Result<Recipient> {
    let attrs_raw: String = row.get(1)?;
    let consent_raw: String = row.get(2)?;
    Ok(Recipient {
        phone: row.get(0)?,
        attributes: parse_json_col::<AttributeMap>(1, &attrs_raw)?,
        consent_state: parse_text_col(2, consent_raw)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

const RECIPIENT_COLS: &str = "phone, attributes, consent_state, created_at, updated_at";

/// Fetch a recipient by E.164 phone.
pub async fn get(db: &Database, phone: &str) -> Result<Option<Recipient>, CadenzaError> {
    let phone = phone.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {RECIPIENT_COLS} FROM recipients WHERE phone = ?1"
            ))?;
            let mut rows = stmt.query_map(params![phone], row_to_recipient)?;
            match rows.next() {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(map_db_err)
}

/// Idempotent upsert. Merges `attrs` into the existing attribute bag with
/// last-write-wins per key; consent is only used for newly created rows.
pub async fn upsert(
    db: &Database,
    phone: &str,
    attrs: AttributeMap,
    default_consent: ConsentState,
    now: DateTime<Utc>,
) -> Result<Recipient, CadenzaError> {
    let phone = phone.to_string();
    db.connection()
        .call(move |conn| {
            let tx = conn.transaction()?;

            let existing: Option<(String, String)> = {
                let mut stmt = tx.prepare(
                    "SELECT attributes, consent_state FROM recipients WHERE phone = ?1",
                )?;
                let mut rows =
                    stmt.query_map(params![phone], |row| Ok((row.get(0)?, row.get(1)?)))?;
                match rows.next() {
                    Some(row) => Some(row?),
                    None => None,
                }
            };

            match existing {
                Some((attrs_raw, _)) => {
                    let mut merged: AttributeMap = parse_json_col(0, &attrs_raw)?;
                    for (k, v) in attrs.clone() {
                        merged.insert(k, v);
                    }
                    let merged_raw = serde_json::Value::Object(merged).to_string();
                    tx.execute(
                        "UPDATE recipients SET attributes = ?1, updated_at = ?2 WHERE phone = ?3",
                        params![merged_raw, now, phone],
                    )?;
                }
                None => {
                    let attrs_raw = serde_json::Value::Object(attrs.clone()).to_string();
                    tx.execute(
                        "INSERT INTO recipients (phone, attributes, consent_state, created_at, updated_at)
                         VALUES (?1, ?2, ?3, ?4, ?4)",
                        params![phone, attrs_raw, default_consent.to_string(), now],
                    )?;
                }
            }

            let recipient = {
                let mut stmt = tx.prepare(&format!(
                    "SELECT {RECIPIENT_COLS} FROM recipients WHERE phone = ?1"
                ))?;
                stmt.query_row(params![phone], row_to_recipient)?
            };
            tx.commit()?;
            Ok(recipient)
        })
        .await
        .map_err(map_db_err)
}

/// Applies a consent transition, enforcing STOP stickiness, and appends the
/// audit entry in the same transaction.
///
/// Returns the prior state and whether anything changed. Only the `Admin`
/// source may leave `STOP`; replays of the current state are no-ops with no
/// audit entry.
pub async fn update_consent(
    db: &Database,
    phone: &str,
    new_state: ConsentState,
    source: ConsentSource,
    at: DateTime<Utc>,
) -> Result<ConsentChange, CadenzaError> {
    let phone_owned = phone.to_string();
    let result = db
        .connection()
        .call(move |conn| {
            let tx = conn.transaction()?;

            let current: Option<String> = {
                let mut stmt =
                    tx.prepare("SELECT consent_state FROM recipients WHERE phone = ?1")?;
                let mut rows = stmt.query_map(params![phone_owned], |row| row.get(0))?;
                match rows.next() {
                    Some(row) => Some(row?),
                    None => None,
                }
            };

            let Some(current_raw) = current else {
                tx.commit()?;
                return Ok(None);
            };
            let prior: ConsentState = parse_text_col(0, current_raw)?;

            let sticky_refused = prior == ConsentState::Stop
                && new_state != ConsentState::Stop
                && source != ConsentSource::Admin;
            let applied = !sticky_refused && prior != new_state;

            if applied {
                tx.execute(
                    "UPDATE recipients SET consent_state = ?1, updated_at = ?2 WHERE phone = ?3",
                    params![new_state.to_string(), at, phone_owned],
                )?;
                let detail = serde_json::json!({
                    "from": prior.to_string(),
                    "to": new_state.to_string(),
                    "source": source.to_string(),
                })
                .to_string();
                tx.execute(
                    "INSERT INTO audit_log (kind, recipient_phone, detail, at)
                     VALUES ('consent_transition', ?1, ?2, ?3)",
                    params![phone_owned, detail, at],
                )?;
            }

            tx.commit()?;
            Ok(Some(ConsentChange { prior, applied }))
        })
        .await
        .map_err(map_db_err)?;

    result.ok_or_else(|| CadenzaError::Validation(format!("unknown recipient {phone}")))
}

/// One page of recipients matching `filter`, ordered by phone ascending,
/// strictly after the `after` cursor.
pub async fn list_page(
    db: &Database,
    filter: RecipientFilter,
    after: Option<String>,
    limit: usize,
) -> Result<Vec<Recipient>, CadenzaError> {
    db.connection()
        .call(move |conn| {
            let sql = format!(
                "SELECT {RECIPIENT_COLS} FROM recipients
                 WHERE ({}) AND phone > ?
                 ORDER BY phone ASC
                 LIMIT ?",
                filter.where_sql()
            );
            let mut all_params = filter.params.clone();
            all_params.push(SqlValue::Text(after.unwrap_or_default()));
            all_params.push(SqlValue::Integer(limit as i64));

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params_from_iter(all_params.iter()), row_to_recipient)?;
            let mut recipients = Vec::new();
            for row in rows {
                recipients.push(row?);
            }
            Ok(recipients)
        })
        .await
        .map_err(map_db_err)
}
