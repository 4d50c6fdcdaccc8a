// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Template catalog.

use cadenza_core::types::Template;
use cadenza_core::CadenzaError;
use chrono::{DateTime, Utc};
use rusqlite::{params, Row};

use crate::database::{map_db_err, Database};
use crate::queries::parse_json_col;

const TEMPLATE_COLS: &str = "id, name, channel, locale, content, variables, created_at";

fn row_to_template(row: &Row<'_>) -> rusqlite::Result<Template> {
    let variables_raw: String = row.get(5)?;
    Ok(Template {
        id: row.get(0)?,
        name: row.get(1)?,
        channel: row.get(2)?,
        locale: row.get(3)?,
        content: row.get(4)?,
        variables: parse_json_col::<Vec<String>>(5, &variables_raw)?,
        created_at: row.get(6)?,
    })
}

/// Fields for creating a template.
#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub name: String,
    pub channel: String,
    pub locale: String,
    pub content: String,
    pub variables: Vec<String>,
}

/// Insert a template; returns its id.
///
/// Every placeholder appearing in the content must be in the declared
/// variable list.
pub async fn insert(
    db: &Database,
    template: NewTemplate,
    now: DateTime<Utc>,
) -> Result<i64, CadenzaError> {
    let undeclared: Vec<String> = cadenza_template::extract_placeholders(&template.content)
        .into_iter()
        .filter(|p| !template.variables.iter().any(|v| v == p))
        .collect();
    if !undeclared.is_empty() {
        return Err(CadenzaError::Validation(format!(
            "template '{}' uses undeclared placeholders: {}",
            template.name,
            undeclared.join(", ")
        )));
    }

    db.connection()
        .call(move |conn| {
            let variables_raw = serde_json::to_string(&template.variables)
                .unwrap_or_else(|_| "[]".to_string());
            conn.execute(
                "INSERT INTO templates (name, channel, locale, content, variables, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    template.name,
                    template.channel,
                    template.locale,
                    template.content,
                    variables_raw,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_db_err)
}

/// Fetch a template by id.
pub async fn get(db: &Database, id: i64) -> Result<Option<Template>, CadenzaError> {
    db.connection()
        .call(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {TEMPLATE_COLS} FROM templates WHERE id = ?1"))?;
            let mut rows = stmt.query_map(params![id], row_to_template)?;
            match rows.next() {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(map_db_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn insert_validates_placeholders_against_variables() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("t.db").to_str().unwrap())
            .await
            .unwrap();
        let now = Utc::now();

        let ok = insert(
            &db,
            NewTemplate {
                name: "welcome".into(),
                channel: "whatsapp".into(),
                locale: "en_US".into(),
                content: "Hi {name}, welcome to {city}!".into(),
                variables: vec!["name".into(), "city".into()],
            },
            now,
        )
        .await
        .unwrap();

        let template = get(&db, ok).await.unwrap().unwrap();
        assert_eq!(template.variables, vec!["name", "city"]);

        let err = insert(
            &db,
            NewTemplate {
                name: "broken".into(),
                channel: "whatsapp".into(),
                locale: "en_US".into(),
                content: "Hi {name}!".into(),
                variables: vec![],
            },
            now,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, CadenzaError::Validation(_)));
    }
}
