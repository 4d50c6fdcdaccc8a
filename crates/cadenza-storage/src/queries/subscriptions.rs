// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Subscription edges: a pure (recipient, topic) many-to-many with no state
//! of its own.

use cadenza_core::CadenzaError;
use rusqlite::params;

use crate::database::{map_db_err, Database};

/// Subscribe a recipient to a topic. Idempotent.
pub async fn subscribe(db: &Database, phone: &str, topic: &str) -> Result<(), CadenzaError> {
    let phone = phone.to_string();
    let topic = topic.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT OR IGNORE INTO subscriptions (recipient_phone, topic) VALUES (?1, ?2)",
                params![phone, topic],
            )?;
            Ok(())
        })
        .await
        .map_err(map_db_err)
}

/// Remove a subscription edge. Removing a missing edge is a no-op.
pub async fn unsubscribe(db: &Database, phone: &str, topic: &str) -> Result<(), CadenzaError> {
    let phone = phone.to_string();
    let topic = topic.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "DELETE FROM subscriptions WHERE recipient_phone = ?1 AND topic = ?2",
                params![phone, topic],
            )?;
            Ok(())
        })
        .await
        .map_err(map_db_err)
}

/// Topics a recipient is subscribed to, sorted.
pub async fn topics_for(db: &Database, phone: &str) -> Result<Vec<String>, CadenzaError> {
    let phone = phone.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT topic FROM subscriptions WHERE recipient_phone = ?1 ORDER BY topic ASC",
            )?;
            let rows = stmt.query_map(params![phone], |row| row.get::<_, String>(0))?;
            let mut topics = Vec::new();
            for row in rows {
                topics.push(row?);
            }
            Ok(topics)
        })
        .await
        .map_err(map_db_err)
}

/// Recipients subscribed to a topic, phone ascending.
pub async fn subscribers_of(db: &Database, topic: &str) -> Result<Vec<String>, CadenzaError> {
    let topic = topic.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT recipient_phone FROM subscriptions WHERE topic = ?1
                 ORDER BY recipient_phone ASC",
            )?;
            let rows = stmt.query_map(params![topic], |row| row.get::<_, String>(0))?;
            let mut phones = Vec::new();
            for row in rows {
                phones.push(row?);
            }
            Ok(phones)
        })
        .await
        .map_err(map_db_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_core::types::{AttributeMap, ConsentState};
    use chrono::Utc;
    use tempfile::tempdir;

    use crate::queries::recipients;

    #[tokio::test]
    async fn subscribe_is_idempotent_and_removable() {
        let dir = tempdir().unwrap();
        let db = Database::open(dir.path().join("subs.db").to_str().unwrap())
            .await
            .unwrap();
        let now = Utc::now();
        recipients::upsert(&db, "+14155550001", AttributeMap::new(), ConsentState::OptIn, now)
            .await
            .unwrap();

        subscribe(&db, "+14155550001", "price_alert").await.unwrap();
        subscribe(&db, "+14155550001", "price_alert").await.unwrap();
        subscribe(&db, "+14155550001", "newsletter").await.unwrap();

        assert_eq!(
            topics_for(&db, "+14155550001").await.unwrap(),
            vec!["newsletter", "price_alert"]
        );
        assert_eq!(
            subscribers_of(&db, "price_alert").await.unwrap(),
            vec!["+14155550001"]
        );

        unsubscribe(&db, "+14155550001", "price_alert").await.unwrap();
        assert_eq!(topics_for(&db, "+14155550001").await.unwrap(), vec!["newsletter"]);
        assert!(subscribers_of(&db, "price_alert").await.unwrap().is_empty());
    }
}
