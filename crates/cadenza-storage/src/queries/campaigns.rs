// SPDX-FileCopyrightText: 2026 Cadenza Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Campaign repository. Status changes go through a compare-and-set so that
//! concurrent triggers and the scheduler cannot race a campaign into an
//! illegal state.

use cadenza_core::types::{Campaign, CampaignStatus};
use cadenza_core::CadenzaError;
use chrono::{DateTime, NaiveTime, Utc};
use rusqlite::{params, Row};

use crate::database::{map_db_err, Database};
use crate::queries::parse_text_col;

const CAMPAIGN_COLS: &str = "id, topic, template_id, segment_id, schedule_time, status, \
                             rate_limit_per_second, quiet_hours_start, quiet_hours_end, quiet_tz, \
                             materialize_cursor, materialized_at, created_at, updated_at";

fn row_to_campaign(row: &Row<'_>) -> rusqlite::Result<Campaign> {
    let status_raw: String = row.get(5)?;
    Ok(Campaign {
        id: row.get(0)?,
        topic: row.get(1)?,
        template_id: row.get(2)?,
        segment_id: row.get(3)?,
        schedule_time: row.get(4)?,
        status: parse_text_col(5, status_raw)?,
        rate_limit_per_second: row.get::<_, i64>(6)? as u32,
        quiet_hours_start: row.get(7)?,
        quiet_hours_end: row.get(8)?,
        quiet_tz: row.get(9)?,
        materialize_cursor: row.get(10)?,
        materialized_at: row.get(11)?,
        created_at: row.get(12)?,
        updated_at: row.get(13)?,
    })
}

/// Fields for creating a campaign. Campaigns start in DRAFT.
#[derive(Debug, Clone)]
pub struct NewCampaign {
    pub topic: String,
    pub template_id: i64,
    pub segment_id: Option<i64>,
    pub schedule_time: Option<DateTime<Utc>>,
    pub rate_limit_per_second: u32,
    pub quiet_hours_start: Option<NaiveTime>,
    pub quiet_hours_end: Option<NaiveTime>,
    pub quiet_tz: String,
}

/// Insert a new DRAFT campaign; returns its id.
///
/// The template (and segment, when given) must resolve, enforced by the
/// foreign keys. A rate limit below 1 is rejected.
pub async fn insert(
    db: &Database,
    campaign: NewCampaign,
    now: DateTime<Utc>,
) -> Result<i64, CadenzaError> {
    if campaign.rate_limit_per_second < 1 {
        return Err(CadenzaError::Validation(
            "rate_limit_per_second must be >= 1".into(),
        ));
    }
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO campaigns
                     (topic, template_id, segment_id, schedule_time, status,
                      rate_limit_per_second, quiet_hours_start, quiet_hours_end, quiet_tz,
                      created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, 'DRAFT', ?5, ?6, ?7, ?8, ?9, ?9)",
                params![
                    campaign.topic,
                    campaign.template_id,
                    campaign.segment_id,
                    campaign.schedule_time,
                    campaign.rate_limit_per_second as i64,
                    campaign.quiet_hours_start,
                    campaign.quiet_hours_end,
                    campaign.quiet_tz,
                    now,
                ],
            )?;
            Ok(conn.last_insert_rowid())
        })
        .await
        .map_err(map_db_err)
}

/// Fetch a campaign by id.
pub async fn get(db: &Database, id: i64) -> Result<Option<Campaign>, CadenzaError> {
    db.connection()
        .call(move |conn| {
            let mut stmt =
                conn.prepare(&format!("SELECT {CAMPAIGN_COLS} FROM campaigns WHERE id = ?1"))?;
            let mut rows = stmt.query_map(params![id], row_to_campaign)?;
            match rows.next() {
                Some(row) => Ok(Some(row?)),
                None => Ok(None),
            }
        })
        .await
        .map_err(map_db_err)
}

/// Compare-and-set status transition. Rejects transitions the campaign
/// machine does not allow; returns false when the current status is not
/// `from` (a concurrent caller won).
pub async fn transition_status(
    db: &Database,
    id: i64,
    from: CampaignStatus,
    to: CampaignStatus,
    now: DateTime<Utc>,
) -> Result<bool, CadenzaError> {
    if !from.can_transition_to(to) {
        return Err(CadenzaError::Validation(format!(
            "campaign transition {from} -> {to} is not allowed"
        )));
    }
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE campaigns SET status = ?1, updated_at = ?2 WHERE id = ?3 AND status = ?4",
                params![to.to_string(), now, id, from.to_string()],
            )?;
            Ok(changed > 0)
        })
        .await
        .map_err(map_db_err)
}

/// Persist the materialization cursor (last committed recipient phone).
pub async fn set_cursor(
    db: &Database,
    id: i64,
    cursor: Option<String>,
    now: DateTime<Utc>,
) -> Result<(), CadenzaError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE campaigns SET materialize_cursor = ?1, updated_at = ?2 WHERE id = ?3",
                params![cursor, now, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_db_err)
}

/// Mark the segment stream fully drained for this campaign.
pub async fn mark_materialized(
    db: &Database,
    id: i64,
    at: DateTime<Utc>,
) -> Result<(), CadenzaError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE campaigns SET materialized_at = ?1, updated_at = ?1 WHERE id = ?2",
                params![at, id],
            )?;
            Ok(())
        })
        .await
        .map_err(map_db_err)
}

/// READY campaigns whose schedule time has passed (or was never set).
pub async fn due_for_start(
    db: &Database,
    now: DateTime<Utc>,
) -> Result<Vec<Campaign>, CadenzaError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CAMPAIGN_COLS} FROM campaigns
                 WHERE status = 'READY'
                   AND (schedule_time IS NULL OR schedule_time <= ?1)
                 ORDER BY id ASC"
            ))?;
            let rows = stmt.query_map(params![now], row_to_campaign)?;
            let mut campaigns = Vec::new();
            for row in rows {
                campaigns.push(row?);
            }
            Ok(campaigns)
        })
        .await
        .map_err(map_db_err)
}

/// All campaigns currently in `status` (crash recovery, reporting).
pub async fn list_in_status(
    db: &Database,
    status: CampaignStatus,
) -> Result<Vec<Campaign>, CadenzaError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CAMPAIGN_COLS} FROM campaigns WHERE status = ?1 ORDER BY id ASC"
            ))?;
            let rows = stmt.query_map(params![status.to_string()], row_to_campaign)?;
            let mut campaigns = Vec::new();
            for row in rows {
                campaigns.push(row?);
            }
            Ok(campaigns)
        })
        .await
        .map_err(map_db_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    use crate::queries::templates;

    async fn setup() -> (Database, i64, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("campaigns.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        let template_id = templates::insert(
            &db,
            templates::NewTemplate {
                name: "t".into(),
                channel: "whatsapp".into(),
                locale: "en_US".into(),
                content: "hi".into(),
                variables: vec![],
            },
            Utc::now(),
        )
        .await
        .unwrap();
        (db, template_id, dir)
    }

    fn draft(template_id: i64) -> NewCampaign {
        NewCampaign {
            topic: "alerts".into(),
            template_id,
            segment_id: None,
            schedule_time: None,
            rate_limit_per_second: 5,
            quiet_hours_start: None,
            quiet_hours_end: None,
            quiet_tz: "UTC".into(),
        }
    }

    #[tokio::test]
    async fn insert_and_transition_lifecycle() {
        let (db, template_id, _dir) = setup().await;
        let now = Utc::now();
        let id = insert(&db, draft(template_id), now).await.unwrap();

        let campaign = get(&db, id).await.unwrap().unwrap();
        assert_eq!(campaign.status, CampaignStatus::Draft);

        assert!(
            transition_status(&db, id, CampaignStatus::Draft, CampaignStatus::Ready, now)
                .await
                .unwrap()
        );
        assert!(
            transition_status(&db, id, CampaignStatus::Ready, CampaignStatus::Running, now)
                .await
                .unwrap()
        );
        // Losing CAS: already RUNNING.
        assert!(
            !transition_status(&db, id, CampaignStatus::Ready, CampaignStatus::Running, now)
                .await
                .unwrap()
        );
        // Illegal edge is rejected outright.
        assert!(transition_status(
            &db,
            id,
            CampaignStatus::Running,
            CampaignStatus::Draft,
            now
        )
        .await
        .is_err());
    }

    #[tokio::test]
    async fn rate_limit_must_be_positive() {
        let (db, template_id, _dir) = setup().await;
        let mut campaign = draft(template_id);
        campaign.rate_limit_per_second = 0;
        assert!(insert(&db, campaign, Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn unresolved_template_is_rejected() {
        let (db, _template_id, _dir) = setup().await;
        let campaign = NewCampaign {
            template_id: 9999,
            ..draft(1)
        };
        assert!(insert(&db, campaign, Utc::now()).await.is_err());
    }

    #[tokio::test]
    async fn due_for_start_respects_schedule() {
        let (db, template_id, _dir) = setup().await;
        let now = Utc::now();

        let unscheduled = insert(&db, draft(template_id), now).await.unwrap();
        let future = insert(
            &db,
            NewCampaign {
                schedule_time: Some(now + chrono::Duration::hours(1)),
                ..draft(template_id)
            },
            now,
        )
        .await
        .unwrap();
        let past = insert(
            &db,
            NewCampaign {
                schedule_time: Some(now - chrono::Duration::hours(1)),
                ..draft(template_id)
            },
            now,
        )
        .await
        .unwrap();

        for id in [unscheduled, future, past] {
            transition_status(&db, id, CampaignStatus::Draft, CampaignStatus::Ready, now)
                .await
                .unwrap();
        }

        let due: Vec<i64> = due_for_start(&db, now)
            .await
            .unwrap()
            .into_iter()
            .map(|c| c.id)
            .collect();
        assert!(due.contains(&unscheduled));
        assert!(due.contains(&past));
        assert!(!due.contains(&future));
    }

    #[tokio::test]
    async fn cursor_round_trips() {
        let (db, template_id, _dir) = setup().await;
        let now = Utc::now();
        let id = insert(&db, draft(template_id), now).await.unwrap();

        set_cursor(&db, id, Some("+14155550042".into()), now)
            .await
            .unwrap();
        let campaign = get(&db, id).await.unwrap().unwrap();
        assert_eq!(campaign.materialize_cursor.as_deref(), Some("+14155550042"));
        assert!(campaign.materialized_at.is_none());

        mark_materialized(&db, id, now).await.unwrap();
        let campaign = get(&db, id).await.unwrap().unwrap();
        assert!(campaign.materialized_at.is_some());
    }
}
