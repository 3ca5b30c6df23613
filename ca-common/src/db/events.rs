//! Event queries

use crate::db::{parse_json_column, Event, EventType, NewEvent};
use crate::time::{from_db, to_db};
use crate::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

const EVENT_COLUMNS: &str =
    "event_id, user_id, product_id, event_type, event_timestamp, properties";

fn event_from_row(row: &SqliteRow) -> Result<Event> {
    Ok(Event {
        event_id: row.try_get("event_id")?,
        user_id: row.try_get("user_id")?,
        product_id: row.try_get("product_id")?,
        event_type: EventType::from(row.try_get::<String, _>("event_type")?),
        event_timestamp: from_db(&row.try_get::<String, _>("event_timestamp")?)?,
        properties: parse_json_column(row.try_get("properties")?)?,
    })
}

/// Insert a single event, returning the new `event_id`
pub async fn insert_event(pool: &SqlitePool, event: &NewEvent) -> Result<i64> {
    let result = sqlx::query(
        r#"
        INSERT INTO events (user_id, product_id, event_type, event_timestamp, properties)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(event.user_id)
    .bind(event.product_id)
    .bind(event.event_type.as_str())
    .bind(to_db(event.event_timestamp))
    .bind(event.properties.to_string())
    .execute(pool)
    .await?;

    Ok(result.last_insert_rowid())
}

/// Insert many events in one transaction; all or nothing
pub async fn insert_events_batch(pool: &SqlitePool, events: &[NewEvent]) -> Result<u64> {
    let mut tx = pool.begin().await?;
    let mut inserted = 0;

    for event in events {
        sqlx::query(
            r#"
            INSERT INTO events (user_id, product_id, event_type, event_timestamp, properties)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(event.user_id)
        .bind(event.product_id)
        .bind(event.event_type.as_str())
        .bind(to_db(event.event_timestamp))
        .bind(event.properties.to_string())
        .execute(&mut *tx)
        .await?;
        inserted += 1;
    }

    tx.commit().await?;
    Ok(inserted)
}

/// All events of one user, oldest first
pub async fn events_for_user(pool: &SqlitePool, user_id: i64) -> Result<Vec<Event>> {
    let sql = format!(
        "SELECT {} FROM events WHERE user_id = ? ORDER BY event_timestamp, event_id",
        EVENT_COLUMNS
    );
    let rows = sqlx::query(&sql).bind(user_id).fetch_all(pool).await?;
    rows.iter().map(event_from_row).collect()
}

/// Events of several users grouped by user id, each list oldest first
///
/// Users without events are absent from the map.
pub async fn events_for_users(
    pool: &SqlitePool,
    user_ids: &[i64],
) -> Result<HashMap<i64, Vec<Event>>> {
    let mut grouped: HashMap<i64, Vec<Event>> = HashMap::new();

    // Stay well below SQLite's bound-parameter limit
    for chunk in user_ids.chunks(500) {
        if chunk.is_empty() {
            continue;
        }
        let placeholders = vec!["?"; chunk.len()].join(", ");
        let sql = format!(
            "SELECT {} FROM events WHERE user_id IN ({}) ORDER BY user_id, event_timestamp, event_id",
            EVENT_COLUMNS, placeholders
        );
        let mut query = sqlx::query(&sql);
        for id in chunk {
            query = query.bind(*id);
        }
        for row in query.fetch_all(pool).await? {
            let event = event_from_row(&row)?;
            grouped.entry(event.user_id).or_default().push(event);
        }
    }

    Ok(grouped)
}

/// Every event, grouped by user id, each list oldest first
pub async fn all_events_by_user(pool: &SqlitePool) -> Result<HashMap<i64, Vec<Event>>> {
    let sql = format!(
        "SELECT {} FROM events ORDER BY user_id, event_timestamp, event_id",
        EVENT_COLUMNS
    );
    let mut grouped: HashMap<i64, Vec<Event>> = HashMap::new();
    for row in sqlx::query(&sql).fetch_all(pool).await? {
        let event = event_from_row(&row)?;
        grouped.entry(event.user_id).or_default().push(event);
    }
    Ok(grouped)
}

pub async fn count_events(pool: &SqlitePool) -> Result<i64> {
    let count = sqlx::query_scalar("SELECT COUNT(*) FROM events")
        .fetch_one(pool)
        .await?;
    Ok(count)
}

/// Whether the user has at least one event at or after `since`
pub async fn has_events_since(
    pool: &SqlitePool,
    user_id: i64,
    since: DateTime<Utc>,
) -> Result<bool> {
    let found: Option<i64> = sqlx::query_scalar(
        "SELECT 1 FROM events WHERE user_id = ? AND event_timestamp >= ? LIMIT 1",
    )
    .bind(user_id)
    .bind(to_db(since))
    .fetch_optional(pool)
    .await?;
    Ok(found.is_some())
}
