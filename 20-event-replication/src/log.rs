//! Append-only event log.
//!
//! Ids come from the `events_log` AUTOINCREMENT sequence. Appends happen
//! inside the caller's transaction and the store serializes writers, so a
//! rolled-back append also rolls back its id and the sequence stays gapless.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, params};

use crate::{
    error::StoreError,
    event::{Event, EventPayload, EventType},
    store::Store,
};

/// Appends `payload` using an open connection or transaction. Durable once
/// the surrounding transaction commits.
pub fn append(conn: &Connection, payload: &EventPayload) -> Result<Event, StoreError> {
    let created_at = Utc::now();
    let event_type = payload.event_type();
    let encoded = serde_json::to_string(&payload.to_value()?)?;
    conn.execute(
        "INSERT INTO events_log (event_type, payload, created_at) VALUES (?1, ?2, ?3)",
        params![event_type.as_str(), encoded, created_at.to_rfc3339()],
    )?;
    Ok(Event {
        id: conn.last_insert_rowid(),
        payload: payload.clone(),
        created_at,
    })
}

/// Every event with `id > cursor`, ascending by id.
pub fn read_since(conn: &Connection, cursor: i64) -> Result<Vec<Event>, StoreError> {
    let mut stmt = conn.prepare(
        "SELECT id, event_type, payload, created_at FROM events_log WHERE id > ?1 ORDER BY id ASC",
    )?;
    let rows = stmt
        .query_map(params![cursor], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, event_type, payload, created_at)| {
            decode_row(id, &event_type, &payload, &created_at)
        })
        .collect()
}

/// Highest id in the log, 0 when empty.
pub fn last_id(conn: &Connection) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(id), 0) FROM events_log",
        [],
        |row| row.get(0),
    )?)
}

fn decode_row(
    id: i64,
    event_type: &str,
    payload: &str,
    created_at: &str,
) -> Result<Event, StoreError> {
    let corrupt = |reason: String| StoreError::CorruptEvent { id, reason };

    let event_type: EventType = event_type.parse().map_err(|e| corrupt(format!("{e}")))?;
    let payload = serde_json::from_str(payload).map_err(|e| corrupt(format!("payload: {e}")))?;
    let payload = EventPayload::from_parts(event_type, payload)
        .map_err(|e| corrupt(format!("payload: {e}")))?;
    let created_at = DateTime::parse_from_rfc3339(created_at)
        .map_err(|e| corrupt(format!("created_at: {e}")))?
        .with_timezone(&Utc);

    Ok(Event {
        id,
        payload,
        created_at,
    })
}

/// Read side of the log for callers outside a write transaction. Appends
/// always go through [`append`] inside the writer's transaction.
#[derive(Clone)]
pub struct EventLog {
    store: Store,
}

impl EventLog {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn read_since(&self, cursor: i64) -> Result<Vec<Event>, StoreError> {
        self.store
            .with_connection(move |conn| read_since(conn, cursor))
            .await
    }

    pub async fn last_id(&self) -> Result<i64, StoreError> {
        self.store.with_connection(|conn| last_id(conn)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DeletePost, ReactPost};

    fn react(user_id: i64, post_id: i64, reaction_type: &str) -> EventPayload {
        EventPayload::ReactPost(ReactPost {
            post_id,
            user_id,
            reaction_type: reaction_type.into(),
        })
    }

    async fn append_committed(store: &Store, payload: EventPayload) -> Event {
        store
            .with_connection(move |conn| -> Result<_, StoreError> {
                let tx = conn.transaction()?;
                let event = append(&tx, &payload)?;
                tx.commit()?;
                Ok(event)
            })
            .await
            .expect("append")
    }

    #[tokio::test]
    async fn ids_start_at_one_and_increment() {
        let store = Store::open_in_memory().await.expect("open");
        let log = EventLog::new(store.clone());

        let first = append_committed(&store, react(1, 1, "like")).await;
        let second = append_committed(&store, react(2, 1, "love")).await;

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(log.last_id().await.expect("last id"), 2);
    }

    #[tokio::test]
    async fn concurrent_appends_are_gapless() {
        let store = Store::open_in_memory().await.expect("open");

        let mut tasks = Vec::new();
        for n in 0..40 {
            let store = store.clone();
            tasks.push(tokio::spawn(async move {
                append_committed(&store, react(n, n % 3, "like")).await.id
            }));
        }

        let mut ids = Vec::new();
        for task in tasks {
            ids.push(task.await.expect("join"));
        }
        ids.sort_unstable();

        assert_eq!(ids, (1..=40).collect::<Vec<i64>>());
    }

    #[tokio::test]
    async fn read_since_is_exclusive_ordered_and_repeatable() {
        let store = Store::open_in_memory().await.expect("open");
        let log = EventLog::new(store.clone());
        for n in 1..=5 {
            append_committed(&store, EventPayload::DeletePost(DeletePost { post_id: n })).await;
        }

        let tail = log.read_since(3).await.expect("read");
        assert_eq!(tail.iter().map(|e| e.id).collect::<Vec<_>>(), vec![4, 5]);
        assert_eq!(tail, log.read_since(3).await.expect("read again"));

        let all = log.read_since(0).await.expect("read all");
        assert_eq!(all.len(), 5);
        assert_eq!(
            all[0].payload,
            EventPayload::DeletePost(DeletePost { post_id: 1 })
        );

        assert!(log.read_since(5).await.expect("read none").is_empty());
    }

    #[tokio::test]
    async fn rolled_back_append_does_not_consume_an_id() {
        let store = Store::open_in_memory().await.expect("open");
        append_committed(&store, react(1, 1, "like")).await;

        store
            .with_connection(|conn| -> Result<(), StoreError> {
                let tx = conn.transaction()?;
                append(&tx, &react(2, 1, "like"))?;
                tx.rollback()?;
                Ok(())
            })
            .await
            .expect("rollback");

        let next = append_committed(&store, react(3, 1, "like")).await;
        assert_eq!(next.id, 2);
    }
}
