//! Pull-based resynchronization of a replica.
//!
//! The replica remembers the id of the last event it applied from the
//! primary's log (`replica_meta.last_event_id`) and periodically asks for
//! everything after it. Each event is applied in the same transaction that
//! moves the cursor, so the cursor never gets ahead of the data.

use std::{future::Future, time::Duration};

use rusqlite::Connection;
use serde::Serialize;
use tokio::{select, time::MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::{
    apply::{apply, decode_raw},
    error::{IngestError, StoreError, SyncError},
    event::WireEvent,
    store::{Store, meta_get, meta_set},
};

pub const CURSOR_KEY: &str = "last_event_id";
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_SYNC_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct SyncReport {
    /// Events returned by the primary.
    pub fetched: usize,
    /// Events that moved the cursor, including unknown or undecodable ones.
    pub advanced: usize,
    /// Cursor after the round.
    pub cursor: i64,
}

/// Current cursor; 0 before the first successful sync.
pub fn read_cursor(conn: &Connection) -> Result<i64, StoreError> {
    match meta_get(conn, CURSOR_KEY)? {
        None => Ok(0),
        Some(raw) => match raw.parse::<i64>() {
            Ok(cursor) => Ok(cursor.max(0)),
            Err(err) => {
                // Replaying from the start is safe, the applier is idempotent.
                warn!(%raw, %err, "unreadable catch-up cursor; starting over");
                Ok(0)
            }
        },
    }
}

/// Applies a batch fetched from `/sync`, advancing the cursor per event.
pub fn apply_batch(
    conn: &mut Connection,
    mut events: Vec<WireEvent>,
) -> Result<SyncReport, StoreError> {
    events.sort_by_key(|event| event.id);

    let mut report = SyncReport {
        fetched: events.len(),
        advanced: 0,
        cursor: read_cursor(conn)?,
    };

    for event in events {
        if event.id <= report.cursor {
            debug!(
                event_id = event.id,
                cursor = report.cursor,
                "skipping already applied event"
            );
            continue;
        }

        let tx = conn.transaction()?;
        match decode_raw(&event.event_type, event.payload) {
            Ok(Some(payload)) => {
                apply(&tx, &payload)?;
            }
            Ok(None) => {}
            Err(IngestError::Malformed(reason)) => {
                warn!(event_id = event.id, %reason, "skipping undecodable event from primary");
            }
            Err(IngestError::Store(err)) => return Err(err),
        }
        meta_set(&tx, CURSOR_KEY, &event.id.to_string())?;
        tx.commit()?;

        report.cursor = event.id;
        report.advanced += 1;
    }

    Ok(report)
}

#[derive(Clone)]
pub struct CatchUp {
    client: reqwest::Client,
    primary_url: String,
    store: Store,
}

impl CatchUp {
    pub fn new(
        primary_url: impl Into<String>,
        store: Store,
        timeout: Duration,
    ) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            primary_url: primary_url.into().trim_end_matches('/').to_string(),
            store,
        })
    }

    pub fn primary_url(&self) -> &str {
        &self.primary_url
    }

    pub async fn cursor(&self) -> Result<i64, StoreError> {
        self.store.with_connection(|conn| read_cursor(conn)).await
    }

    /// One round: fetch everything after the cursor and apply it.
    pub async fn sync_once(&self) -> Result<SyncReport, SyncError> {
        let cursor = self.cursor().await?;

        let events: Vec<WireEvent> = self
            .client
            .get(format!("{}/sync", self.primary_url))
            .query(&[("last_event_id", cursor)])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if events.is_empty() {
            return Ok(SyncReport {
                cursor,
                ..SyncReport::default()
            });
        }

        let report = self
            .store
            .with_connection(move |conn| apply_batch(conn, events))
            .await?;
        Ok(report)
    }

    /// Syncs once immediately, then every `interval` until `shutdown` resolves.
    /// Failed rounds are logged and retried on the next tick.
    pub async fn run<F>(self, interval: Duration, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tokio::pin!(shutdown);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = &mut shutdown => {
                    info!(primary = %self.primary_url, "catch-up loop stopping");
                    break;
                }
                _ = ticker.tick() => match self.sync_once().await {
                    Ok(report) if report.advanced > 0 => {
                        info!(
                            advanced = report.advanced,
                            cursor = report.cursor,
                            "caught up with primary"
                        );
                    }
                    Ok(report) => debug!(cursor = report.cursor, "already up to date"),
                    Err(err) => {
                        warn!(primary = %self.primary_url, error = %err, "catch-up round failed");
                    }
                },
            }
        }
    }
}
