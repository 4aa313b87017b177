//! Best-effort push of committed events to replicas.
//!
//! Each replica gets exactly one POST with a bounded timeout, on its own task,
//! so the request that produced the event never waits on a replica. Failures
//! are not retried or queued: they are logged, counted, and left for the
//! replica's catch-up loop to repair.

use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::event::{Event, PushEvent};

pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Delivered,
    Failed,
}

#[derive(Default)]
struct PushStats {
    attempted: AtomicU64,
    delivered: AtomicU64,
    failed: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PushStatsSnapshot {
    pub attempted: u64,
    pub delivered: u64,
    pub failed: u64,
}

/// In-flight deliveries of one event. Dropping it detaches the tasks.
pub struct PushHandle {
    tasks: Vec<JoinHandle<PushOutcome>>,
}

impl PushHandle {
    /// Waits for every delivery attempt to finish.
    pub async fn outcomes(self) -> Vec<PushOutcome> {
        let mut outcomes = Vec::with_capacity(self.tasks.len());
        for task in self.tasks {
            outcomes.push(task.await.unwrap_or(PushOutcome::Failed));
        }
        outcomes
    }
}

#[derive(Clone)]
pub struct Publisher {
    client: reqwest::Client,
    replicas: Arc<[String]>,
    stats: Arc<PushStats>,
}

impl Publisher {
    /// `replicas` are base URLs; an empty list runs the primary on its own.
    pub fn new(replicas: Vec<String>, timeout: Duration) -> reqwest::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        let replicas: Vec<String> = replicas
            .into_iter()
            .map(|url| url.trim_end_matches('/').to_string())
            .filter(|url| !url.is_empty())
            .collect();
        Ok(Self {
            client,
            replicas: replicas.into(),
            stats: Arc::new(PushStats::default()),
        })
    }

    pub fn replicas(&self) -> &[String] {
        &self.replicas
    }

    pub fn stats(&self) -> PushStatsSnapshot {
        PushStatsSnapshot {
            attempted: self.stats.attempted.load(Ordering::Relaxed),
            delivered: self.stats.delivered.load(Ordering::Relaxed),
            failed: self.stats.failed.load(Ordering::Relaxed),
        }
    }

    /// Starts one delivery per replica and returns immediately. Must only be
    /// called for events whose append has committed.
    pub fn publish(&self, event: &Event) -> PushHandle {
        let body = match event.to_wire() {
            Ok(wire) => Arc::new(PushEvent::from(wire)),
            Err(err) => {
                warn!(event_id = event.id, error = %err, "failed to encode event for push");
                return PushHandle { tasks: Vec::new() };
            }
        };

        let tasks = self
            .replicas
            .iter()
            .map(|replica| {
                let client = self.client.clone();
                let stats = Arc::clone(&self.stats);
                let body = Arc::clone(&body);
                let url = format!("{replica}/replicate");
                tokio::spawn(async move { push_one(client, stats, url, body).await })
            })
            .collect();

        PushHandle { tasks }
    }
}

async fn push_one(
    client: reqwest::Client,
    stats: Arc<PushStats>,
    url: String,
    body: Arc<PushEvent>,
) -> PushOutcome {
    stats.attempted.fetch_add(1, Ordering::Relaxed);

    let result = client
        .post(&url)
        .json(body.as_ref())
        .send()
        .await
        .and_then(|response| response.error_for_status());

    match result {
        Ok(_) => {
            stats.delivered.fetch_add(1, Ordering::Relaxed);
            debug!(%url, event_id = body.event_id, "pushed event");
            PushOutcome::Delivered
        }
        Err(err) => {
            stats.failed.fetch_add(1, Ordering::Relaxed);
            warn!(
                %url,
                event_id = body.event_id,
                error = %err,
                "push failed; replica will catch up"
            );
            PushOutcome::Failed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{DeletePost, EventPayload};
    use chrono::Utc;

    fn event() -> Event {
        Event {
            id: 1,
            payload: EventPayload::DeletePost(DeletePost { post_id: 1 }),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn no_replicas_means_no_work() {
        let publisher = Publisher::new(Vec::new(), DEFAULT_PUSH_TIMEOUT).expect("client");
        let outcomes = publisher.publish(&event()).outcomes().await;
        assert!(outcomes.is_empty());
        assert_eq!(publisher.stats().attempted, 0);
    }

    #[tokio::test]
    async fn unreachable_replica_is_counted_not_raised() {
        // Nothing listens on port 9 of the loopback interface.
        let publisher = Publisher::new(
            vec!["http://127.0.0.1:9/".into(), String::new()],
            Duration::from_millis(300),
        )
        .expect("client");
        assert_eq!(
            publisher.replicas().to_vec(),
            vec!["http://127.0.0.1:9".to_string()]
        );

        let outcomes = publisher.publish(&event()).outcomes().await;

        assert_eq!(outcomes, vec![PushOutcome::Failed]);
        assert_eq!(
            publisher.stats(),
            PushStatsSnapshot {
                attempted: 1,
                delivered: 0,
                failed: 1,
            }
        );
    }
}
