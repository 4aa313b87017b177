//! Replica-side ingestion of pushed events.
//!
//! The receiver does not look at event ids and does not deduplicate: it
//! relies on the applier being idempotent. It also never moves the catch-up
//! cursor, so a push that skips ahead cannot hide a gap from catch-up.

use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, info};

use crate::{
    apply::{self, ApplyOutcome},
    error::IngestError,
    store::Store,
};

/// Untrusted push body. Fields are optional so that absence can be reported
/// as a client error instead of a generic decoding failure.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IncomingEvent {
    #[serde(default)]
    pub event_id: Option<i64>,
    #[serde(default)]
    pub event_type: Option<String>,
    #[serde(default)]
    pub payload: Option<Value>,
}

impl IncomingEvent {
    /// Checks that both `event_type` and a non-empty object `payload` are present.
    pub fn validate(self) -> Result<(String, Value), IngestError> {
        let event_type = self
            .event_type
            .filter(|t| !t.is_empty())
            .ok_or_else(|| IngestError::Malformed("missing event_type".into()))?;

        let payload = match self.payload {
            Some(Value::Object(map)) if !map.is_empty() => Value::Object(map),
            Some(Value::Object(_)) | Some(Value::Null) | None => {
                return Err(IngestError::Malformed("missing payload".into()));
            }
            Some(_) => return Err(IngestError::Malformed("payload must be an object".into())),
        };

        Ok((event_type, payload))
    }
}

#[derive(Clone)]
pub struct Receiver {
    store: Store,
    node_name: String,
}

impl Receiver {
    pub fn new(store: Store, node_name: impl Into<String>) -> Self {
        Self {
            store,
            node_name: node_name.into(),
        }
    }

    pub async fn ingest(&self, incoming: IncomingEvent) -> Result<ApplyOutcome, IngestError> {
        let event_id = incoming.event_id;
        let (event_type, payload) = incoming.validate()?;

        let outcome = {
            let event_type = event_type.clone();
            self.store
                .with_connection(move |conn| apply::apply_raw(conn, &event_type, payload))
                .await?
        };

        match outcome {
            ApplyOutcome::Applied { rows } => {
                debug!(
                    node = %self.node_name,
                    ?event_id,
                    %event_type,
                    rows,
                    "applied pushed event"
                );
            }
            ApplyOutcome::Ignored => {
                info!(node = %self.node_name, ?event_id, %event_type, "pushed event ignored");
            }
        }
        Ok(outcome)
    }
}
