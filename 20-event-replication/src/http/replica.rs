//! Replica routes: push ingestion and replication status.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    routing::{get, post},
};
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use super::{ApiError, Role, read_routes};
use crate::{
    apply::ApplyOutcome,
    catchup::read_cursor,
    receiver::{IncomingEvent, Receiver},
    store::Store,
};

#[derive(Clone)]
struct ReplicaState {
    receiver: Receiver,
    store: Store,
    node: Arc<str>,
    primary_url: Option<Arc<str>>,
}

pub fn router(store: Store, node: &str, primary_url: Option<&str>) -> Router {
    let state = ReplicaState {
        receiver: Receiver::new(store.clone(), node),
        store: store.clone(),
        node: node.into(),
        primary_url: primary_url.map(Into::into),
    };

    Router::new()
        .route("/replicate", post(replicate))
        .route("/replicate-push", post(replicate))
        .route("/replication/status", get(status))
        .with_state(state)
        .merge(read_routes(store, node, Role::Replica))
        .layer(TraceLayer::new_for_http())
}

/// The body is decoded by hand so that any unusable body is a 400,
/// whatever its content type.
async fn replicate(
    State(state): State<ReplicaState>,
    body: Bytes,
) -> Result<Json<Value>, ApiError> {
    let incoming: IncomingEvent = serde_json::from_slice(&body)
        .map_err(|err| ApiError::bad_request(format!("invalid push body: {err}")))?;

    let outcome = state.receiver.ingest(incoming).await?;
    Ok(Json(json!({
        "ok": true,
        "applied": matches!(outcome, ApplyOutcome::Applied { .. }),
    })))
}

async fn status(State(state): State<ReplicaState>) -> Result<Json<Value>, ApiError> {
    let cursor = state.store.with_connection(|conn| read_cursor(conn)).await?;
    Ok(Json(json!({
        "node": &*state.node,
        "role": Role::Replica,
        "primary": state.primary_url.as_deref(),
        "last_event_id": cursor,
    })))
}
