//! HTTP surface of both roles.
//!
//! The read views and `/health` are shared; [`primary`] adds the write API
//! and the `/sync` feed, [`replica`] adds the push endpoints.

pub mod primary;
pub mod replica;

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use serde_json::json;
use tracing::error;

use crate::{
    error::{IngestError, StoreError, WriteError},
    store::Store,
    views::{self, PostView, ReactionSummary},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Primary,
    Replica,
}

/// Error body returned to clients: `{"ok": false, "error": "..."}`.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(json!({ "ok": false, "error": self.message }));
        (self.status, body).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        error!(error = %err, "storage failure");
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: "storage failure".to_string(),
        }
    }
}

impl From<WriteError> for ApiError {
    fn from(err: WriteError) -> Self {
        match err {
            WriteError::Invalid(message) => Self::bad_request(message),
            err @ WriteError::NotFound { .. } => Self {
                status: StatusCode::NOT_FOUND,
                message: err.to_string(),
            },
            WriteError::Store(err) => err.into(),
        }
    }
}

impl From<IngestError> for ApiError {
    fn from(err: IngestError) -> Self {
        match err {
            IngestError::Malformed(message) => Self::bad_request(message),
            IngestError::Store(err) => err.into(),
        }
    }
}

/// Unwraps a JSON body, reporting any decoding failure as 400.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|rejection| ApiError::bad_request(rejection.body_text()))
}

#[derive(Clone)]
struct ReadState {
    store: Store,
    node: Arc<str>,
    role: Role,
}

/// `/health`, `/posts` and `/api/reactions_summary`, bound to one node's store.
pub fn read_routes(store: Store, node: &str, role: Role) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/posts", get(list_posts))
        .route("/api/reactions_summary", get(reactions_summary))
        .with_state(ReadState {
            store,
            node: node.into(),
            role,
        })
}

async fn health(State(state): State<ReadState>) -> Json<serde_json::Value> {
    Json(json!({
        "ok": true,
        "node": &*state.node,
        "role": state.role,
    }))
}

async fn list_posts(State(state): State<ReadState>) -> Result<Json<Vec<PostView>>, ApiError> {
    let posts = state
        .store
        .with_connection(|conn| views::list_posts(conn))
        .await?;
    Ok(Json(posts))
}

async fn reactions_summary(
    State(state): State<ReadState>,
) -> Result<Json<Vec<ReactionSummary>>, ApiError> {
    let summary = state
        .store
        .with_connection(|conn| views::reactions_summary(conn))
        .await?;
    Ok(Json(summary))
}

#[cfg(test)]
pub(crate) mod test_support {
    use axum::{
        Router,
        body::{Body, to_bytes},
        http::{Request, StatusCode, header},
    };
    use serde_json::Value;
    use tower::ServiceExt;

    pub async fn send(
        router: &Router,
        method: &str,
        uri: &str,
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string())),
            None => builder.body(Body::empty()),
        }
        .expect("request");

        let response = router.clone().oneshot(request).await.expect("response");
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        (status, value)
    }
}
