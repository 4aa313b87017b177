//! Primary routes: the write API, the `/sync` catch-up feed and replication status.

use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    routing::{get, post, put},
};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::trace::TraceLayer;

use super::{ApiError, Role, json_body, read_routes};
use crate::{
    error::StoreError,
    event::WireEvent,
    primary::{NewComment, NewPost, NewReaction, PostEdit, Primary},
};

#[derive(Clone)]
struct PrimaryState {
    primary: Primary,
    node: Arc<str>,
}

pub fn router(primary: Primary, node: &str) -> Router {
    let writes = Router::new()
        .route("/posts", post(create_post))
        .route("/posts/:post_id", put(update_post).delete(delete_post))
        .route("/posts/:post_id/react", post(react))
        .route("/posts/:post_id/comments", post(comment))
        .route("/posts/:post_id/comment", post(comment))
        .route("/sync", get(sync))
        .route("/replication/status", get(status))
        .with_state(PrimaryState {
            primary: primary.clone(),
            node: node.into(),
        });

    writes
        .merge(read_routes(primary.store().clone(), node, Role::Primary))
        .layer(TraceLayer::new_for_http())
}

async fn create_post(
    State(state): State<PrimaryState>,
    body: Result<Json<NewPost>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let event = state.primary.create_post(json_body(body)?).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "ok": true,
            "event_id": event.id,
            "post_id": event.payload.post_id(),
        })),
    ))
}

async fn react(
    State(state): State<PrimaryState>,
    Path(post_id): Path<i64>,
    body: Result<Json<NewReaction>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let (event, summary) = state.primary.react(post_id, json_body(body)?).await?;
    Ok(Json(json!({
        "ok": true,
        "event_id": event.id,
        "post_id": summary.post_id,
        "reactions": summary.reactions,
        "comments_count": summary.comments_count,
    })))
}

async fn comment(
    State(state): State<PrimaryState>,
    Path(post_id): Path<i64>,
    body: Result<Json<NewComment>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let (event, receipt) = state.primary.comment(post_id, json_body(body)?).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "ok": true,
            "event_id": event.id,
            "post_id": post_id,
            "comment_id": receipt.comment_id,
            "comments_count": receipt.comments_count,
        })),
    ))
}

async fn update_post(
    State(state): State<PrimaryState>,
    Path(post_id): Path<i64>,
    body: Result<Json<PostEdit>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let event = state.primary.update_post(post_id, json_body(body)?).await?;
    Ok(written(event.id, post_id))
}

async fn delete_post(
    State(state): State<PrimaryState>,
    Path(post_id): Path<i64>,
) -> Result<Json<Value>, ApiError> {
    let event = state.primary.delete_post(post_id).await?;
    Ok(written(event.id, post_id))
}

fn written(event_id: i64, post_id: i64) -> Json<Value> {
    Json(json!({
        "ok": true,
        "event_id": event_id,
        "post_id": post_id,
    }))
}

#[derive(Debug, Deserialize)]
struct SyncParams {
    #[serde(default)]
    last_event_id: Option<i64>,
}

/// Every logged event after `last_event_id`, oldest first.
async fn sync(
    State(state): State<PrimaryState>,
    Query(params): Query<SyncParams>,
) -> Result<Json<Vec<WireEvent>>, ApiError> {
    let cursor = params.last_event_id.unwrap_or(0).max(0);
    let events = state.primary.log().read_since(cursor).await?;

    let wire = events
        .iter()
        .map(|event| event.to_wire())
        .collect::<Result<Vec<_>, _>>()
        .map_err(StoreError::from)?;
    Ok(Json(wire))
}

async fn status(State(state): State<PrimaryState>) -> Result<Json<Value>, ApiError> {
    let last_event_id = state.primary.log().last_id().await?;
    let publisher = state.primary.publisher();
    Ok(Json(json!({
        "node": &*state.node,
        "role": Role::Primary,
        "last_event_id": last_event_id,
        "replicas": publisher.replicas(),
        "push": publisher.stats(),
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        http::test_support::send,
        publish::{DEFAULT_PUSH_TIMEOUT, Publisher},
        store::Store,
    };

    async fn app() -> Router {
        let store = Store::open_in_memory().await.expect("open");
        let publisher = Publisher::new(Vec::new(), DEFAULT_PUSH_TIMEOUT).expect("publisher");
        router(Primary::new(store, publisher), "primary")
    }

    async fn seed(router: &Router, posts: usize) {
        for n in 0..posts {
            let (status, _) = send(
                router,
                "POST",
                "/posts",
                Some(json!({
                    "user_id": 1,
                    "title": format!("post {n}"),
                    "content": "body"
                })),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
        }
    }

    #[tokio::test]
    async fn create_react_and_comment() {
        let router = app().await;

        let (status, body) = send(
            &router,
            "POST",
            "/posts",
            Some(json!({"user_id": 1, "title": "hello", "content": "world"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body, json!({"ok": true, "event_id": 1, "post_id": 1}));

        let (status, body) = send(
            &router,
            "POST",
            "/posts/1/react",
            Some(json!({"user_id": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["reactions"], json!({"like": 1}));
        assert_eq!(body["event_id"], 2);

        let (status, body) = send(
            &router,
            "POST",
            "/posts/1/comments",
            Some(json!({"user_id": 2, "content": "nice"})),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["comment_id"], 1);
        assert_eq!(body["comments_count"], 1);

        let (_, posts) = send(&router, "GET", "/posts", None).await;
        assert_eq!(posts[0]["comments"][0]["content"], "nice");
    }

    #[tokio::test]
    async fn singular_comment_route_is_an_alias() {
        let router = app().await;
        seed(&router, 1).await;

        for uri in ["/posts/1/comment", "/posts/1/comments"] {
            let (status, body) = send(
                &router,
                "POST",
                uri,
                Some(json!({"user_id": 3, "content": "hey"})),
            )
            .await;
            assert_eq!(status, StatusCode::CREATED);
            assert_eq!(body["post_id"], 1);
        }

        let (_, body) = send(&router, "GET", "/api/reactions_summary", None).await;
        assert_eq!(body[0]["comments_count"], 2);
    }

    #[tokio::test]
    async fn invalid_writes_are_client_errors() {
        let router = app().await;

        let (status, _) = send(
            &router,
            "POST",
            "/posts",
            Some(json!({"user_id": 1, "title": " ", "content": "c"})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = send(&router, "POST", "/posts", Some(json!({"title": "t"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = send(&router, "DELETE", "/posts/9", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);

        let (_, sync) = send(&router, "GET", "/sync", None).await;
        assert_eq!(sync, json!([]));
    }

    #[tokio::test]
    async fn sync_returns_events_after_cursor() {
        let router = app().await;
        seed(&router, 5).await;

        let (status, body) = send(&router, "GET", "/sync?last_event_id=3", None).await;
        assert_eq!(status, StatusCode::OK);
        let ids: Vec<i64> = body
            .as_array()
            .expect("array")
            .iter()
            .map(|event| event["id"].as_i64().expect("id"))
            .collect();
        assert_eq!(ids, vec![4, 5]);
        assert_eq!(body[0]["event_type"], "CREATE_POST");
        assert_eq!(body[0]["payload"]["post_id"], 4);

        let (_, body) = send(&router, "GET", "/sync?last_event_id=-7", None).await;
        assert_eq!(body.as_array().map(Vec::len), Some(5));

        let (status, _) = send(&router, "GET", "/sync?last_event_id=abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn status_reports_log_head_and_push_stats() {
        let router = app().await;
        seed(&router, 2).await;

        let (status, body) = send(&router, "GET", "/replication/status", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["last_event_id"], 2);
        assert_eq!(body["role"], "primary");
        assert_eq!(
            body["push"],
            json!({"attempted": 0, "delivered": 0, "failed": 0})
        );
    }
}
