//! Write path of the primary.
//!
//! Every accepted write is one storage transaction: allocate the entity id,
//! build the payload, apply it to the primary's own tables, append it to the
//! log, commit. The event is published only after the commit succeeds, so a
//! replica can never see an event the primary does not have.

use rusqlite::{Connection, OptionalExtension, params};
use serde::Deserialize;
use tracing::info;

use crate::{
    apply::apply,
    error::WriteError,
    event::{CommentPost, CreatePost, DeletePost, Event, EventPayload, ReactPost, UpdatePost},
    log::{self, EventLog},
    publish::Publisher,
    store::Store,
    views::{self, ReactionSummary},
};

pub const DEFAULT_REACTION: &str = "like";

#[derive(Debug, Clone, Deserialize)]
pub struct NewPost {
    pub user_id: i64,
    pub title: String,
    pub content: String,
    #[serde(default)]
    pub image_filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewReaction {
    pub user_id: i64,
    #[serde(default)]
    pub reaction_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewComment {
    pub user_id: i64,
    pub content: String,
    #[serde(default)]
    pub parent_comment_id: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PostEdit {
    pub title: String,
    pub content: String,
    /// `None` keeps the current image.
    #[serde(default)]
    pub image_filename: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommentReceipt {
    pub comment_id: i64,
    /// Comments on the post after the insert.
    pub comments_count: i64,
}

#[derive(Clone)]
pub struct Primary {
    store: Store,
    log: EventLog,
    publisher: Publisher,
}

impl Primary {
    pub fn new(store: Store, publisher: Publisher) -> Self {
        Self {
            log: EventLog::new(store.clone()),
            store,
            publisher,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn log(&self) -> &EventLog {
        &self.log
    }

    pub fn publisher(&self) -> &Publisher {
        &self.publisher
    }

    pub async fn create_post(&self, post: NewPost) -> Result<Event, WriteError> {
        let title = required(&post.title, "title")?;
        let content = required(&post.content, "content")?;
        let image_filename = post.image_filename.filter(|name| !name.trim().is_empty());

        self.commit(move |conn| {
            Ok(EventPayload::CreatePost(CreatePost {
                post_id: next_id(conn, "posts")?,
                user_id: post.user_id,
                title,
                content,
                image_filename,
            }))
        })
        .await
    }

    /// Returns the event and the post's reaction summary after the upsert.
    pub async fn react(
        &self,
        post_id: i64,
        reaction: NewReaction,
    ) -> Result<(Event, ReactionSummary), WriteError> {
        let reaction_type = reaction
            .reaction_type
            .map(|t| t.trim().to_string())
            .filter(|t| !t.is_empty())
            .unwrap_or_else(|| DEFAULT_REACTION.to_string());

        self.commit_then(
            move |_| {
                let payload = EventPayload::ReactPost(ReactPost {
                    post_id,
                    user_id: reaction.user_id,
                    reaction_type,
                });
                Ok((payload, ()))
            },
            move |conn, ()| Ok(views::post_summary(conn, post_id)?),
        )
        .await
    }

    pub async fn comment(
        &self,
        post_id: i64,
        comment: NewComment,
    ) -> Result<(Event, CommentReceipt), WriteError> {
        let content = required(&comment.content, "content")?;

        self.commit_then(
            move |conn| {
                let comment_id = next_id(conn, "comments")?;
                let payload = EventPayload::CommentPost(CommentPost {
                    comment_id,
                    post_id,
                    user_id: comment.user_id,
                    content,
                    parent_comment_id: comment.parent_comment_id,
                });
                Ok((payload, comment_id))
            },
            move |conn, comment_id| {
                Ok(CommentReceipt {
                    comment_id,
                    comments_count: views::comments_count(conn, post_id)?,
                })
            },
        )
        .await
    }

    pub async fn update_post(&self, post_id: i64, edit: PostEdit) -> Result<Event, WriteError> {
        let title = required(&edit.title, "title")?;
        let content = required(&edit.content, "content")?;

        self.commit(move |conn| {
            let current_image = existing_post_image(conn, post_id)?;
            Ok(EventPayload::UpdatePost(UpdatePost {
                post_id,
                title,
                content,
                image_filename: edit.image_filename.or(current_image),
            }))
        })
        .await
    }

    pub async fn delete_post(&self, post_id: i64) -> Result<Event, WriteError> {
        self.commit(move |conn| {
            existing_post_image(conn, post_id)?;
            Ok(EventPayload::DeletePost(DeletePost { post_id }))
        })
        .await
    }

    async fn commit<B>(&self, build: B) -> Result<Event, WriteError>
    where
        B: FnOnce(&Connection) -> Result<EventPayload, WriteError> + Send + 'static,
    {
        let (event, ()) = self
            .commit_then(move |conn| Ok((build(conn)?, ())), |_, ()| Ok(()))
            .await?;
        Ok(event)
    }

    /// Runs the write transaction and publishes the committed event. `build`
    /// returns the payload plus a key that `read_back` receives after the
    /// apply, still inside the transaction.
    async fn commit_then<B, R, K, T>(
        &self,
        build: B,
        read_back: R,
    ) -> Result<(Event, T), WriteError>
    where
        B: FnOnce(&Connection) -> Result<(EventPayload, K), WriteError> + Send + 'static,
        R: FnOnce(&Connection, K) -> Result<T, WriteError> + Send + 'static,
        T: Send + 'static,
    {
        let (event, value) = self
            .store
            .with_connection(move |conn| -> Result<_, WriteError> {
                let tx = conn.transaction()?;
                let (payload, key) = build(&tx)?;
                apply(&tx, &payload)?;
                let event = log::append(&tx, &payload)?;
                let value = read_back(&tx, key)?;
                tx.commit()?;
                Ok((event, value))
            })
            .await?;

        info!(
            event_id = event.id,
            event_type = %event.event_type(),
            post_id = event.payload.post_id(),
            "committed write"
        );
        // Deliveries run detached; failures only show up in push stats.
        drop(self.publisher.publish(&event));
        Ok((event, value))
    }
}

fn required(value: &str, field: &str) -> Result<String, WriteError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(WriteError::Invalid(format!("{field} must not be empty")));
    }
    Ok(trimmed.to_string())
}

/// Next id from the table's AUTOINCREMENT sequence. Ids of deleted rows are
/// never handed out again.
fn next_id(conn: &Connection, table: &'static str) -> Result<i64, WriteError> {
    let sql = format!(
        "SELECT MAX(
            COALESCE((SELECT seq FROM sqlite_sequence WHERE name = ?1), 0),
            COALESCE((SELECT MAX(id) FROM {table}), 0)
        ) + 1"
    );
    Ok(conn.query_row(&sql, params![table], |row| row.get(0))?)
}

fn existing_post_image(conn: &Connection, post_id: i64) -> Result<Option<String>, WriteError> {
    conn.query_row(
        "SELECT image_filename FROM posts WHERE id = ?1",
        params![post_id],
        |row| row.get::<_, Option<String>>(0),
    )
    .optional()?
    .ok_or(WriteError::NotFound {
        entity: "post",
        id: post_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{publish::DEFAULT_PUSH_TIMEOUT, views::snapshot};

    async fn primary() -> Primary {
        let store = Store::open_in_memory().await.expect("open");
        let publisher = Publisher::new(Vec::new(), DEFAULT_PUSH_TIMEOUT).expect("publisher");
        Primary::new(store, publisher)
    }

    fn post(title: &str) -> NewPost {
        NewPost {
            user_id: 1,
            title: title.into(),
            content: "body".into(),
            image_filename: None,
        }
    }

    #[tokio::test]
    async fn writes_are_applied_and_logged_with_primary_ids() {
        let primary = primary().await;

        let created = primary.create_post(post("first")).await.expect("create");
        assert_eq!(created.id, 1);
        assert_eq!(created.payload.post_id(), 1);

        let (reacted, summary) = primary
            .react(
                1,
                NewReaction {
                    user_id: 2,
                    reaction_type: None,
                },
            )
            .await
            .expect("react");
        assert_eq!(reacted.id, 2);
        assert_eq!(summary.reactions.get(DEFAULT_REACTION), Some(&1));

        let (commented, receipt) = primary
            .comment(
                1,
                NewComment {
                    user_id: 2,
                    content: " hi ".into(),
                    parent_comment_id: None,
                },
            )
            .await
            .expect("comment");
        assert_eq!(commented.id, 3);
        assert_eq!(
            receipt,
            CommentReceipt {
                comment_id: 1,
                comments_count: 1,
            }
        );
        match &commented.payload {
            EventPayload::CommentPost(c) => {
                assert_eq!(c.comment_id, 1);
                assert_eq!(c.content, "hi");
            }
            other => panic!("unexpected payload {other:?}"),
        }

        let logged = primary.log().read_since(0).await.expect("log");
        assert_eq!(logged, vec![created, reacted, commented]);
    }

    #[tokio::test]
    async fn concurrent_writes_get_distinct_gapless_ids() {
        let primary = primary().await;

        let mut tasks = Vec::new();
        for n in 0..40 {
            let primary = primary.clone();
            tasks.push(tokio::spawn(async move {
                primary.create_post(post(&format!("post {n}"))).await
            }));
        }

        let mut event_ids = Vec::new();
        let mut post_ids = Vec::new();
        for task in tasks {
            let event = task.await.expect("join").expect("create");
            event_ids.push(event.id);
            post_ids.push(event.payload.post_id());
        }
        event_ids.sort_unstable();
        post_ids.sort_unstable();

        let expected: Vec<i64> = (1..=40).collect();
        assert_eq!(event_ids, expected);
        assert_eq!(post_ids, expected);
        assert_eq!(primary.log().last_id().await.expect("last id"), 40);
    }

    #[tokio::test]
    async fn post_ids_are_not_reused_after_delete() {
        let primary = primary().await;
        primary.create_post(post("a")).await.expect("create");
        primary.create_post(post("b")).await.expect("create");
        primary.delete_post(2).await.expect("delete");

        let third = primary.create_post(post("c")).await.expect("create");
        assert_eq!(third.payload.post_id(), 3);
    }

    #[tokio::test]
    async fn rejected_writes_leave_no_trace() {
        let primary = primary().await;

        let err = primary.create_post(post("   ")).await.unwrap_err();
        assert!(matches!(err, WriteError::Invalid(_)));

        let err = primary.delete_post(42).await.unwrap_err();
        let WriteError::NotFound { entity, id } = err else {
            panic!("expected not found, got {err:?}");
        };
        assert_eq!((entity, id), ("post", 42));

        let err = primary
            .update_post(
                42,
                PostEdit {
                    title: "t".into(),
                    content: "c".into(),
                    image_filename: None,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, WriteError::NotFound { .. }));

        assert_eq!(primary.log().last_id().await.expect("last id"), 0);
    }

    #[tokio::test]
    async fn update_keeps_image_when_none_given() {
        let primary = primary().await;
        primary
            .create_post(NewPost {
                image_filename: Some("cat.png".into()),
                ..post("first")
            })
            .await
            .expect("create");

        let event = primary
            .update_post(
                1,
                PostEdit {
                    title: "edited".into(),
                    content: "new".into(),
                    image_filename: None,
                },
            )
            .await
            .expect("update");

        match event.payload {
            EventPayload::UpdatePost(u) => {
                assert_eq!(u.image_filename.as_deref(), Some("cat.png"))
            }
            other => panic!("unexpected payload {other:?}"),
        }
        let state = primary
            .store()
            .with_connection(|conn| snapshot(conn))
            .await
            .expect("snapshot");
        assert_eq!(state.posts[0].title, "edited");
    }

    #[tokio::test]
    async fn changing_a_reaction_replaces_it() {
        let primary = primary().await;
        primary.create_post(post("first")).await.expect("create");
        for kind in ["like", "love"] {
            primary
                .react(
                    1,
                    NewReaction {
                        user_id: 7,
                        reaction_type: Some(kind.into()),
                    },
                )
                .await
                .expect("react");
        }

        let state = primary
            .store()
            .with_connection(|conn| snapshot(conn))
            .await
            .expect("snapshot");
        assert_eq!(state.reactions.len(), 1);
        assert_eq!(state.reactions[0].reaction_type, "love");
    }
}
