//! Event applier: one event in, storage mutations out.
//!
//! The primary runs this against its own tables while accepting a write and
//! every replica runs it for pushed or pulled events. Each variant can be
//! applied any number of times and in any order relative to the rows it
//! references; foreign references are never checked here.

use rusqlite::{Connection, params};
use serde_json::Value;
use tracing::{debug, warn};

use crate::{
    error::{IngestError, StoreError},
    event::{CommentPost, CreatePost, DeletePost, EventPayload, EventType, ReactPost, UpdatePost},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// The event was applied; `rows` is how many rows actually changed.
    Applied { rows: usize },
    /// Unknown event type; nothing was touched.
    Ignored,
}

/// Applies a typed payload. Callers that need the multi-statement variants to
/// be atomic pass a transaction.
pub fn apply(conn: &Connection, payload: &EventPayload) -> Result<usize, StoreError> {
    let rows = match payload {
        EventPayload::CreatePost(p) => create_post(conn, p)?,
        EventPayload::ReactPost(p) => react_post(conn, p)?,
        EventPayload::CommentPost(p) => comment_post(conn, p)?,
        EventPayload::UpdatePost(p) => update_post(conn, p)?,
        EventPayload::DeletePost(p) => delete_post(conn, p)?,
    };
    debug!(event_type = %payload.event_type(), post_id = payload.post_id(), rows, "applied event");
    Ok(rows)
}

/// Decodes an untyped `(event_type, payload)` pair and applies it in its own
/// transaction. Unknown types are logged and ignored.
pub fn apply_raw(
    conn: &mut Connection,
    event_type: &str,
    payload: Value,
) -> Result<ApplyOutcome, IngestError> {
    let Some(payload) = decode_raw(event_type, payload)? else {
        return Ok(ApplyOutcome::Ignored);
    };
    let tx = conn.transaction()?;
    let rows = apply(&tx, &payload)?;
    tx.commit()?;
    Ok(ApplyOutcome::Applied { rows })
}

/// `Ok(None)` for an unrecognised type, `Err` when a known type's payload is
/// missing required fields.
pub fn decode_raw(event_type: &str, payload: Value) -> Result<Option<EventPayload>, IngestError> {
    let kind: EventType = match event_type.parse() {
        Ok(kind) => kind,
        Err(err) => {
            warn!(%err, "ignoring event with unrecognised type");
            return Ok(None);
        }
    };
    EventPayload::from_parts(kind, payload)
        .map(Some)
        .map_err(|e| IngestError::Malformed(format!("{kind} payload: {e}")))
}

fn create_post(conn: &Connection, p: &CreatePost) -> rusqlite::Result<usize> {
    conn.execute(
        "INSERT OR IGNORE INTO posts (id, user_id, title, content, image_filename)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![p.post_id, p.user_id, p.title, p.content, p.image_filename],
    )
}

fn react_post(conn: &Connection, p: &ReactPost) -> rusqlite::Result<usize> {
    // Single statement: the upsert is atomic against UNIQUE(user_id, post_id).
    conn.execute(
        "INSERT INTO reactions (user_id, post_id, reaction_type) VALUES (?1, ?2, ?3)
         ON CONFLICT(user_id, post_id) DO UPDATE SET reaction_type = excluded.reaction_type
         WHERE reactions.reaction_type <> excluded.reaction_type",
        params![p.user_id, p.post_id, p.reaction_type],
    )
}

fn comment_post(conn: &Connection, p: &CommentPost) -> rusqlite::Result<usize> {
    // parent_comment_id may point at a comment that has not arrived yet.
    conn.execute(
        "INSERT OR IGNORE INTO comments (id, user_id, post_id, content, parent_comment_id)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![p.comment_id, p.user_id, p.post_id, p.content, p.parent_comment_id],
    )
}

fn update_post(conn: &Connection, p: &UpdatePost) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE posts SET title = ?1, content = ?2, image_filename = ?3 WHERE id = ?4",
        params![p.title, p.content, p.image_filename, p.post_id],
    )
}

fn delete_post(conn: &Connection, p: &DeletePost) -> rusqlite::Result<usize> {
    let mut rows = conn.execute("DELETE FROM posts WHERE id = ?1", params![p.post_id])?;
    for table in ["reactions", "comments"] {
        let sql = format!("DELETE FROM {table} WHERE post_id = ?1");
        rows += conn.execute(&sql, params![p.post_id])?;
    }
    Ok(rows)
}
