//! Read-side queries over the materialized tables. Both roles serve these;
//! on a replica they reflect whatever has been applied so far.

use std::collections::BTreeMap;

use rusqlite::{Connection, params};
use serde::Serialize;

use crate::error::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PostRow {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub image_filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactionRow {
    pub user_id: i64,
    pub post_id: i64,
    pub reaction_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommentRow {
    pub id: i64,
    pub user_id: i64,
    pub post_id: i64,
    pub content: String,
    pub parent_comment_id: Option<i64>,
}

/// Replicated state of a node, ordered by key so two nodes can be compared.
/// Timestamps are node-local and left out.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct DomainSnapshot {
    pub posts: Vec<PostRow>,
    pub reactions: Vec<ReactionRow>,
    pub comments: Vec<CommentRow>,
}

pub fn snapshot(conn: &Connection) -> Result<DomainSnapshot, StoreError> {
    let posts = conn
        .prepare(
            "SELECT id, user_id, title, content, image_filename FROM posts ORDER BY id",
        )?
        .query_map([], |row| {
            Ok(PostRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                title: row.get(2)?,
                content: row.get(3)?,
                image_filename: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let reactions = conn
        .prepare(
            "SELECT user_id, post_id, reaction_type FROM reactions ORDER BY user_id, post_id",
        )?
        .query_map([], |row| {
            Ok(ReactionRow {
                user_id: row.get(0)?,
                post_id: row.get(1)?,
                reaction_type: row.get(2)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    let comments = comments_where(conn, "1 = 1", params![])?;

    Ok(DomainSnapshot {
        posts,
        reactions,
        comments,
    })
}

#[derive(Debug, Clone, Serialize)]
pub struct PostView {
    pub id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub image_filename: Option<String>,
    pub created_at: String,
    pub reactions_by_type: BTreeMap<String, i64>,
    pub comments: Vec<CommentRow>,
}

/// Timeline: newest post first, each with reaction counts and its comments.
pub fn list_posts(conn: &Connection) -> Result<Vec<PostView>, StoreError> {
    let posts = conn
        .prepare(
            "SELECT id, user_id, title, content, image_filename, created_at
             FROM posts ORDER BY created_at DESC, id DESC",
        )?
        .query_map([], |row| {
            Ok(PostView {
                id: row.get(0)?,
                user_id: row.get(1)?,
                title: row.get(2)?,
                content: row.get(3)?,
                image_filename: row.get(4)?,
                created_at: row.get(5)?,
                reactions_by_type: BTreeMap::new(),
                comments: Vec::new(),
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    posts
        .into_iter()
        .map(|mut post| {
            post.reactions_by_type = reaction_counts(conn, post.id)?;
            post.comments = comments_where(conn, "post_id = ?1", params![post.id])?;
            Ok(post)
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ReactionSummary {
    pub post_id: i64,
    pub reactions: BTreeMap<String, i64>,
    pub comments_count: i64,
}

pub fn post_summary(conn: &Connection, post_id: i64) -> Result<ReactionSummary, StoreError> {
    Ok(ReactionSummary {
        post_id,
        reactions: reaction_counts(conn, post_id)?,
        comments_count: comments_count(conn, post_id)?,
    })
}

pub fn reactions_summary(conn: &Connection) -> Result<Vec<ReactionSummary>, StoreError> {
    let post_ids = conn
        .prepare("SELECT id FROM posts ORDER BY id")?
        .query_map([], |row| row.get::<_, i64>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    post_ids
        .into_iter()
        .map(|post_id| post_summary(conn, post_id))
        .collect()
}

pub fn comments_count(conn: &Connection, post_id: i64) -> Result<i64, StoreError> {
    Ok(conn.query_row(
        "SELECT COUNT(*) FROM comments WHERE post_id = ?1",
        params![post_id],
        |row| row.get(0),
    )?)
}

fn reaction_counts(conn: &Connection, post_id: i64) -> Result<BTreeMap<String, i64>, StoreError> {
    let counts = conn
        .prepare(
            "SELECT reaction_type, COUNT(*) FROM reactions WHERE post_id = ?1 GROUP BY reaction_type",
        )?
        .query_map(params![post_id], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<Result<BTreeMap<String, i64>, _>>()?;
    Ok(counts)
}

fn comments_where(
    conn: &Connection,
    filter: &str,
    args: &[&dyn rusqlite::ToSql],
) -> Result<Vec<CommentRow>, StoreError> {
    let sql = format!(
        "SELECT id, user_id, post_id, content, parent_comment_id FROM comments WHERE {filter} ORDER BY id"
    );
    let comments = conn
        .prepare(&sql)?
        .query_map(args, |row| {
            Ok(CommentRow {
                id: row.get(0)?,
                user_id: row.get(1)?,
                post_id: row.get(2)?,
                content: row.get(3)?,
                parent_comment_id: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(comments)
}
