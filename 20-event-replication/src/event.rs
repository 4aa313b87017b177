//! Event model: the closed set of replicated mutations.
//!
//! On the wire an event is `{event_type, payload}` where `event_type` is a
//! SCREAMING_SNAKE_CASE tag and `payload` is a JSON object. Payloads are
//! decoded once, at the boundary, into one typed struct per event kind.

use std::{fmt, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    CreatePost,
    ReactPost,
    CommentPost,
    UpdatePost,
    DeletePost,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::CreatePost => "CREATE_POST",
            EventType::ReactPost => "REACT_POST",
            EventType::CommentPost => "COMMENT_POST",
            EventType::UpdatePost => "UPDATE_POST",
            EventType::DeletePost => "DELETE_POST",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown event type '{0}'")]
pub struct UnknownEventType(pub String);

impl FromStr for EventType {
    type Err = UnknownEventType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE_POST" => Ok(EventType::CreatePost),
            "REACT_POST" => Ok(EventType::ReactPost),
            "COMMENT_POST" => Ok(EventType::CommentPost),
            "UPDATE_POST" => Ok(EventType::UpdatePost),
            "DELETE_POST" => Ok(EventType::DeletePost),
            other => Err(UnknownEventType(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreatePost {
    pub post_id: i64,
    pub user_id: i64,
    pub title: String,
    pub content: String,
    pub image_filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReactPost {
    pub post_id: i64,
    pub user_id: i64,
    pub reaction_type: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommentPost {
    pub comment_id: i64,
    pub post_id: i64,
    pub user_id: i64,
    pub content: String,
    pub parent_comment_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePost {
    pub post_id: i64,
    pub title: String,
    pub content: String,
    pub image_filename: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeletePost {
    pub post_id: i64,
}

/// Everything needed to reapply one mutation on another node. Entity ids are
/// the ones assigned by the primary and are carried verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    CreatePost(CreatePost),
    ReactPost(ReactPost),
    CommentPost(CommentPost),
    UpdatePost(UpdatePost),
    DeletePost(DeletePost),
}

impl EventPayload {
    pub fn event_type(&self) -> EventType {
        match self {
            EventPayload::CreatePost(_) => EventType::CreatePost,
            EventPayload::ReactPost(_) => EventType::ReactPost,
            EventPayload::CommentPost(_) => EventType::CommentPost,
            EventPayload::UpdatePost(_) => EventType::UpdatePost,
            EventPayload::DeletePost(_) => EventType::DeletePost,
        }
    }

    /// The post every variant refers to.
    pub fn post_id(&self) -> i64 {
        match self {
            EventPayload::CreatePost(p) => p.post_id,
            EventPayload::ReactPost(p) => p.post_id,
            EventPayload::CommentPost(p) => p.post_id,
            EventPayload::UpdatePost(p) => p.post_id,
            EventPayload::DeletePost(p) => p.post_id,
        }
    }

    pub fn to_value(&self) -> serde_json::Result<Value> {
        match self {
            EventPayload::CreatePost(p) => serde_json::to_value(p),
            EventPayload::ReactPost(p) => serde_json::to_value(p),
            EventPayload::CommentPost(p) => serde_json::to_value(p),
            EventPayload::UpdatePost(p) => serde_json::to_value(p),
            EventPayload::DeletePost(p) => serde_json::to_value(p),
        }
    }

    /// Decodes the payload for a known event type, checking its required fields.
    pub fn from_parts(event_type: EventType, payload: Value) -> serde_json::Result<Self> {
        Ok(match event_type {
            EventType::CreatePost => EventPayload::CreatePost(decode(payload)?),
            EventType::ReactPost => EventPayload::ReactPost(decode(payload)?),
            EventType::CommentPost => EventPayload::CommentPost(decode(payload)?),
            EventType::UpdatePost => EventPayload::UpdatePost(decode(payload)?),
            EventType::DeletePost => EventPayload::DeletePost(decode(payload)?),
        })
    }
}

fn decode<T: DeserializeOwned>(payload: Value) -> serde_json::Result<T> {
    serde_json::from_value(payload)
}

/// One entry of the primary's event log.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: i64,
    pub payload: EventPayload,
    pub created_at: DateTime<Utc>,
}

impl Event {
    pub fn event_type(&self) -> EventType {
        self.payload.event_type()
    }

    pub fn to_wire(&self) -> serde_json::Result<WireEvent> {
        Ok(WireEvent {
            id: self.id,
            event_type: self.event_type().as_str().to_string(),
            payload: self.payload.to_value()?,
        })
    }
}

/// Element of the `/sync` response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireEvent {
    pub id: i64,
    pub event_type: String,
    pub payload: Value,
}

/// Body the primary pushes to each replica.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEvent {
    pub event_id: i64,
    pub event_type: String,
    pub payload: Value,
}

impl From<WireEvent> for PushEvent {
    fn from(event: WireEvent) -> Self {
        Self {
            event_id: event.id,
            event_type: event.event_type,
            payload: event.payload,
        }
    }
}
