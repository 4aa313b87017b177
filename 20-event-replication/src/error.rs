//! Error types shared across the replication core.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("storage task failed: {0}")]
    TaskJoin(String),

    #[error("corrupt event log row {id}: {reason}")]
    CorruptEvent { id: i64, reason: String },
}

/// Failure of a write accepted by the primary.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("{entity} {id} not found")]
    NotFound { entity: &'static str, id: i64 },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for WriteError {
    fn from(err: rusqlite::Error) -> Self {
        WriteError::Store(err.into())
    }
}

/// Failure to ingest an event delivered to a replica.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed event: {0}")]
    Malformed(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for IngestError {
    fn from(err: rusqlite::Error) -> Self {
        IngestError::Store(err.into())
    }
}

/// Failure of one catch-up round against the primary.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("sync request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<rusqlite::Error> for SyncError {
    fn from(err: rusqlite::Error) -> Self {
        SyncError::Store(err.into())
    }
}
