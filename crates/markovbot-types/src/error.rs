use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::chat::ChatId;

/// Reasons a persisted snapshot fails structural validation.
///
/// Never surfaced to callers of the chain manager: a failing snapshot is
/// replaced by an empty chain.
#[derive(Debug, Error)]
pub enum RecordError {
    #[error("malformed chain record: {0}")]
    Shape(String),

    #[error("the end-of-message sentinel is listed as a word")]
    SentinelWord,

    #[error("word '{0}' is listed more than once")]
    DuplicateWord(String),

    #[error("transitions reference unknown token '{0}'")]
    UnknownToken(String),

    #[error("zero count for transition '{token}' -> '{successor}'")]
    ZeroCount { token: String, successor: String },
}

/// Errors from the chat store and its persistence backend.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("data path {} is not a directory", .0.display())]
    NotADirectory(PathBuf),

    #[error("stored chain for chat {chat_id} is unreadable: {reason}")]
    Corrupt { chat_id: ChatId, reason: String },

    #[error("storage operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("failed to serialize chain: {0}")]
    Serialize(String),

    #[error("background storage task failed: {0}")]
    Task(String),

    #[error("failed to persist {} chat(s): {failed:?}", failed.len())]
    Flush { failed: Vec<ChatId> },
}

impl StoreError {
    /// Wrap an I/O error with the path it happened on.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether retrying the same operation later could succeed.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Timeout(_) | StoreError::Io { .. } | StoreError::Task(_))
    }
}
