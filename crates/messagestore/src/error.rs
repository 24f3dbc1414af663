//! Error types.
//!
//! Errors are grouped by where they originate:
//!
//! - [`ValidationError`] - a message could not be turned into an envelope
//! - [`ConfigError`] - a subscriber or query was configured incorrectly
//! - [`RepositoryError`] - the storage backend failed or rejected a write
//! - [`Error::Handler`] - a message handler returned an error
//!
//! Validation and configuration errors are never retried. Repository and
//! handler errors abort the current poll and are retried on the next tick.

use uuid::Uuid;

/// Result type used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Top-level error for message store operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A message failed validation in `to_envelope`.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// A subscriber, query or write was configured incorrectly.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The repository returned an error.
    #[error(transparent)]
    Repository(#[from] RepositoryError),

    /// A message handler failed while processing a message.
    ///
    /// `position` is the version or global position of the message,
    /// depending on what the subscription tracks.
    #[error("handler for {message_type} failed at position {position}: {source}")]
    Handler {
        message_type: String,
        position: i64,
        #[source]
        source: anyhow::Error,
    },

    /// The context was cancelled.
    #[error("context cancelled")]
    Cancelled,
}

/// Why a message could not be converted to an envelope.
#[derive(Debug, thiserror::Error)]
pub enum ValidationError {
    #[error("message type is missing")]
    MissingType,

    #[error("message category is missing")]
    MissingCategory,

    /// Categories address streams by splitting on the first `-`,
    /// so they may not contain one themselves.
    #[error("message category {0:?} must not contain a hyphen")]
    InvalidCategory(String),

    #[error("message has no id")]
    NoId,

    #[error("message data is missing")]
    MissingData,

    #[error("event has no entity id")]
    MissingEntityId,

    #[error("message data could not be serialized: {0}")]
    UnserializableData(#[source] serde_json::Error),

    #[error("position message has no subscriber id")]
    MissingSubscriberId,
}

/// Invalid subscriber, query or write configuration.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("a stream or category must be selected")]
    MissingSubscription,

    #[error("only one of category, command stream or entity stream may be selected")]
    ConflictingSubscriptions,

    #[error("poll time must be greater than zero")]
    InvalidPollTime,

    #[error("poll error delay must be greater than zero")]
    InvalidPollErrorDelay,

    /// An interval of 1 would checkpoint after every message.
    #[error("checkpoint update interval must be at least 2, got {0}")]
    InvalidUpdateInterval(u32),

    #[error("batch size must be greater than zero, got {0}")]
    InvalidBatchSize(i64),

    #[error("subscriber id {0:?} must be non-empty and must not contain a hyphen")]
    InvalidSubscriberId(String),

    #[error("subscriber needs at least one message handler")]
    NoHandlers,

    #[error("since_version requires a stream, since_position requires a category")]
    MismatchedOffset,

    #[error("last() is only supported on a stream")]
    LastRequiresStream,

    #[error("expected position must not be negative, got {0}")]
    InvalidExpectedPosition(i64),
}

/// Errors surfaced by a [`Repository`](crate::Repository).
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    /// An expected-position write found the stream at a different version.
    #[error("stream {stream_name} expected position {expected} but next position is {actual}")]
    VersionConflict {
        stream_name: String,
        expected: i64,
        actual: i64,
    },

    /// A message with this id has already been written.
    #[error("message {0} has already been written")]
    DuplicateId(Uuid),

    /// The write raced a cancellation and may or may not have committed.
    #[error("write to {stream_name} was cancelled; commit status unknown")]
    CommitUnknown { stream_name: String },

    /// Any other backend failure.
    #[error("repository backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl Error {
    /// Returns `true` for errors that a later poll may succeed on.
    pub fn is_transient(&self) -> bool {
        matches!(self, Error::Repository(_) | Error::Handler { .. })
    }
}
