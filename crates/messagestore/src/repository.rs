//! Storage backend interface.

use async_trait::async_trait;

use crate::context::Context;
use crate::envelope::MessageEnvelope;
use crate::error::RepositoryError;

/// Result type for repository operations.
pub type RepositoryResult<T> = std::result::Result<T, RepositoryError>;

/// Durable, append-only message storage.
///
/// # Ordering
///
/// - Stream reads return only that stream's messages, ordered by `version` ascending
/// - Category reads return only messages whose `stream_category` equals the
///   category, ordered by `global_position` ascending
///
/// "Since" offsets are inclusive.
///
/// # Categories
///
/// The store derives `stream_category` from the stream name: everything
/// before the first `-`, or the whole name when there is none. Envelopes
/// read back carry that value, not whatever the producer set, so a
/// `ledger+position` checkpoint belongs to the `ledger+position` category.
///
/// # Cancellation
///
/// A read whose context is cancelled returns promptly with an empty result.
/// A write whose context is cancelled before the backend confirms the commit
/// returns [`RepositoryError::CommitUnknown`].
///
/// # Implementations
///
/// - `PgRepository` (messagestore-postgres): Message DB on PostgreSQL
/// - `InMemoryRepository` (messagestore-testing): for tests and local development
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_all_messages_in_stream(
        &self,
        ctx: &Context,
        stream_name: &str,
        batch_size: i64,
    ) -> RepositoryResult<Vec<MessageEnvelope>>;

    async fn get_all_messages_in_stream_since(
        &self,
        ctx: &Context,
        stream_name: &str,
        since_version: i64,
        batch_size: i64,
    ) -> RepositoryResult<Vec<MessageEnvelope>>;

    async fn get_all_messages_in_category(
        &self,
        ctx: &Context,
        category: &str,
        batch_size: i64,
    ) -> RepositoryResult<Vec<MessageEnvelope>>;

    async fn get_all_messages_in_category_since(
        &self,
        ctx: &Context,
        category: &str,
        since_global_position: i64,
        batch_size: i64,
    ) -> RepositoryResult<Vec<MessageEnvelope>>;

    /// The highest-version message in the stream, if any.
    async fn get_last_message_in_stream(
        &self,
        ctx: &Context,
        stream_name: &str,
    ) -> RepositoryResult<Option<MessageEnvelope>>;

    /// Unconditional append. Fails with `DuplicateId` if the id exists.
    async fn write_message(&self, ctx: &Context, envelope: MessageEnvelope)
        -> RepositoryResult<()>;

    /// Append only if the message would receive `expected_position` as its
    /// version, i.e. the stream currently ends at `expected_position - 1`.
    async fn write_message_with_expected_position(
        &self,
        ctx: &Context,
        envelope: MessageEnvelope,
        expected_position: i64,
    ) -> RepositoryResult<()>;
}
