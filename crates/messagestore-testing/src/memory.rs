//! In-memory repository.

use std::collections::{HashMap, HashSet};

use async_trait::async_trait;
use chrono::Utc;
use messagestore_core::stream::split_stream_name;
use messagestore_core::{Context, MessageEnvelope, Repository, RepositoryError, RepositoryResult};
use tokio::sync::RwLock;
use tracing::Span;
use uuid::Uuid;

#[derive(Default)]
struct Log {
    envelopes: Vec<MessageEnvelope>,
    ids: HashSet<Uuid>,
    // Version of the last message in each stream.
    heads: HashMap<String, i64>,
}

impl Log {
    fn next_version(&self, stream_name: &str) -> i64 {
        self.heads.get(stream_name).map_or(0, |version| version + 1)
    }

    fn append(&mut self, mut envelope: MessageEnvelope) -> RepositoryResult<()> {
        if !self.ids.insert(envelope.id) {
            return Err(RepositoryError::DuplicateId(envelope.id));
        }
        envelope.version = self.next_version(&envelope.stream_name);
        envelope.global_position = self.envelopes.len() as i64 + 1;
        envelope.time = Utc::now();
        envelope.stream_category = split_stream_name(&envelope.stream_name).0.to_string();

        self.heads
            .insert(envelope.stream_name.clone(), envelope.version);
        self.envelopes.push(envelope);
        Ok(())
    }

    fn select<F>(&self, batch_size: i64, pred: F) -> Vec<MessageEnvelope>
    where
        F: Fn(&MessageEnvelope) -> bool,
    {
        self.envelopes
            .iter()
            .filter(|envelope| pred(envelope))
            .take(batch_size.max(0) as usize)
            .cloned()
            .collect()
    }
}

/// Repository that keeps the whole log in memory.
///
/// Versions count from 0 per stream and global positions from 1, matching
/// Message DB. Messages are kept in commit order, so stream and category
/// reads come back ordered.
///
/// The category of a committed message is everything before the first `-`
/// of its stream name, so `account:command-{id}` belongs to
/// `account:command` and not to `account`. The producer's `stream_category`
/// is replaced on commit, as Message DB does.
pub struct InMemoryRepository {
    log: RwLock<Log>,
    span: Span,
}

impl Default for InMemoryRepository {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self {
            log: RwLock::new(Log::default()),
            span: tracing::info_span!("in_memory_repository"),
        }
    }

    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub async fn len(&self) -> usize {
        self.log.read().await.envelopes.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Every committed envelope in global order.
    pub async fn envelopes(&self) -> Vec<MessageEnvelope> {
        self.log.read().await.envelopes.clone()
    }

    /// Every committed envelope in one stream.
    pub async fn stream(&self, stream_name: &str) -> Vec<MessageEnvelope> {
        self.log
            .read()
            .await
            .select(i64::MAX, |envelope| envelope.stream_name == stream_name)
    }

    fn cancelled_read(&self, ctx: &Context, scope: &str) -> bool {
        if ctx.is_cancelled() {
            tracing::debug!(parent: &self.span, scope, "read cancelled");
            return true;
        }
        false
    }

    fn cancelled_write(&self, ctx: &Context, envelope: &MessageEnvelope) -> RepositoryResult<()> {
        if ctx.is_cancelled() {
            tracing::debug!(
                parent: &self.span,
                stream_name = %envelope.stream_name,
                "write cancelled before commit"
            );
            return Err(RepositoryError::CommitUnknown {
                stream_name: envelope.stream_name.clone(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_all_messages_in_stream(
        &self,
        ctx: &Context,
        stream_name: &str,
        batch_size: i64,
    ) -> RepositoryResult<Vec<MessageEnvelope>> {
        if self.cancelled_read(ctx, stream_name) {
            return Ok(Vec::new());
        }
        Ok(self
            .log
            .read()
            .await
            .select(batch_size, |envelope| envelope.stream_name == stream_name))
    }

    async fn get_all_messages_in_stream_since(
        &self,
        ctx: &Context,
        stream_name: &str,
        since_version: i64,
        batch_size: i64,
    ) -> RepositoryResult<Vec<MessageEnvelope>> {
        if self.cancelled_read(ctx, stream_name) {
            return Ok(Vec::new());
        }
        Ok(self.log.read().await.select(batch_size, |envelope| {
            envelope.stream_name == stream_name && envelope.version >= since_version
        }))
    }

    async fn get_all_messages_in_category(
        &self,
        ctx: &Context,
        category: &str,
        batch_size: i64,
    ) -> RepositoryResult<Vec<MessageEnvelope>> {
        if self.cancelled_read(ctx, category) {
            return Ok(Vec::new());
        }
        Ok(self
            .log
            .read()
            .await
            .select(batch_size, |envelope| envelope.stream_category == category))
    }

    async fn get_all_messages_in_category_since(
        &self,
        ctx: &Context,
        category: &str,
        since_global_position: i64,
        batch_size: i64,
    ) -> RepositoryResult<Vec<MessageEnvelope>> {
        if self.cancelled_read(ctx, category) {
            return Ok(Vec::new());
        }
        Ok(self.log.read().await.select(batch_size, |envelope| {
            envelope.stream_category == category
                && envelope.global_position >= since_global_position
        }))
    }

    async fn get_last_message_in_stream(
        &self,
        ctx: &Context,
        stream_name: &str,
    ) -> RepositoryResult<Option<MessageEnvelope>> {
        if self.cancelled_read(ctx, stream_name) {
            return Ok(None);
        }
        Ok(self
            .log
            .read()
            .await
            .envelopes
            .iter()
            .rev()
            .find(|envelope| envelope.stream_name == stream_name)
            .cloned())
    }

    async fn write_message(
        &self,
        ctx: &Context,
        envelope: MessageEnvelope,
    ) -> RepositoryResult<()> {
        self.cancelled_write(ctx, &envelope)?;
        self.log.write().await.append(envelope)
    }

    async fn write_message_with_expected_position(
        &self,
        ctx: &Context,
        envelope: MessageEnvelope,
        expected_position: i64,
    ) -> RepositoryResult<()> {
        self.cancelled_write(ctx, &envelope)?;

        let mut log = self.log.write().await;
        let actual = log.next_version(&envelope.stream_name);
        if actual != expected_position {
            return Err(RepositoryError::VersionConflict {
                stream_name: envelope.stream_name,
                expected: expected_position,
                actual,
            });
        }
        log.append(envelope)
    }
}
