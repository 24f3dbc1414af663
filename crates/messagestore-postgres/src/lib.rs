//! PostgreSQL implementation of the messagestore repository.
//!
//! This crate provides a [`Repository`] backed by
//! [Message DB](https://github.com/message-db/message-db), reading and
//! writing through its server-side functions. `get_stream_messages` only
//! accepts entity streams, so reads of streams without an entity part
//! (`account:command`, `ledger+position`) query the `messages` table.
//!
//! # Features
//!
//! - Versions and global positions assigned by the database
//! - Optimistic concurrency through `write_message`'s expected version
//! - Duplicate message ids rejected by the primary key
//! - Queries abandoned when the caller's context is cancelled
//!
//! # Database Schema
//!
//! The Message DB schema must be installed and reachable on the
//! connection's `search_path`:
//!
//! ```sql
//! ALTER ROLE message_store SET search_path TO message_store, public;
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use messagestore_core::MessageStore;
//! use messagestore_postgres::PgRepository;
//! use sqlx::PgPool;
//!
//! let pool = PgPool::connect("postgres://message_store@localhost/message_store").await?;
//! let store = MessageStore::new(Arc::new(PgRepository::new(pool)));
//! ```

use async_trait::async_trait;
use chrono::{NaiveDateTime, TimeZone, Utc};
use messagestore_core::stream::{split_stream_name, StreamName, CATEGORY_SEPARATOR};
use messagestore_core::{Context, MessageEnvelope, Repository, RepositoryError, RepositoryResult};
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{PgPool, Postgres, Row};
use tracing::Span;
use uuid::Uuid;

const SELECT_COLUMNS: &str =
    "SELECT id, stream_name, type, position, global_position, data, metadata, time";

// Same shape as the Message DB read functions, which return text columns.
const SELECT_TABLE_COLUMNS: &str = "SELECT id::varchar AS id, stream_name, type, position, \
     global_position, data::varchar AS data, metadata::varchar AS metadata, time \
     FROM messages";

/// Message DB repository.
#[derive(Clone)]
pub struct PgRepository {
    pool: PgPool,
    span: Span,
}

impl PgRepository {
    /// Create a new repository.
    ///
    /// # Arguments
    ///
    /// * `pool` - PostgreSQL connection pool with Message DB on its search path
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            span: tracing::info_span!("pg_repository"),
        }
    }

    /// Connect a fresh pool to `url`.
    pub async fn connect(url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(url).await?;
        Ok(Self::new(pool))
    }

    /// Log against `span` instead.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Get the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    async fn fetch(
        &self,
        ctx: &Context,
        scope: &str,
        query: Query<'_, Postgres, PgArguments>,
    ) -> RepositoryResult<Vec<MessageEnvelope>> {
        let rows = tokio::select! {
            rows = query.fetch_all(&self.pool) => rows.map_err(backend)?,
            _ = ctx.cancelled() => {
                tracing::debug!(parent: &self.span, scope, "read cancelled");
                return Ok(Vec::new());
            }
        };

        rows.iter().map(to_envelope).collect()
    }

    async fn write(
        &self,
        ctx: &Context,
        envelope: MessageEnvelope,
        expected_position: Option<i64>,
    ) -> RepositoryResult<()> {
        let data = String::from_utf8(envelope.data.clone()).map_err(backend)?;
        let metadata = if envelope.metadata.is_empty() {
            None
        } else {
            Some(String::from_utf8(envelope.metadata.clone()).map_err(backend)?)
        };
        // Message DB expects the version of the stream's current last message.
        let expected_version = expected_position.map(|position| position - 1);

        let query = sqlx::query(
            r#"
            SELECT write_message($1, $2, $3, $4::jsonb, $5::jsonb, $6)
            "#,
        )
        .bind(envelope.id.to_string())
        .bind(envelope.stream_name.as_str())
        .bind(envelope.message_type.as_str())
        .bind(data)
        .bind(metadata)
        .bind(expected_version);

        tokio::select! {
            result = query.execute(&self.pool) => {
                result.map_err(|e| write_error(e, &envelope, expected_position))?;
            }
            _ = ctx.cancelled() => {
                tracing::warn!(
                    parent: &self.span,
                    stream_name = %envelope.stream_name,
                    "write cancelled before commit was confirmed"
                );
                return Err(RepositoryError::CommitUnknown {
                    stream_name: envelope.stream_name.clone(),
                });
            }
        }

        tracing::debug!(
            parent: &self.span,
            stream_name = %envelope.stream_name,
            message_type = %envelope.message_type,
            "message written"
        );
        Ok(())
    }
}

#[async_trait]
impl Repository for PgRepository {
    async fn get_all_messages_in_stream(
        &self,
        ctx: &Context,
        stream_name: &str,
        batch_size: i64,
    ) -> RepositoryResult<Vec<MessageEnvelope>> {
        self.get_all_messages_in_stream_since(ctx, stream_name, 0, batch_size)
            .await
    }

    async fn get_all_messages_in_stream_since(
        &self,
        ctx: &Context,
        stream_name: &str,
        since_version: i64,
        batch_size: i64,
    ) -> RepositoryResult<Vec<MessageEnvelope>> {
        let sql = if stream_name.contains(CATEGORY_SEPARATOR) {
            format!("{SELECT_COLUMNS} FROM get_stream_messages($1, $2, $3)")
        } else {
            format!(
                "{SELECT_TABLE_COLUMNS} WHERE stream_name = $1 AND position >= $2 \
                 ORDER BY position LIMIT $3"
            )
        };
        let query = sqlx::query(&sql)
            .bind(stream_name)
            .bind(since_version)
            .bind(batch_size);
        self.fetch(ctx, stream_name, query).await
    }

    async fn get_all_messages_in_category(
        &self,
        ctx: &Context,
        category: &str,
        batch_size: i64,
    ) -> RepositoryResult<Vec<MessageEnvelope>> {
        // Global positions start at 1.
        self.get_all_messages_in_category_since(ctx, category, 1, batch_size)
            .await
    }

    async fn get_all_messages_in_category_since(
        &self,
        ctx: &Context,
        category: &str,
        since_global_position: i64,
        batch_size: i64,
    ) -> RepositoryResult<Vec<MessageEnvelope>> {
        let sql = format!("{SELECT_COLUMNS} FROM get_category_messages($1, $2, $3)");
        let query = sqlx::query(&sql)
            .bind(category)
            .bind(since_global_position)
            .bind(batch_size);
        self.fetch(ctx, category, query).await
    }

    async fn get_last_message_in_stream(
        &self,
        ctx: &Context,
        stream_name: &str,
    ) -> RepositoryResult<Option<MessageEnvelope>> {
        let sql = format!("{SELECT_COLUMNS} FROM get_last_stream_message($1)");
        let query = sqlx::query(&sql).bind(stream_name);
        Ok(self.fetch(ctx, stream_name, query).await?.pop())
    }

    async fn write_message(
        &self,
        ctx: &Context,
        envelope: MessageEnvelope,
    ) -> RepositoryResult<()> {
        self.write(ctx, envelope, None).await
    }

    async fn write_message_with_expected_position(
        &self,
        ctx: &Context,
        envelope: MessageEnvelope,
        expected_position: i64,
    ) -> RepositoryResult<()> {
        self.write(ctx, envelope, Some(expected_position)).await
    }
}

/// Utility functions for stream inspection.
impl PgRepository {
    /// Version of the last message in a stream, or `None` if it is empty.
    pub async fn stream_version(&self, stream_name: &str) -> RepositoryResult<Option<i64>> {
        let row = sqlx::query("SELECT stream_version($1) AS version")
            .bind(stream_name)
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;

        row.try_get("version").map_err(backend)
    }

    /// Installed Message DB schema version.
    pub async fn message_store_version(&self) -> RepositoryResult<String> {
        let row = sqlx::query("SELECT message_store_version() AS version")
            .fetch_one(&self.pool)
            .await
            .map_err(backend)?;

        row.try_get("version").map_err(backend)
    }
}

fn to_envelope(row: &PgRow) -> RepositoryResult<MessageEnvelope> {
    let id: String = row.try_get("id").map_err(backend)?;
    let stream_name: String = row.try_get("stream_name").map_err(backend)?;
    let data: Option<String> = row.try_get("data").map_err(backend)?;
    let metadata: Option<String> = row.try_get("metadata").map_err(backend)?;
    let time: NaiveDateTime = row.try_get("time").map_err(backend)?;

    let id = Uuid::parse_str(&id).map_err(backend)?;
    let entity_id = StreamName::parse(&stream_name).entity_id;
    let stream_category = split_stream_name(&stream_name).0.to_string();

    Ok(MessageEnvelope {
        id,
        entity_id,
        stream_category,
        message_type: row.try_get("type").map_err(backend)?,
        version: row.try_get("position").map_err(backend)?,
        global_position: row.try_get("global_position").map_err(backend)?,
        data: data.map(String::into_bytes).unwrap_or_default(),
        metadata: metadata.map(String::into_bytes).unwrap_or_default(),
        // Message DB stores UTC without a zone.
        time: Utc.from_utc_datetime(&time),
        stream_name,
    })
}

fn backend(e: impl Into<anyhow::Error>) -> RepositoryError {
    RepositoryError::Backend(e.into())
}

fn write_error(
    err: sqlx::Error,
    envelope: &MessageEnvelope,
    expected_position: Option<i64>,
) -> RepositoryError {
    if let sqlx::Error::Database(db) = &err {
        if db.is_unique_violation() {
            return RepositoryError::DuplicateId(envelope.id);
        }
        if let (Some(expected), Some(stream_version)) =
            (expected_position, wrong_expected_version(db.message()))
        {
            return RepositoryError::VersionConflict {
                stream_name: envelope.stream_name.clone(),
                expected,
                actual: stream_version + 1,
            };
        }
    }
    backend(err)
}

/// Stream version reported by Message DB's expected-version error.
///
/// The message reads
/// `Wrong expected version: 4 (Stream: account-1, Stream Version: 6)`.
fn wrong_expected_version(message: &str) -> Option<i64> {
    let rest = message.strip_prefix("Wrong expected version")?;
    let (_, version) = rest.rsplit_once("Stream Version: ")?;
    version.trim_end_matches(')').trim().parse().ok()
}
