//! The message store facade.

use std::sync::Arc;

use tracing::Span;

use crate::context::Context;
use crate::error::{ConfigError, Result};
use crate::handler::MessageHandler;
use crate::message::Message;
use crate::options::{Addressing, GetOptions, WriteOptions};
use crate::repository::Repository;
use crate::subscriber::{Subscriber, SubscriberConfig};

/// Reads and writes messages through a [`Repository`].
///
/// `Clone` is cheap: the repository is shared behind an `Arc`.
#[derive(Clone)]
pub struct MessageStore {
    repository: Arc<dyn Repository>,
    span: Span,
}

impl MessageStore {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            repository,
            span: tracing::info_span!("message_store"),
        }
    }

    /// Log against `span` instead of the default `message_store` span.
    ///
    /// Subscribers created from this store log under a child of it.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn repository(&self) -> &Arc<dyn Repository> {
        &self.repository
    }

    /// Read messages.
    ///
    /// Envelopes come back in store order and are converted through the
    /// options' converter chain.
    pub async fn get(&self, ctx: &Context, opts: GetOptions) -> Result<Vec<Message>> {
        let repo = &self.repository;
        let batch_size = opts.batch_size();

        let envelopes = match (opts.addressing(), opts.since()) {
            (Addressing::Stream(stream_name), _) if opts.is_last() => repo
                .get_last_message_in_stream(ctx, stream_name)
                .await
                .map(|last| last.into_iter().collect()),
            (Addressing::Stream(stream_name), Some(version)) => {
                repo.get_all_messages_in_stream_since(ctx, stream_name, version, batch_size)
                    .await
            }
            (Addressing::Stream(stream_name), None) => {
                repo.get_all_messages_in_stream(ctx, stream_name, batch_size)
                    .await
            }
            (Addressing::Category(category), Some(position)) => {
                repo.get_all_messages_in_category_since(ctx, category, position, batch_size)
                    .await
            }
            (Addressing::Category(category), None) => {
                repo.get_all_messages_in_category(ctx, category, batch_size)
                    .await
            }
        };

        let envelopes = envelopes.inspect_err(|e| {
            tracing::warn!(
                parent: &self.span,
                addressing = ?opts.addressing(),
                error = %e,
                "repository read failed"
            );
        })?;

        Ok(opts.converters().convert_all(envelopes, &self.span))
    }

    /// Validate and append a message.
    ///
    /// With [`WriteOptions::at_position`] the write only succeeds if the
    /// message lands at that version.
    pub async fn write(&self, ctx: &Context, message: &Message, opts: WriteOptions) -> Result<()> {
        let envelope = message.to_envelope().inspect_err(|e| {
            tracing::warn!(
                parent: &self.span,
                message_type = message.message_type(),
                error = %e,
                "message failed validation"
            );
        })?;
        let stream_name = envelope.stream_name.clone();

        let written = match opts.expected_position {
            Some(position) if position < 0 => {
                return Err(ConfigError::InvalidExpectedPosition(position).into())
            }
            Some(position) => {
                self.repository
                    .write_message_with_expected_position(ctx, envelope, position)
                    .await
            }
            None => self.repository.write_message(ctx, envelope).await,
        };

        written.inspect_err(|e| {
            tracing::warn!(
                parent: &self.span,
                stream_name = %stream_name,
                error = %e,
                "repository write failed"
            );
        })?;
        Ok(())
    }

    /// Build a subscriber that reads through this store.
    pub fn create_subscriber(
        &self,
        subscriber_id: &str,
        handlers: Vec<Arc<dyn MessageHandler>>,
        config: SubscriberConfig,
    ) -> Result<Subscriber> {
        Subscriber::new(subscriber_id, handlers, config, self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{Command, Event};
    use crate::test_support::{envelope, ScriptedRepository};
    use crate::{Error, RepositoryError, ValidationError};
    use serde_json::json;
    use uuid::Uuid;

    fn store(repo: &Arc<ScriptedRepository>) -> MessageStore {
        MessageStore::new(repo.clone())
    }

    #[tokio::test]
    async fn test_write_then_get_stream() {
        let repo = ScriptedRepository::new();
        let store = store(&repo);
        let ctx = Context::background();
        let id = Uuid::new_v4();

        for amount in [1, 2, 3] {
            let event = Event::new("account", id, "Deposited")
                .with_data(&json!({ "amount": amount }))
                .unwrap();
            store
                .write(&ctx, &event.into(), WriteOptions::default())
                .await
                .unwrap();
        }

        let opts = GetOptions::builder()
            .event_stream("account", id)
            .since_version(1)
            .build()
            .unwrap();
        let messages = store.get(&ctx, opts).await.unwrap();
        let versions: Vec<_> = messages.iter().map(|m| m.version()).collect();
        assert_eq!(versions, vec![1, 2]);
        assert_eq!(
            messages[0].as_event().unwrap().data,
            Some(json!({ "amount": 2 }))
        );
    }

    #[tokio::test]
    async fn test_get_routes_by_addressing() {
        let repo = ScriptedRepository::new();
        let store = store(&repo);
        let ctx = Context::background();

        let opts = GetOptions::builder().category("account").build().unwrap();
        store.get(&ctx, opts).await.unwrap();

        let opts = GetOptions::builder()
            .category("account")
            .since_position(400)
            .batch_size(10)
            .build()
            .unwrap();
        store.get(&ctx, opts).await.unwrap();

        let opts = GetOptions::builder()
            .command_stream("account")
            .build()
            .unwrap();
        store.get(&ctx, opts).await.unwrap();

        let opts = GetOptions::builder()
            .command_stream("account")
            .last()
            .build()
            .unwrap();
        store.get(&ctx, opts).await.unwrap();

        assert_eq!(
            repo.calls(),
            vec![
                "category account batch=1000",
                "category account since=400 batch=10",
                "stream account:command batch=1000",
                "last account:command",
            ]
        );
    }

    #[tokio::test]
    async fn test_last_returns_single_message() {
        let repo = ScriptedRepository::new();
        repo.seed(envelope("account:command", "account", "Open", b"{}"));
        repo.seed(envelope("account:command", "account", "Close", b"{}"));
        let store = store(&repo);

        let opts = GetOptions::builder()
            .command_stream("account")
            .last()
            .build()
            .unwrap();
        let messages = store.get(&Context::background(), opts).await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_type(), "Close");
        assert!(messages[0].as_command().is_some());
    }

    #[tokio::test]
    async fn test_write_at_position_uses_expected_version() {
        let repo = ScriptedRepository::new();
        let store = store(&repo);
        let ctx = Context::background();
        let cmd: Message = Command::new("account", "Open")
            .with_data(&json!({}))
            .unwrap()
            .into();

        store
            .write(&ctx, &cmd, WriteOptions::at_position(0))
            .await
            .unwrap();

        let again: Message = Command::new("account", "Open")
            .with_data(&json!({}))
            .unwrap()
            .into();
        let err = store
            .write(&ctx, &again, WriteOptions::at_position(0))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Repository(RepositoryError::VersionConflict { expected: 0, actual: 1, .. })
        ));
        assert_eq!(
            repo.calls(),
            vec!["write account:command at=0", "write account:command at=0"]
        );
    }

    #[tokio::test]
    async fn test_write_rejects_invalid_message_without_io() {
        let repo = ScriptedRepository::new();
        let store = store(&repo);
        let cmd: Message = Command::new("account", "Open").into();

        let err = store
            .write(&Context::background(), &cmd, WriteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Validation(ValidationError::MissingData)
        ));
        assert!(repo.calls().is_empty());
    }

    #[tokio::test]
    async fn test_repository_errors_propagate() {
        let repo = ScriptedRepository::new();
        repo.fail_reads
            .store(true, std::sync::atomic::Ordering::SeqCst);
        let store = store(&repo);

        let opts = GetOptions::builder().category("account").build().unwrap();
        let err = store.get(&Context::background(), opts).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Repository(RepositoryError::Backend(_))
        ));
    }
}
