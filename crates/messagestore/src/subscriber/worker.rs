//! The four phases of a subscription tick.
//!
//! ```text
//! get_position ─► get_messages ─► process_messages ─► set_position
//!  (checkpoint)     (batch)         (dispatch)          (checkpoint)
//! ```
//!
//! Positions are in the unit the subscription reads by: global position for
//! category subscriptions, stream version for stream subscriptions. The
//! checkpoint stores the next position to read, so a missing checkpoint and
//! "start at 0" are the same thing.

use std::sync::Arc;

use tracing::Span;

use crate::context::Context;
use crate::converter::Converter;
use crate::error::{Error, Result};
use crate::handler::MessageHandler;
use crate::message::{Message, PositionMessage};
use crate::options::{GetOptions, WriteOptions};
use crate::store::MessageStore;

use super::config::{SubscriberConfig, Subscription};

/// Result of dispatching a batch.
#[derive(Debug, Default)]
pub struct ProcessOutcome {
    /// Messages that at least one handler processed successfully.
    pub handled: usize,
    /// Messages fully iterated, including ones no handler wanted.
    pub processed: usize,
    /// Position of the last processed message.
    pub last_position: Option<i64>,
    /// The handler error that stopped the batch, if any.
    pub error: Option<Error>,
}

/// Executes subscription phases for one subscriber.
pub struct SubscriptionWorker {
    subscriber_id: String,
    config: SubscriberConfig,
    handlers: Vec<Arc<dyn MessageHandler>>,
    store: MessageStore,
    span: Span,
}

impl SubscriptionWorker {
    /// Callers validate `subscriber_id` and `handlers`; see
    /// [`Subscriber::new`](super::Subscriber::new).
    pub fn new(
        subscriber_id: impl Into<String>,
        config: SubscriberConfig,
        handlers: Vec<Arc<dyn MessageHandler>>,
        store: MessageStore,
        span: Span,
    ) -> Self {
        Self {
            subscriber_id: subscriber_id.into(),
            config,
            handlers,
            store,
            span,
        }
    }

    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    pub fn config(&self) -> &SubscriberConfig {
        &self.config
    }

    /// Read the checkpoint. `0` when none has been written.
    ///
    /// A checkpoint that cannot be decoded is logged and treated as absent.
    pub async fn get_position(&self, ctx: &Context) -> Result<i64> {
        let opts = GetOptions::builder()
            .position_stream(&self.subscriber_id)
            .last()
            .converter(Converter::Position(self.subscriber_id.clone()))
            .build()?;

        let messages = self.store.get(ctx, opts).await?;
        match messages.first() {
            None => Ok(0),
            Some(Message::Position(pos)) => Ok(pos.checkpoint),
            Some(other) => {
                tracing::warn!(
                    parent: &self.span,
                    subscriber_id = %self.subscriber_id,
                    message_type = other.message_type(),
                    version = other.version(),
                    "checkpoint message could not be decoded; starting from 0"
                );
                Ok(0)
            }
        }
    }

    /// Fetch the next batch starting at `position` (inclusive).
    pub async fn get_messages(&self, ctx: &Context, position: i64) -> Result<Vec<Message>> {
        let builder = GetOptions::builder().batch_size(self.config.batch_size());
        let builder = match self.config.subscription() {
            Subscription::Category(category) => builder.category(category).since_position(position),
            Subscription::CommandStream(category) => {
                builder.command_stream(category).since_version(position)
            }
            Subscription::EntityStream {
                category,
                entity_id,
            } => builder
                .event_stream(category, *entity_id)
                .since_version(position),
        };

        self.store.get(ctx, builder.build()?).await
    }

    /// Dispatch `messages` in order to every handler of the matching type.
    ///
    /// The first handler error stops the batch: no further handlers or
    /// messages run, and the counts so far are returned with the error.
    pub async fn process_messages(&self, ctx: &Context, messages: &[Message]) -> ProcessOutcome {
        let mut outcome = ProcessOutcome::default();

        for message in messages {
            let position = self.position_of(message);
            let mut matched = false;

            for handler in &self.handlers {
                if handler.message_type() != message.message_type() {
                    continue;
                }
                matched = true;

                tracing::trace!(
                    parent: &self.span,
                    message_type = message.message_type(),
                    position,
                    "dispatching message"
                );

                if let Err(source) = handler.process(ctx, message).await {
                    tracing::warn!(
                        parent: &self.span,
                        subscriber_id = %self.subscriber_id,
                        message_type = message.message_type(),
                        position,
                        error = %source,
                        "handler failed; abandoning batch"
                    );
                    outcome.error = Some(Error::Handler {
                        message_type: message.message_type().to_string(),
                        position,
                        source,
                    });
                    return outcome;
                }
            }

            if matched {
                outcome.handled += 1;
            }
            outcome.processed += 1;
            outcome.last_position = Some(position);
        }

        outcome
    }

    /// Record that everything up to and including `last_position` is done.
    pub async fn set_position(&self, ctx: &Context, last_position: i64) -> Result<()> {
        let checkpoint = PositionMessage::new(&self.subscriber_id, last_position + 1);

        self.store
            .write(ctx, &checkpoint.into(), WriteOptions::default())
            .await?;

        tracing::debug!(
            parent: &self.span,
            subscriber_id = %self.subscriber_id,
            checkpoint = last_position + 1,
            "checkpoint written"
        );
        Ok(())
    }

    fn position_of(&self, message: &Message) -> i64 {
        if self.config.subscription().is_stream() {
            message.version()
        } else {
            message.position()
        }
    }
}
