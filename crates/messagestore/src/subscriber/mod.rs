//! Durable subscriptions.
//!
//! A [`Subscriber`] runs its [`Poller`] on a background task until the
//! context is cancelled:
//!
//! ```text
//!            ┌──── poll ok: sleep poll_time ────┐
//!            ▼                                  │
//! start ─► Polling ─── poll err: log, sleep ──► Backoff
//!            │          poll_error_delay          │
//!            └────────── cancelled ───────────────┴─► Cancelled
//! ```
//!
//! Sleeps race the cancellation signal, so cancellation is observed within
//! one sleep. An in-flight poll is allowed to finish; no new poll starts
//! after cancellation is seen. On the way out the poller is flushed once,
//! so progress made since the last checkpoint is not replayed on restart.

mod config;
mod poller;
mod worker;

use std::sync::Arc;
use std::time::Duration;

use tracing::Span;

pub use config::{
    Subscription, SubscriberConfig, SubscriberConfigBuilder, DEFAULT_POLL_ERROR_DELAY,
    DEFAULT_POLL_TIME, DEFAULT_UPDATE_INTERVAL,
};
pub use poller::{Poller, SubscriptionPoller};
pub use worker::{ProcessOutcome, SubscriptionWorker};

use crate::context::Context;
use crate::error::{ConfigError, Error, Result};
use crate::handler::MessageHandler;
use crate::store::MessageStore;
use crate::stream::CATEGORY_SEPARATOR;

/// A long-running consumer of one category or stream.
pub struct Subscriber {
    subscriber_id: String,
    poll_time: Duration,
    poll_error_delay: Duration,
    poller: Box<dyn Poller>,
    span: Span,
}

impl Subscriber {
    /// Build a subscriber that checkpoints to `{subscriber_id}+position`.
    ///
    /// # Errors
    ///
    /// - `InvalidSubscriberId` if the id is empty or contains `-`
    /// - `NoHandlers` if `handlers` is empty
    pub fn new(
        subscriber_id: &str,
        handlers: Vec<Arc<dyn MessageHandler>>,
        config: SubscriberConfig,
        store: MessageStore,
    ) -> Result<Self> {
        validate_subscriber_id(subscriber_id)?;
        if handlers.is_empty() {
            return Err(ConfigError::NoHandlers.into());
        }

        let span = tracing::info_span!(
            parent: store.span(),
            "subscriber",
            subscriber_id = %subscriber_id
        );
        let poll_time = config.poll_time();
        let poll_error_delay = config.poll_error_delay();
        let worker =
            SubscriptionWorker::new(subscriber_id, config, handlers, store, span.clone());

        Ok(Self {
            subscriber_id: subscriber_id.to_string(),
            poll_time,
            poll_error_delay,
            poller: Box::new(SubscriptionPoller::new(worker)),
            span,
        })
    }

    /// Drive an arbitrary poller with the timing from `config`.
    pub fn with_poller(
        subscriber_id: &str,
        config: &SubscriberConfig,
        poller: impl Poller + 'static,
    ) -> Result<Self> {
        validate_subscriber_id(subscriber_id)?;
        Ok(Self {
            subscriber_id: subscriber_id.to_string(),
            poll_time: config.poll_time(),
            poll_error_delay: config.poll_error_delay(),
            poller: Box::new(poller),
            span: tracing::info_span!("subscriber", subscriber_id = %subscriber_id),
        })
    }

    /// Log against `span` instead.
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    pub fn subscriber_id(&self) -> &str {
        &self.subscriber_id
    }

    /// Poll until `ctx` is cancelled.
    ///
    /// Always returns `Err(Error::Cancelled)`. The background task has
    /// stopped and the poller has been flushed by the time this returns.
    ///
    /// # Panics
    ///
    /// Re-raises a panic from the poller or a handler.
    pub async fn start(self, ctx: &Context) -> Result<()> {
        let span = self.span.clone();
        let mut task = tokio::spawn(run(
            self.poller,
            ctx.clone(),
            self.poll_time,
            self.poll_error_delay,
            self.span,
        ));

        // The loop only exits on its own by panicking.
        let finished = tokio::select! {
            _ = ctx.cancelled() => None,
            joined = &mut task => Some(joined),
        };
        let joined = match finished {
            Some(joined) => joined,
            None => task.await,
        };

        if let Err(e) = joined {
            if e.is_panic() {
                std::panic::resume_unwind(e.into_panic());
            }
            tracing::error!(parent: &span, error = %e, "subscriber task aborted");
        }

        Err(Error::Cancelled)
    }
}

async fn run(
    mut poller: Box<dyn Poller>,
    ctx: Context,
    poll_time: Duration,
    poll_error_delay: Duration,
    span: Span,
) {
    tracing::info!(parent: &span, "subscriber started");

    while !ctx.is_cancelled() {
        let delay = match poller.poll(&ctx).await {
            Ok(()) => poll_time,
            Err(e) => {
                tracing::warn!(
                    parent: &span,
                    error = %e,
                    retry_in_ms = poll_error_delay.as_millis() as u64,
                    "poll failed"
                );
                poll_error_delay
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = ctx.cancelled() => break,
        }
    }

    // `ctx` is already cancelled here.
    if let Err(e) = poller.flush(&Context::background()).await {
        tracing::warn!(parent: &span, error = %e, "final checkpoint failed");
    }
    tracing::info!(parent: &span, "subscriber stopped");
}

fn validate_subscriber_id(subscriber_id: &str) -> Result<(), ConfigError> {
    if subscriber_id.is_empty() || subscriber_id.contains(CATEGORY_SEPARATOR) {
        return Err(ConfigError::InvalidSubscriberId(subscriber_id.to_string()));
    }
    Ok(())
}
