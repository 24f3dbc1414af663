//! # Message Store
//!
//! Client engine for an event-sourced message store: an append-only,
//! globally ordered log of immutable messages partitioned into streams and
//! grouped into categories.
//!
//! ## Core Concepts
//!
//! - [`Command`] = Intent, written to `{category}:command` or `{category}:command-{id}`
//! - [`Event`] = Facts, written to `{category}-{id}`
//! - [`PositionMessage`] = Checkpoints, written to `{subscriber_id}+position`
//! - [`MessageEnvelope`] = The stored record every message converts to and from
//!
//! ## Architecture
//!
//! ```text
//! Producer ──► MessageStore.write() ──► Repository.write_message()
//!
//! Subscriber.start()
//!     │
//!     ▼ (background task, one tick at a time)
//! SubscriptionPoller.poll()
//!     │
//!     ├─► Worker.get_position()      read {subscriber_id}+position
//!     ├─► Worker.get_messages()      read batch since checkpoint
//!     ├─► Worker.process_messages()  dispatch by type to handlers
//!     └─► Worker.set_position()      append new checkpoint
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Store order is dispatch order** - Messages reach handlers in commit order
//! 2. **Versions and positions belong to the store** - Never assigned by the client
//! 3. **One tick at a time** - A subscriber never runs two polls concurrently
//! 4. **At-least-once delivery** - A failed batch is re-read from the last checkpoint
//! 5. **Errors never stop a subscriber** - Only cancellation does
//!
//! ## Example
//!
//! ```ignore
//! use messagestore_core::{Context, Event, MessageStore, SubscriberConfig, WriteOptions};
//!
//! let store = MessageStore::new(repository);
//!
//! let opened = Event::new("account", account_id, "Opened").with_data(&opened)?;
//! store.write(&ctx, &opened.into(), WriteOptions::default()).await?;
//!
//! let config = SubscriberConfig::builder()
//!     .subscribe_to_category("account")
//!     .build()?;
//! let subscriber = store.create_subscriber("statements", vec![Arc::new(OpenedHandler)], config)?;
//!
//! let (ctx, cancel) = Context::with_cancel();
//! tokio::spawn(async move { subscriber.start(&ctx).await });
//! // ...
//! cancel.cancel();
//! ```

// Core modules
mod context;
mod converter;
mod envelope;
mod error;
mod handler;
mod message;
mod options;
mod repository;
mod store;
pub mod stream;
pub mod subscriber;

#[cfg(test)]
mod test_support;

// Re-export cancellation
pub use context::{CancelHandle, Context};

// Re-export data model
pub use envelope::MessageEnvelope;
pub use message::{
    Command, CustomMessage, Event, Message, PositionData, PositionMessage, POSITION_MESSAGE_TYPE,
};

// Re-export conversion
pub use converter::{ConvertError, ConvertFn, Converter, ConverterChain};

// Re-export error types
pub use error::{ConfigError, Error, RepositoryError, Result, ValidationError};

// Re-export options
pub use options::{Addressing, GetOptions, GetOptionsBuilder, WriteOptions, DEFAULT_BATCH_SIZE};

// Re-export interfaces
pub use handler::MessageHandler;
pub use repository::{Repository, RepositoryResult};

// Re-export facade and subscriber types
pub use store::MessageStore;
pub use subscriber::{
    Poller, ProcessOutcome, Subscriber, SubscriberConfig, SubscriberConfigBuilder, Subscription,
    SubscriptionPoller, SubscriptionWorker,
};

// Re-export commonly used external types
pub use async_trait::async_trait;
