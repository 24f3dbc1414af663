//! Read and write options.
//!
//! # Example
//!
//! ```ignore
//! let opts = GetOptions::builder()
//!     .event_stream("account", account_id)
//!     .since_version(10)
//!     .batch_size(50)
//!     .build()?;
//!
//! let messages = store.get(&ctx, opts).await?;
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::converter::{Converter, ConverterChain};
use crate::error::ConfigError;
use crate::stream::{command_stream_name, event_stream_name, position_stream_name};

/// Batch size used when none is given.
pub const DEFAULT_BATCH_SIZE: i64 = 1000;

/// What a read is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Addressing {
    /// A single stream, read by version.
    Stream(String),
    /// Every stream in a category, read by global position.
    Category(String),
}

/// Validated options for [`MessageStore::get`](crate::MessageStore::get).
#[derive(Debug, Clone)]
pub struct GetOptions {
    addressing: Addressing,
    since: Option<i64>,
    batch_size: i64,
    last: bool,
    converters: ConverterChain,
}

impl GetOptions {
    pub fn builder() -> GetOptionsBuilder {
        GetOptionsBuilder::default()
    }

    pub fn addressing(&self) -> &Addressing {
        &self.addressing
    }

    /// Version (stream reads) or global position (category reads) to start at.
    pub fn since(&self) -> Option<i64> {
        self.since
    }

    pub fn batch_size(&self) -> i64 {
        self.batch_size
    }

    pub fn is_last(&self) -> bool {
        self.last
    }

    pub fn converters(&self) -> &ConverterChain {
        &self.converters
    }
}

/// Collects read options; [`build`](GetOptionsBuilder::build) validates them as a whole.
#[derive(Debug, Default)]
pub struct GetOptionsBuilder {
    targets: Vec<Addressing>,
    since_version: Option<i64>,
    since_position: Option<i64>,
    batch_size: Option<i64>,
    last: bool,
    converters: Vec<Converter>,
}

impl GetOptionsBuilder {
    /// Read the category-wide command stream `{category}:command`.
    pub fn command_stream(mut self, category: &str) -> Self {
        self.targets
            .push(Addressing::Stream(command_stream_name(category, None)));
        self
    }

    /// Read the entity event stream `{category}-{entity_id}`.
    pub fn event_stream(mut self, category: &str, entity_id: Uuid) -> Self {
        self.targets
            .push(Addressing::Stream(event_stream_name(category, entity_id)));
        self
    }

    /// Read a subscriber's checkpoint stream.
    pub fn position_stream(mut self, subscriber_id: &str) -> Self {
        self.targets
            .push(Addressing::Stream(position_stream_name(subscriber_id)));
        self
    }

    /// Read every stream in `category`.
    pub fn category(mut self, category: &str) -> Self {
        self.targets.push(Addressing::Category(category.to_string()));
        self
    }

    /// Start at this version. Stream reads only.
    pub fn since_version(mut self, version: i64) -> Self {
        self.since_version = Some(version);
        self
    }

    /// Start at this global position. Category reads only.
    pub fn since_position(mut self, position: i64) -> Self {
        self.since_position = Some(position);
        self
    }

    pub fn batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    /// Return only the last message in the stream.
    pub fn last(mut self) -> Self {
        self.last = true;
        self
    }

    /// Consult `converter` before the built-in ones.
    pub fn converter(mut self, converter: Converter) -> Self {
        self.converters.push(converter);
        self
    }

    pub fn build(self) -> Result<GetOptions, ConfigError> {
        let mut targets = self.targets.into_iter();
        let addressing = match (targets.next(), targets.next()) {
            (None, _) => return Err(ConfigError::MissingSubscription),
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingSubscriptions),
            (Some(addressing), None) => addressing,
        };

        let since = match &addressing {
            Addressing::Stream(_) => {
                if self.since_position.is_some() {
                    return Err(ConfigError::MismatchedOffset);
                }
                self.since_version
            }
            Addressing::Category(_) => {
                if self.since_version.is_some() {
                    return Err(ConfigError::MismatchedOffset);
                }
                if self.last {
                    return Err(ConfigError::LastRequiresStream);
                }
                self.since_position
            }
        };

        let batch_size = self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size <= 0 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }

        Ok(GetOptions {
            addressing,
            since,
            batch_size,
            last: self.last,
            converters: ConverterChain::with_custom(self.converters),
        })
    }
}

/// Options for [`MessageStore::write`](crate::MessageStore::write).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteOptions {
    /// When set, the write only succeeds if the message receives this version.
    pub expected_position: Option<i64>,
}

impl WriteOptions {
    /// Optimistic-concurrency write at `position`.
    pub fn at_position(position: i64) -> Self {
        Self {
            expected_position: Some(position),
        }
    }
}
