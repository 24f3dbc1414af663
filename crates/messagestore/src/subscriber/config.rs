//! Subscriber configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ConfigError;
use crate::options::DEFAULT_BATCH_SIZE;

pub const DEFAULT_POLL_TIME: Duration = Duration::from_millis(200);
pub const DEFAULT_POLL_ERROR_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_UPDATE_INTERVAL: u32 = 100;

/// What a subscriber reads.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Subscription {
    /// Every stream in the category, ordered by global position.
    Category(String),
    /// The category-wide command stream `{category}:command`, ordered by version.
    CommandStream(String),
    /// A single entity stream `{category}-{entity_id}`, ordered by version.
    EntityStream { category: String, entity_id: Uuid },
}

impl Subscription {
    /// Stream subscriptions track versions; category subscriptions track
    /// global positions.
    pub fn is_stream(&self) -> bool {
        !matches!(self, Subscription::Category(_))
    }

    fn category(&self) -> &str {
        match self {
            Subscription::Category(category)
            | Subscription::CommandStream(category)
            | Subscription::EntityStream { category, .. } => category,
        }
    }
}

/// Validated, immutable subscriber settings.
///
/// # Example
///
/// ```ignore
/// let config = SubscriberConfig::builder()
///     .subscribe_to_category("account")
///     .poll_time(Duration::from_millis(50))
///     .update_interval(10)
///     .build()?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberConfig {
    subscription: Subscription,
    poll_time: Duration,
    poll_error_delay: Duration,
    update_interval: u32,
    batch_size: i64,
}

impl SubscriberConfig {
    pub fn builder() -> SubscriberConfigBuilder {
        SubscriberConfigBuilder::default()
    }

    pub fn subscription(&self) -> &Subscription {
        &self.subscription
    }

    /// Sleep between successful polls.
    pub fn poll_time(&self) -> Duration {
        self.poll_time
    }

    /// Sleep after a failed poll.
    pub fn poll_error_delay(&self) -> Duration {
        self.poll_error_delay
    }

    /// Messages processed between checkpoint writes.
    pub fn update_interval(&self) -> u32 {
        self.update_interval
    }

    pub fn batch_size(&self) -> i64 {
        self.batch_size
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubscriberConfigBuilder {
    subscriptions: Vec<Subscription>,
    poll_time: Option<Duration>,
    poll_error_delay: Option<Duration>,
    update_interval: Option<u32>,
    batch_size: Option<i64>,
}

impl SubscriberConfigBuilder {
    pub fn subscribe_to_category(self, category: &str) -> Self {
        self.subscription(Subscription::Category(category.to_string()))
    }

    pub fn subscribe_to_command_stream(self, category: &str) -> Self {
        self.subscription(Subscription::CommandStream(category.to_string()))
    }

    pub fn subscribe_to_entity_stream(self, category: &str, entity_id: Uuid) -> Self {
        self.subscription(Subscription::EntityStream {
            category: category.to_string(),
            entity_id,
        })
    }

    pub fn subscription(mut self, subscription: Subscription) -> Self {
        self.subscriptions.push(subscription);
        self
    }

    pub fn poll_time(mut self, poll_time: Duration) -> Self {
        self.poll_time = Some(poll_time);
        self
    }

    pub fn poll_error_delay(mut self, delay: Duration) -> Self {
        self.poll_error_delay = Some(delay);
        self
    }

    pub fn update_interval(mut self, interval: u32) -> Self {
        self.update_interval = Some(interval);
        self
    }

    pub fn batch_size(mut self, batch_size: i64) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn build(self) -> Result<SubscriberConfig, ConfigError> {
        let mut subscriptions = self.subscriptions.into_iter();
        let subscription = match (subscriptions.next(), subscriptions.next()) {
            (None, _) => return Err(ConfigError::MissingSubscription),
            (Some(_), Some(_)) => return Err(ConfigError::ConflictingSubscriptions),
            (Some(subscription), None) => subscription,
        };
        if subscription.category().is_empty() {
            return Err(ConfigError::MissingSubscription);
        }

        let poll_time = self.poll_time.unwrap_or(DEFAULT_POLL_TIME);
        if poll_time.is_zero() {
            return Err(ConfigError::InvalidPollTime);
        }

        let poll_error_delay = self.poll_error_delay.unwrap_or(DEFAULT_POLL_ERROR_DELAY);
        if poll_error_delay.is_zero() {
            return Err(ConfigError::InvalidPollErrorDelay);
        }

        let update_interval = self.update_interval.unwrap_or(DEFAULT_UPDATE_INTERVAL);
        if update_interval < 2 {
            return Err(ConfigError::InvalidUpdateInterval(update_interval));
        }

        let batch_size = self.batch_size.unwrap_or(DEFAULT_BATCH_SIZE);
        if batch_size <= 0 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }

        Ok(SubscriberConfig {
            subscription,
            poll_time,
            poll_error_delay,
            update_interval,
            batch_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SubscriberConfig::builder()
            .subscribe_to_category("account")
            .build()
            .unwrap();
        assert_eq!(config.subscription(), &Subscription::Category("account".into()));
        assert_eq!(config.poll_time(), DEFAULT_POLL_TIME);
        assert_eq!(config.poll_error_delay(), DEFAULT_POLL_ERROR_DELAY);
        assert_eq!(config.update_interval(), DEFAULT_UPDATE_INTERVAL);
        assert_eq!(config.batch_size(), DEFAULT_BATCH_SIZE);
        assert!(!config.subscription().is_stream());
    }

    #[test]
    fn test_exactly_one_subscription() {
        assert_eq!(
            SubscriberConfig::builder().build().unwrap_err(),
            ConfigError::MissingSubscription
        );
        assert_eq!(
            SubscriberConfig::builder()
                .subscribe_to_category("account")
                .subscribe_to_command_stream("account")
                .build()
                .unwrap_err(),
            ConfigError::ConflictingSubscriptions
        );
        assert_eq!(
            SubscriberConfig::builder()
                .subscribe_to_category("")
                .build()
                .unwrap_err(),
            ConfigError::MissingSubscription
        );
    }

    #[test]
    fn test_rejects_invalid_values() {
        let base = || SubscriberConfig::builder().subscribe_to_command_stream("account");

        assert_eq!(
            base().poll_time(Duration::ZERO).build().unwrap_err(),
            ConfigError::InvalidPollTime
        );
        assert_eq!(
            base().poll_error_delay(Duration::ZERO).build().unwrap_err(),
            ConfigError::InvalidPollErrorDelay
        );
        assert_eq!(
            base().update_interval(1).build().unwrap_err(),
            ConfigError::InvalidUpdateInterval(1)
        );
        assert_eq!(
            base().batch_size(-5).build().unwrap_err(),
            ConfigError::InvalidBatchSize(-5)
        );
        assert!(base().update_interval(2).build().is_ok());
    }

    #[test]
    fn test_subscription_serde() {
        let id = Uuid::new_v4();
        let sub = Subscription::EntityStream {
            category: "account".into(),
            entity_id: id,
        };
        let json = serde_json::to_value(&sub).unwrap();
        assert_eq!(json["entity_stream"]["category"], "account");
        let back: Subscription = serde_json::from_value(json).unwrap();
        assert_eq!(back, sub);
        assert!(back.is_stream());
    }
}
