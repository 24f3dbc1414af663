//! Domain-level messages.
//!
//! A [`Message`] is a typed view over a [`MessageEnvelope`]:
//! - [`Command`] = intent, addressed to a category-wide or entity-scoped command stream
//! - [`Event`] = fact, addressed to an entity stream
//! - [`PositionMessage`] = a subscriber checkpoint, addressed to `{subscriber_id}+position`
//!
//! Messages are immutable once built. [`Message::to_envelope`] validates and
//! derives the stream name without touching the source message.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::envelope::MessageEnvelope;
use crate::error::ValidationError;
use crate::stream::{
    command_stream_name, event_stream_name, position_stream_name, CATEGORY_SEPARATOR,
};

/// Message type written to checkpoint streams.
pub const POSITION_MESSAGE_TYPE: &str = "PositionCommitted";

// ============================================================================
// Message
// ============================================================================

/// Any message that can be written to or read from the store.
#[derive(Debug, Clone)]
pub enum Message {
    Command(Command),
    Event(Event),
    Position(PositionMessage),
    /// Produced by a caller-supplied converter.
    Custom(Arc<dyn CustomMessage>),
}

/// A message type defined outside this crate.
///
/// Returned by [`Converter::Custom`](crate::Converter::Custom) functions so
/// that applications can read envelopes into their own types.
pub trait CustomMessage: fmt::Debug + Send + Sync + 'static {
    fn message_type(&self) -> &str;

    fn version(&self) -> i64;

    fn position(&self) -> i64;

    fn to_envelope(&self) -> Result<MessageEnvelope, ValidationError>;

    fn as_any(&self) -> &dyn Any;
}

impl Message {
    pub fn message_type(&self) -> &str {
        match self {
            Message::Command(cmd) => &cmd.message_type,
            Message::Event(event) => &event.message_type,
            Message::Position(_) => POSITION_MESSAGE_TYPE,
            Message::Custom(custom) => custom.message_type(),
        }
    }

    /// Sequence number within the message's stream.
    pub fn version(&self) -> i64 {
        match self {
            Message::Command(cmd) => cmd.version,
            Message::Event(event) => event.version,
            Message::Position(pos) => pos.version,
            Message::Custom(custom) => custom.version(),
        }
    }

    /// Sequence number across the whole store.
    pub fn position(&self) -> i64 {
        match self {
            Message::Command(cmd) => cmd.global_position,
            Message::Event(event) => event.global_position,
            Message::Position(pos) => pos.global_position,
            Message::Custom(custom) => custom.position(),
        }
    }

    pub fn to_envelope(&self) -> Result<MessageEnvelope, ValidationError> {
        match self {
            Message::Command(cmd) => cmd.to_envelope(),
            Message::Event(event) => event.to_envelope(),
            Message::Position(pos) => pos.to_envelope(),
            Message::Custom(custom) => custom.to_envelope(),
        }
    }

    /// The stream this message is addressed to.
    pub fn stream_name(&self) -> Result<String, ValidationError> {
        match self {
            Message::Command(cmd) => Ok(cmd.stream_name()),
            Message::Event(event) => event.stream_name(),
            Message::Position(pos) => Ok(position_stream_name(&pos.subscriber_id)),
            Message::Custom(custom) => custom.to_envelope().map(|env| env.stream_name),
        }
    }

    pub fn as_command(&self) -> Option<&Command> {
        match self {
            Message::Command(cmd) => Some(cmd),
            _ => None,
        }
    }

    pub fn as_event(&self) -> Option<&Event> {
        match self {
            Message::Event(event) => Some(event),
            _ => None,
        }
    }

    pub fn as_position(&self) -> Option<&PositionMessage> {
        match self {
            Message::Position(pos) => Some(pos),
            _ => None,
        }
    }

    /// Downcast a [`Message::Custom`] to its concrete type.
    pub fn downcast_custom<T: CustomMessage>(&self) -> Option<&T> {
        match self {
            Message::Custom(custom) => custom.as_any().downcast_ref::<T>(),
            _ => None,
        }
    }
}

impl From<Command> for Message {
    fn from(cmd: Command) -> Self {
        Message::Command(cmd)
    }
}

impl From<Event> for Message {
    fn from(event: Event) -> Self {
        Message::Event(event)
    }
}

impl From<PositionMessage> for Message {
    fn from(pos: PositionMessage) -> Self {
        Message::Position(pos)
    }
}

// ============================================================================
// Command
// ============================================================================

/// A request for something to happen.
///
/// Category-wide commands go to `{category}:command`; setting `entity_id`
/// addresses `{category}:command-{entity_id}` instead.
#[derive(Debug, Clone, PartialEq)]
pub struct Command {
    pub id: Uuid,
    pub entity_id: Option<Uuid>,
    pub stream_category: String,
    pub message_type: String,
    pub data: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    /// Assigned by the store.
    pub version: i64,
    /// Assigned by the store.
    pub global_position: i64,
    /// Commit time, set on messages read from the store.
    pub time: Option<DateTime<Utc>>,
}

impl Command {
    /// A category-wide command with a fresh id and no data.
    pub fn new(category: impl Into<String>, message_type: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id: None,
            stream_category: category.into(),
            message_type: message_type.into(),
            data: None,
            metadata: None,
            version: 0,
            global_position: 0,
            time: None,
        }
    }

    /// Address the command to a single entity's command stream.
    pub fn for_entity(mut self, entity_id: Uuid) -> Self {
        self.entity_id = Some(entity_id);
        self
    }

    pub fn with_data<T: Serialize + ?Sized>(mut self, data: &T) -> Result<Self, ValidationError> {
        self.data = Some(to_value(data)?);
        Ok(self)
    }

    pub fn with_metadata<T: Serialize + ?Sized>(
        mut self,
        metadata: &T,
    ) -> Result<Self, ValidationError> {
        self.metadata = Some(to_value(metadata)?);
        Ok(self)
    }

    /// Deserialize `data` into a concrete type.
    pub fn decode_data<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        decode(self.data.as_ref())
    }

    pub fn stream_name(&self) -> String {
        command_stream_name(&self.stream_category, non_nil(self.entity_id))
    }

    pub fn to_envelope(&self) -> Result<MessageEnvelope, ValidationError> {
        validate_type_and_category(&self.message_type, &self.stream_category)?;
        if self.id.is_nil() {
            return Err(ValidationError::NoId);
        }
        let data = encode_data(self.data.as_ref())?;
        let metadata = encode_metadata(self.metadata.as_ref())?;

        Ok(MessageEnvelope {
            id: self.id,
            entity_id: non_nil(self.entity_id),
            stream_name: self.stream_name(),
            stream_category: self.stream_category.clone(),
            message_type: self.message_type.clone(),
            version: self.version,
            global_position: self.global_position,
            data,
            metadata,
            time: self.time.unwrap_or_else(Utc::now),
        })
    }
}

// ============================================================================
// Event
// ============================================================================

/// A fact that happened to an entity. Always addressed to `{category}-{entity_id}`.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: Uuid,
    /// Required. `None` fails validation with `MissingEntityId`.
    pub entity_id: Option<Uuid>,
    pub stream_category: String,
    pub message_type: String,
    pub data: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    /// Assigned by the store.
    pub version: i64,
    /// Assigned by the store.
    pub global_position: i64,
    pub time: Option<DateTime<Utc>>,
}

impl Event {
    /// An event with a fresh id and no data.
    pub fn new(
        category: impl Into<String>,
        entity_id: Uuid,
        message_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_id: Some(entity_id),
            stream_category: category.into(),
            message_type: message_type.into(),
            data: None,
            metadata: None,
            version: 0,
            global_position: 0,
            time: None,
        }
    }

    pub fn with_data<T: Serialize + ?Sized>(mut self, data: &T) -> Result<Self, ValidationError> {
        self.data = Some(to_value(data)?);
        Ok(self)
    }

    pub fn with_metadata<T: Serialize + ?Sized>(
        mut self,
        metadata: &T,
    ) -> Result<Self, ValidationError> {
        self.metadata = Some(to_value(metadata)?);
        Ok(self)
    }

    pub fn decode_data<T: DeserializeOwned>(&self) -> serde_json::Result<T> {
        decode(self.data.as_ref())
    }

    pub fn stream_name(&self) -> Result<String, ValidationError> {
        non_nil(self.entity_id)
            .map(|id| event_stream_name(&self.stream_category, id))
            .ok_or(ValidationError::MissingEntityId)
    }

    pub fn to_envelope(&self) -> Result<MessageEnvelope, ValidationError> {
        validate_type_and_category(&self.message_type, &self.stream_category)?;
        let stream_name = self.stream_name()?;
        if self.id.is_nil() {
            return Err(ValidationError::NoId);
        }
        let data = encode_data(self.data.as_ref())?;
        let metadata = encode_metadata(self.metadata.as_ref())?;

        Ok(MessageEnvelope {
            id: self.id,
            entity_id: non_nil(self.entity_id),
            stream_name,
            stream_category: self.stream_category.clone(),
            message_type: self.message_type.clone(),
            version: self.version,
            global_position: self.global_position,
            data,
            metadata,
            time: self.time.unwrap_or_else(Utc::now),
        })
    }
}

// ============================================================================
// PositionMessage
// ============================================================================

/// Checkpoint payload stored in a position stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PositionData {
    pub position: i64,
}

/// Records where a subscriber should resume reading.
///
/// `checkpoint` is in the unit the subscription reads by: global position
/// for category subscriptions, stream version for stream subscriptions.
#[derive(Debug, Clone, PartialEq)]
pub struct PositionMessage {
    pub id: Uuid,
    pub subscriber_id: String,
    pub checkpoint: i64,
    pub version: i64,
    pub global_position: i64,
    pub time: Option<DateTime<Utc>>,
}

impl PositionMessage {
    pub fn new(subscriber_id: impl Into<String>, checkpoint: i64) -> Self {
        Self {
            id: Uuid::new_v4(),
            subscriber_id: subscriber_id.into(),
            checkpoint,
            version: 0,
            global_position: 0,
            time: None,
        }
    }

    pub fn to_envelope(&self) -> Result<MessageEnvelope, ValidationError> {
        if self.subscriber_id.is_empty() {
            return Err(ValidationError::MissingSubscriberId);
        }
        if self.id.is_nil() {
            return Err(ValidationError::NoId);
        }
        let data = serde_json::to_vec(&PositionData {
            position: self.checkpoint,
        })
        .map_err(ValidationError::UnserializableData)?;

        Ok(MessageEnvelope {
            id: self.id,
            entity_id: None,
            stream_name: position_stream_name(&self.subscriber_id),
            stream_category: self.subscriber_id.clone(),
            message_type: POSITION_MESSAGE_TYPE.to_string(),
            version: self.version,
            global_position: self.global_position,
            data,
            metadata: Vec::new(),
            time: self.time.unwrap_or_else(Utc::now),
        })
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn validate_type_and_category(message_type: &str, category: &str) -> Result<(), ValidationError> {
    if message_type.is_empty() {
        return Err(ValidationError::MissingType);
    }
    if category.is_empty() {
        return Err(ValidationError::MissingCategory);
    }
    if category.contains(CATEGORY_SEPARATOR) {
        return Err(ValidationError::InvalidCategory(category.to_string()));
    }
    Ok(())
}

fn non_nil(id: Option<Uuid>) -> Option<Uuid> {
    id.filter(|id| !id.is_nil())
}

fn to_value<T: Serialize + ?Sized>(value: &T) -> Result<serde_json::Value, ValidationError> {
    serde_json::to_value(value).map_err(ValidationError::UnserializableData)
}

fn encode_data(data: Option<&serde_json::Value>) -> Result<Vec<u8>, ValidationError> {
    match data {
        None | Some(serde_json::Value::Null) => Err(ValidationError::MissingData),
        Some(value) => serde_json::to_vec(value).map_err(ValidationError::UnserializableData),
    }
}

fn encode_metadata(metadata: Option<&serde_json::Value>) -> Result<Vec<u8>, ValidationError> {
    match metadata {
        None => Ok(Vec::new()),
        Some(value) => serde_json::to_vec(value).map_err(ValidationError::UnserializableData),
    }
}

fn decode<T: DeserializeOwned>(value: Option<&serde_json::Value>) -> serde_json::Result<T> {
    T::deserialize(value.unwrap_or(&serde_json::Value::Null))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn deposit() -> Command {
        Command::new("account", "Deposit")
            .with_data(&json!({ "amount": 10 }))
            .unwrap()
    }

    fn deposited(entity_id: Uuid) -> Event {
        Event::new("account", entity_id, "Deposited")
            .with_data(&json!({ "amount": 10 }))
            .unwrap()
    }

    #[test]
    fn test_command_stream_name_category_wide() {
        let env = deposit().to_envelope().unwrap();
        assert_eq!(env.stream_name, "account:command");
        assert_eq!(env.stream_category, "account");
        assert_eq!(env.entity_id, None);
        assert_eq!(env.data, br#"{"amount":10}"#.to_vec());
        assert!(env.metadata.is_empty());
    }

    #[test]
    fn test_command_stream_name_entity_scoped() {
        let id = Uuid::new_v4();
        let env = deposit().for_entity(id).to_envelope().unwrap();
        assert_eq!(env.stream_name, format!("account:command-{id}"));
        assert_eq!(env.entity_id, Some(id));
    }

    #[test]
    fn test_event_stream_name() {
        let id = Uuid::new_v4();
        let env = deposited(id).to_envelope().unwrap();
        assert_eq!(env.stream_name, format!("account-{id}"));
        assert_eq!(env.message_type, "Deposited");
    }

    #[test]
    fn test_command_validation_order() {
        let mut cmd = deposit();
        cmd.message_type.clear();
        cmd.stream_category = "bad-category".into();
        assert!(matches!(cmd.to_envelope(), Err(ValidationError::MissingType)));

        let mut cmd = deposit();
        cmd.stream_category.clear();
        assert!(matches!(cmd.to_envelope(), Err(ValidationError::MissingCategory)));

        let mut cmd = deposit();
        cmd.stream_category = "bad-category".into();
        cmd.id = Uuid::nil();
        assert!(matches!(
            cmd.to_envelope(),
            Err(ValidationError::InvalidCategory(c)) if c == "bad-category"
        ));

        let mut cmd = deposit();
        cmd.id = Uuid::nil();
        cmd.data = None;
        assert!(matches!(cmd.to_envelope(), Err(ValidationError::NoId)));

        let mut cmd = deposit();
        cmd.data = None;
        assert!(matches!(cmd.to_envelope(), Err(ValidationError::MissingData)));
    }

    #[test]
    fn test_event_validation_order() {
        let mut event = deposited(Uuid::new_v4());
        event.stream_category = "bad-category".into();
        event.entity_id = None;
        assert!(matches!(
            event.to_envelope(),
            Err(ValidationError::InvalidCategory(_))
        ));

        let mut event = deposited(Uuid::new_v4());
        event.entity_id = None;
        event.id = Uuid::nil();
        assert!(matches!(
            event.to_envelope(),
            Err(ValidationError::MissingEntityId)
        ));

        let mut event = deposited(Uuid::new_v4());
        event.entity_id = Some(Uuid::nil());
        assert!(matches!(
            event.to_envelope(),
            Err(ValidationError::MissingEntityId)
        ));

        let mut event = deposited(Uuid::new_v4());
        event.id = Uuid::nil();
        assert!(matches!(event.to_envelope(), Err(ValidationError::NoId)));

        let mut event = deposited(Uuid::new_v4());
        event.data = Some(serde_json::Value::Null);
        assert!(matches!(event.to_envelope(), Err(ValidationError::MissingData)));
    }

    #[test]
    fn test_to_envelope_does_not_mutate() {
        let cmd = deposit();
        let before = cmd.clone();
        let _ = cmd.to_envelope().unwrap();
        assert_eq!(cmd, before);
    }

    #[test]
    fn test_position_message_envelope() {
        let pos = PositionMessage::new("ledger", 400);
        let env = pos.to_envelope().unwrap();
        assert_eq!(env.stream_name, "ledger+position");
        assert_eq!(env.message_type, POSITION_MESSAGE_TYPE);
        let data: PositionData = serde_json::from_slice(&env.data).unwrap();
        assert_eq!(data.position, 400);

        let missing = PositionMessage::new("", 1);
        assert!(matches!(
            missing.to_envelope(),
            Err(ValidationError::MissingSubscriberId)
        ));
    }

    #[test]
    fn test_decode_data() {
        #[derive(Deserialize)]
        struct Amount {
            amount: u32,
        }
        let amount: Amount = deposit().decode_data().unwrap();
        assert_eq!(amount.amount, 10);
    }

    #[test]
    fn test_message_accessors() {
        let mut event = deposited(Uuid::new_v4());
        event.version = 3;
        event.global_position = 42;
        let msg = Message::from(event);
        assert_eq!(msg.message_type(), "Deposited");
        assert_eq!(msg.version(), 3);
        assert_eq!(msg.position(), 42);
        assert!(msg.as_event().is_some());
        assert!(msg.as_command().is_none());
    }
}
