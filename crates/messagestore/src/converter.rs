//! Envelope to message conversion.
//!
//! Conversion is first-match-wins. The converters in a [`ConverterChain`] are
//! tried in order; the first that returns `Ok` produces the message. An `Err`
//! means "not mine, try the next one".
//!
//! ```text
//! custom converters ... ─► Command ─► Event (catch-all)
//! ```
//!
//! The event conversion always succeeds, so it is applied by the chain itself
//! after every listed converter has declined. It cannot be listed, which
//! keeps it last.

use std::fmt;
use std::sync::Arc;

use tracing::Span;

use crate::envelope::MessageEnvelope;
use crate::message::{Command, Event, Message, PositionData, PositionMessage};
use crate::stream::{position_stream_name, split_stream_name, StreamName};

/// Signature of a caller-supplied converter.
pub type ConvertFn = dyn Fn(&MessageEnvelope) -> Result<Message, ConvertError> + Send + Sync;

/// Why a converter declined an envelope.
#[derive(Debug, thiserror::Error)]
pub enum ConvertError {
    #[error("{0} is not a command stream")]
    NotCommandStream(String),

    #[error("{actual} is not the position stream {expected}")]
    NotPositionStream { expected: String, actual: String },

    #[error("malformed position data in {stream_name}: {source}")]
    MalformedPosition {
        stream_name: String,
        #[source]
        source: serde_json::Error,
    },

    /// Returned by custom converters for envelopes they do not handle.
    #[error("{0}")]
    NotMatched(String),
}

/// A single matcher in a [`ConverterChain`].
#[derive(Clone)]
pub enum Converter {
    /// Matches streams whose part before the first `-` ends in `:command`.
    Command,
    /// Matches the checkpoint stream of the given subscriber.
    Position(String),
    Custom(Arc<ConvertFn>),
}

impl Converter {
    pub fn custom<F>(f: F) -> Self
    where
        F: Fn(&MessageEnvelope) -> Result<Message, ConvertError> + Send + Sync + 'static,
    {
        Converter::Custom(Arc::new(f))
    }

    pub fn convert(&self, envelope: &MessageEnvelope) -> Result<Message, ConvertError> {
        match self {
            Converter::Command => convert_command(envelope),
            Converter::Position(subscriber_id) => convert_position(subscriber_id, envelope),
            Converter::Custom(f) => f(envelope),
        }
    }
}

impl fmt::Debug for Converter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Converter::Command => f.write_str("Command"),
            Converter::Position(id) => f.debug_tuple("Position").field(id).finish(),
            Converter::Custom(_) => f.write_str("Custom(..)"),
        }
    }
}

/// Ordered converters with the event catch-all applied last.
#[derive(Debug, Clone)]
pub struct ConverterChain {
    converters: Vec<Converter>,
}

impl Default for ConverterChain {
    fn default() -> Self {
        Self::with_custom(Vec::new())
    }
}

impl ConverterChain {
    /// `custom` converters are consulted before the built-in command matcher.
    pub fn with_custom(custom: Vec<Converter>) -> Self {
        let mut converters = custom;
        converters.push(Converter::Command);
        Self { converters }
    }

    pub fn convert(&self, envelope: &MessageEnvelope) -> Message {
        for converter in &self.converters {
            match converter.convert(envelope) {
                Ok(message) => return message,
                Err(e) => {
                    tracing::trace!(
                        stream_name = %envelope.stream_name,
                        converter = ?converter,
                        reason = %e,
                        "converter declined envelope"
                    );
                }
            }
        }
        convert_event(envelope)
    }

    /// Convert a batch, preserving order.
    ///
    /// `None` entries are skipped and logged against `span`.
    pub fn convert_all<I, E>(&self, envelopes: I, span: &Span) -> Vec<Message>
    where
        I: IntoIterator<Item = E>,
        E: Into<Option<MessageEnvelope>>,
    {
        envelopes
            .into_iter()
            .enumerate()
            .filter_map(|(index, envelope)| match envelope.into() {
                Some(envelope) => Some(self.convert(&envelope)),
                None => {
                    tracing::warn!(parent: span, index, "skipping empty envelope in batch");
                    None
                }
            })
            .collect()
    }
}

fn convert_command(envelope: &MessageEnvelope) -> Result<Message, ConvertError> {
    let stream = StreamName::parse(&envelope.stream_name);
    if !stream.is_command {
        return Err(ConvertError::NotCommandStream(envelope.stream_name.clone()));
    }

    Ok(Message::Command(Command {
        id: envelope.id,
        entity_id: stream.entity_id,
        stream_category: stream.category,
        message_type: envelope.message_type.clone(),
        data: decode_payload(&envelope.data),
        metadata: decode_payload(&envelope.metadata),
        version: envelope.version,
        global_position: envelope.global_position,
        time: Some(envelope.time),
    }))
}

fn convert_position(
    subscriber_id: &str,
    envelope: &MessageEnvelope,
) -> Result<Message, ConvertError> {
    let expected = position_stream_name(subscriber_id);
    if envelope.stream_name != expected {
        return Err(ConvertError::NotPositionStream {
            expected,
            actual: envelope.stream_name.clone(),
        });
    }

    let data: PositionData =
        serde_json::from_slice(&envelope.data).map_err(|source| ConvertError::MalformedPosition {
            stream_name: envelope.stream_name.clone(),
            source,
        })?;

    Ok(Message::Position(PositionMessage {
        id: envelope.id,
        subscriber_id: subscriber_id.to_string(),
        checkpoint: data.position,
        version: envelope.version,
        global_position: envelope.global_position,
        time: Some(envelope.time),
    }))
}

fn convert_event(envelope: &MessageEnvelope) -> Message {
    let (category, entity) = split_stream_name(&envelope.stream_name);

    Message::Event(Event {
        id: envelope.id,
        entity_id: entity.and_then(|id| uuid::Uuid::parse_str(id).ok()),
        stream_category: category.to_string(),
        message_type: envelope.message_type.clone(),
        data: decode_payload(&envelope.data),
        metadata: decode_payload(&envelope.metadata),
        version: envelope.version,
        global_position: envelope.global_position,
        time: Some(envelope.time),
    })
}

// Empty or non-JSON payloads read as absent.
fn decode_payload(bytes: &[u8]) -> Option<serde_json::Value> {
    if bytes.is_empty() {
        return None;
    }
    match serde_json::from_slice(bytes) {
        Ok(value) => Some(value),
        Err(e) => {
            tracing::debug!(error = %e, "payload is not valid JSON");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::json;
    use uuid::Uuid;

    fn envelope(stream_name: &str, message_type: &str, data: &[u8]) -> MessageEnvelope {
        MessageEnvelope {
            id: Uuid::new_v4(),
            entity_id: None,
            stream_name: stream_name.to_string(),
            stream_category: String::new(),
            message_type: message_type.to_string(),
            version: 2,
            global_position: 9,
            data: data.to_vec(),
            metadata: Vec::new(),
            time: Utc::now(),
        }
    }

    #[test]
    fn test_round_trip_command() {
        let id = Uuid::new_v4();
        let cmd = Command::new("account", "Deposit")
            .for_entity(id)
            .with_data(&json!({ "amount": 5 }))
            .unwrap();
        let env = cmd.to_envelope().unwrap();

        let msg = ConverterChain::default().convert(&env);
        let converted = msg.as_command().expect("should convert to a command");
        assert_eq!(converted.message_type, "Deposit");
        assert_eq!(converted.stream_category, "account");
        assert_eq!(converted.entity_id, Some(id));
        assert_eq!(converted.data, Some(json!({ "amount": 5 })));
    }

    #[test]
    fn test_round_trip_category_command() {
        let env = Command::new("account", "Audit")
            .with_data(&json!({}))
            .unwrap()
            .to_envelope()
            .unwrap();
        let msg = ConverterChain::default().convert(&env);
        let converted = msg.as_command().unwrap();
        assert_eq!(converted.stream_category, "account");
        assert_eq!(converted.entity_id, None);
    }

    #[test]
    fn test_round_trip_event() {
        let id = Uuid::new_v4();
        let env = Event::new("account", id, "Deposited")
            .with_data(&json!({ "amount": 5 }))
            .unwrap()
            .to_envelope()
            .unwrap();

        let msg = ConverterChain::default().convert(&env);
        let converted = msg.as_event().expect("should convert to an event");
        assert_eq!(msg.message_type(), "Deposited");
        assert_eq!(converted.stream_category, "account");
        assert_eq!(converted.entity_id, Some(id));
        assert_eq!(msg.version(), env.version);
    }

    #[test]
    fn test_event_fallback_tolerates_bad_entity_id() {
        let env = envelope("account-notauuid", "Deposited", b"{}");
        let msg = ConverterChain::default().convert(&env);
        let event = msg.as_event().unwrap();
        assert_eq!(event.stream_category, "account");
        assert_eq!(event.entity_id, None);
    }

    #[test]
    fn test_custom_converters_run_first() {
        #[derive(Debug)]
        struct Audit;
        impl crate::message::CustomMessage for Audit {
            fn message_type(&self) -> &str {
                "Audit"
            }
            fn version(&self) -> i64 {
                0
            }
            fn position(&self) -> i64 {
                0
            }
            fn to_envelope(&self) -> Result<MessageEnvelope, crate::ValidationError> {
                Err(crate::ValidationError::MissingData)
            }
            fn as_any(&self) -> &dyn std::any::Any {
                self
            }
        }

        let chain = ConverterChain::with_custom(vec![Converter::custom(|env| {
            if env.message_type == "Audit" {
                Ok(Message::Custom(Arc::new(Audit)))
            } else {
                Err(ConvertError::NotMatched("not an audit".into()))
            }
        })]);

        let audit = chain.convert(&envelope("account:command", "Audit", b"{}"));
        assert!(audit.downcast_custom::<Audit>().is_some());

        let other = chain.convert(&envelope("account:command", "Deposit", b"{}"));
        assert!(other.as_command().is_some());
    }

    #[test]
    fn test_position_converter() {
        let chain = ConverterChain::with_custom(vec![Converter::Position("ledger".into())]);

        let msg = chain.convert(&envelope(
            "ledger+position",
            "PositionCommitted",
            br#"{"position":400}"#,
        ));
        assert_eq!(msg.as_position().unwrap().checkpoint, 400);

        // Wrong shape falls through to the catch-all.
        let msg = chain.convert(&envelope(
            "ledger+position",
            "PositionCommitted",
            br#"{"pos":1}"#,
        ));
        assert!(msg.as_position().is_none());

        // Another subscriber's checkpoint stream is not ours.
        let msg = chain.convert(&envelope(
            "other+position",
            "PositionCommitted",
            br#"{"position":1}"#,
        ));
        assert!(msg.as_position().is_none());
    }

    #[test]
    fn test_convert_all_skips_empty_entries() {
        let batch = vec![
            Some(envelope("account-1", "A", b"{}")),
            None,
            Some(envelope("account-2", "B", b"{}")),
        ];
        let messages = ConverterChain::default().convert_all(batch, &Span::none());
        let types: Vec<_> = messages.iter().map(|m| m.message_type()).collect();
        assert_eq!(types, vec!["A", "B"]);
    }
}
