//! Test doubles shared by unit tests in this crate.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use crate::repository::{Repository, RepositoryResult};
use crate::{Context, Message, MessageEnvelope, MessageHandler, RepositoryError};

/// Repository over a plain vector that records every call it receives.
#[derive(Default)]
pub(crate) struct ScriptedRepository {
    pub log: Mutex<Vec<MessageEnvelope>>,
    pub calls: Mutex<Vec<String>>,
    pub fail_reads: AtomicBool,
}

impl ScriptedRepository {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append an envelope as if it had been committed.
    pub fn seed(&self, mut envelope: MessageEnvelope) {
        let mut log = self.log.lock().unwrap();
        envelope.version = log
            .iter()
            .filter(|e| e.stream_name == envelope.stream_name)
            .count() as i64;
        envelope.global_position = log.len() as i64 + 1;
        log.push(envelope);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn writes_to(&self, stream_name: &str) -> Vec<MessageEnvelope> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| e.stream_name == stream_name)
            .cloned()
            .collect()
    }

    fn record(&self, call: String) -> RepositoryResult<()> {
        self.calls.lock().unwrap().push(call);
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(RepositoryError::Backend(anyhow::anyhow!("connection refused")));
        }
        Ok(())
    }

    fn select(&self, pred: impl Fn(&MessageEnvelope) -> bool, limit: i64) -> Vec<MessageEnvelope> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|e| pred(e))
            .take(limit as usize)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Repository for ScriptedRepository {
    async fn get_all_messages_in_stream(
        &self,
        _ctx: &Context,
        stream_name: &str,
        batch_size: i64,
    ) -> RepositoryResult<Vec<MessageEnvelope>> {
        self.record(format!("stream {stream_name} batch={batch_size}"))?;
        Ok(self.select(|e| e.stream_name == stream_name, batch_size))
    }

    async fn get_all_messages_in_stream_since(
        &self,
        _ctx: &Context,
        stream_name: &str,
        since_version: i64,
        batch_size: i64,
    ) -> RepositoryResult<Vec<MessageEnvelope>> {
        self.record(format!(
            "stream {stream_name} since={since_version} batch={batch_size}"
        ))?;
        Ok(self.select(
            |e| e.stream_name == stream_name && e.version >= since_version,
            batch_size,
        ))
    }

    async fn get_all_messages_in_category(
        &self,
        _ctx: &Context,
        category: &str,
        batch_size: i64,
    ) -> RepositoryResult<Vec<MessageEnvelope>> {
        self.record(format!("category {category} batch={batch_size}"))?;
        Ok(self.select(|e| e.stream_category == category, batch_size))
    }

    async fn get_all_messages_in_category_since(
        &self,
        _ctx: &Context,
        category: &str,
        since_global_position: i64,
        batch_size: i64,
    ) -> RepositoryResult<Vec<MessageEnvelope>> {
        self.record(format!(
            "category {category} since={since_global_position} batch={batch_size}"
        ))?;
        Ok(self.select(
            |e| e.stream_category == category && e.global_position >= since_global_position,
            batch_size,
        ))
    }

    async fn get_last_message_in_stream(
        &self,
        _ctx: &Context,
        stream_name: &str,
    ) -> RepositoryResult<Option<MessageEnvelope>> {
        self.record(format!("last {stream_name}"))?;
        Ok(self.select(|e| e.stream_name == stream_name, i64::MAX).pop())
    }

    async fn write_message(
        &self,
        _ctx: &Context,
        envelope: MessageEnvelope,
    ) -> RepositoryResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("write {}", envelope.stream_name));
        self.seed(envelope);
        Ok(())
    }

    async fn write_message_with_expected_position(
        &self,
        _ctx: &Context,
        envelope: MessageEnvelope,
        expected_position: i64,
    ) -> RepositoryResult<()> {
        self.calls.lock().unwrap().push(format!(
            "write {} at={expected_position}",
            envelope.stream_name
        ));
        let actual = self.writes_to(&envelope.stream_name).len() as i64;
        if actual != expected_position {
            return Err(RepositoryError::VersionConflict {
                stream_name: envelope.stream_name,
                expected: expected_position,
                actual,
            });
        }
        self.seed(envelope);
        Ok(())
    }
}

/// Raw envelope for seeding; versions and positions are assigned by `seed`.
pub(crate) fn envelope(
    stream_name: &str,
    category: &str,
    message_type: &str,
    data: &[u8],
) -> MessageEnvelope {
    MessageEnvelope {
        id: Uuid::new_v4(),
        entity_id: None,
        stream_name: stream_name.to_string(),
        stream_category: category.to_string(),
        message_type: message_type.to_string(),
        version: 0,
        global_position: 0,
        data: data.to_vec(),
        metadata: Vec::new(),
        time: Utc::now(),
    }
}

/// Handler that records what it sees and optionally fails.
pub(crate) struct ScriptedHandler {
    message_type: String,
    fail: bool,
    pub seen: Mutex<Vec<(String, i64)>>,
}

impl ScriptedHandler {
    pub fn new(message_type: &str) -> Arc<Self> {
        Arc::new(Self {
            message_type: message_type.to_string(),
            fail: false,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn failing(message_type: &str) -> Arc<Self> {
        Arc::new(Self {
            message_type: message_type.to_string(),
            fail: true,
            seen: Mutex::new(Vec::new()),
        })
    }

    pub fn count(&self) -> usize {
        self.seen.lock().unwrap().len()
    }
}

#[async_trait]
impl MessageHandler for ScriptedHandler {
    fn message_type(&self) -> &str {
        &self.message_type
    }

    async fn process(&self, _ctx: &Context, message: &Message) -> anyhow::Result<()> {
        self.seen
            .lock()
            .unwrap()
            .push((message.message_type().to_string(), message.position()));
        if self.fail {
            anyhow::bail!("handler for {} failed", self.message_type);
        }
        Ok(())
    }
}
