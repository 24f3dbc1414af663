//! Handlers for asserting on dispatch.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use messagestore_core::{Context, Message, MessageHandler};

/// A message as a handler saw it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Seen {
    pub message_type: String,
    pub stream_name: String,
    pub version: i64,
    pub position: i64,
}

/// Records every message it is given.
///
/// Can be told to fail its first `n` calls, which makes the retry path of
/// a subscriber observable.
pub struct RecordingHandler {
    message_type: String,
    failures_left: AtomicUsize,
    seen: Mutex<Vec<Seen>>,
}

impl RecordingHandler {
    pub fn new(message_type: impl Into<String>) -> Arc<Self> {
        Self::failing_times(message_type, 0)
    }

    pub fn failing_times(message_type: impl Into<String>, failures: usize) -> Arc<Self> {
        Arc::new(Self {
            message_type: message_type.into(),
            failures_left: AtomicUsize::new(failures),
            seen: Mutex::new(Vec::new()),
        })
    }

    /// Every call so far, including failed ones.
    pub fn seen(&self) -> Vec<Seen> {
        self.lock().clone()
    }

    pub fn count(&self) -> usize {
        self.lock().len()
    }

    pub fn positions(&self) -> Vec<i64> {
        self.lock().iter().map(|seen| seen.position).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<Seen>> {
        self.seen.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageHandler for RecordingHandler {
    fn message_type(&self) -> &str {
        &self.message_type
    }

    async fn process(&self, _ctx: &Context, message: &Message) -> anyhow::Result<()> {
        self.lock().push(Seen {
            message_type: message.message_type().to_string(),
            stream_name: message.stream_name().unwrap_or_default(),
            version: message.version(),
            position: message.position(),
        });

        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok();
        if failing {
            anyhow::bail!(
                "{} handler failed at position {}",
                self.message_type,
                message.position()
            );
        }
        Ok(())
    }
}
