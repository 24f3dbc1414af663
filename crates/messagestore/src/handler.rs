//! Message handler interface.

use async_trait::async_trait;

use crate::context::Context;
use crate::message::Message;

/// Consumer logic for one message type.
///
/// A subscriber calls every handler whose [`message_type`](MessageHandler::message_type)
/// equals the message's type, so several handlers may share a type.
///
/// Batches are retried from the last checkpoint after a failure, so
/// `process` may see the same message more than once and should be idempotent.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    fn message_type(&self) -> &str;

    async fn process(&self, ctx: &Context, message: &Message) -> anyhow::Result<()>;
}
