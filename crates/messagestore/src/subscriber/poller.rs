//! One subscription tick.

use async_trait::async_trait;

use crate::context::Context;
use crate::error::Result;

use super::worker::SubscriptionWorker;

/// Something the subscriber run-loop calls once per tick.
///
/// `poll` must do a bounded amount of work and return; the run-loop owns
/// sleeping and retrying.
#[async_trait]
pub trait Poller: Send {
    async fn poll(&mut self, ctx: &Context) -> Result<()>;

    /// Persist any progress not yet checkpointed. Called once when the
    /// run-loop stops.
    async fn flush(&mut self, _ctx: &Context) -> Result<()> {
        Ok(())
    }
}

/// Runs the four worker phases in order, stopping at the first error.
///
/// Keeps an in-memory cursor so that progress made since the last
/// checkpoint write is not re-read on the next tick.
pub struct SubscriptionPoller {
    worker: SubscriptionWorker,
    cursor: Option<i64>,
    since_checkpoint: usize,
}

impl SubscriptionPoller {
    pub fn new(worker: SubscriptionWorker) -> Self {
        Self {
            worker,
            cursor: None,
            since_checkpoint: 0,
        }
    }

    pub fn worker(&self) -> &SubscriptionWorker {
        &self.worker
    }

    async fn checkpoint(&mut self, ctx: &Context, last_position: i64) -> Result<()> {
        self.worker.set_position(ctx, last_position).await?;
        self.since_checkpoint = 0;
        Ok(())
    }
}

#[async_trait]
impl Poller for SubscriptionPoller {
    async fn poll(&mut self, ctx: &Context) -> Result<()> {
        let stored = self.worker.get_position(ctx).await?;
        let from = self.cursor.map_or(stored, |cursor| cursor.max(stored));

        let messages = self.worker.get_messages(ctx, from).await?;

        let outcome = self.worker.process_messages(ctx, &messages).await;
        if let Some(err) = outcome.error {
            return Err(err);
        }
        let Some(last_position) = outcome.last_position else {
            return Ok(());
        };

        self.cursor = Some(last_position + 1);
        self.since_checkpoint += outcome.processed;

        // A short batch means the subscriber has caught up.
        let caught_up = (messages.len() as i64) < self.worker.config().batch_size();
        let interval = self.worker.config().update_interval() as usize;
        if caught_up || self.since_checkpoint >= interval {
            self.checkpoint(ctx, last_position).await?;
        }

        Ok(())
    }

    async fn flush(&mut self, ctx: &Context) -> Result<()> {
        match self.cursor {
            Some(next) if self.since_checkpoint > 0 => self.checkpoint(ctx, next - 1).await,
            _ => Ok(()),
        }
    }
}
