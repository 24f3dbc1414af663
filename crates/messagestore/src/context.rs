//! Cancellation context passed to every store, repository and handler call.
//!
//! A [`Context`] is a cheap, cloneable view of a single cancellation signal.
//! The matching [`CancelHandle`] flips the signal; every clone of the context
//! observes it.
//!
//! ```ignore
//! let (ctx, cancel) = Context::with_cancel();
//!
//! let task = tokio::spawn({
//!     let ctx = ctx.clone();
//!     async move { subscriber.start(&ctx).await }
//! });
//!
//! cancel.cancel();
//! assert!(matches!(task.await?, Err(Error::Cancelled)));
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::error::Error;

/// Cancellation signal shared between a caller and the work it started.
#[derive(Debug, Clone)]
pub struct Context {
    cancelled: watch::Receiver<bool>,
    // Keeps the channel open for contexts that have no handle.
    _root: Option<Arc<watch::Sender<bool>>>,
}

/// Cancels the [`Context`] it was created with.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl Context {
    /// A context that is never cancelled.
    pub fn background() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            cancelled: rx,
            _root: Some(Arc::new(tx)),
        }
    }

    /// A context together with the handle that cancels it.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let ctx = Self {
            cancelled: rx,
            _root: None,
        };
        (ctx, CancelHandle { tx: Arc::new(tx) })
    }

    /// A context that cancels itself after `timeout`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_timeout(timeout: Duration) -> (Self, CancelHandle) {
        let (ctx, handle) = Self::with_cancel();
        let timer = handle.clone();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            timer.cancel();
        });
        (ctx, handle)
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// `Some(Error::Cancelled)` once the context has been cancelled.
    pub fn err(&self) -> Option<Error> {
        self.is_cancelled().then_some(Error::Cancelled)
    }

    /// Resolves once the context is cancelled.
    ///
    /// If every handle is dropped without cancelling, this never resolves.
    pub async fn cancelled(&self) {
        let mut rx = self.cancelled.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

impl CancelHandle {
    /// Cancel the context. Calling this more than once is a no-op.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}
