//! Cancellation signal threaded through every suspension point of a send.
//!
//! Cloning a [`Cancellation`] shares the same signal. Once cancelled it stays
//! cancelled; futures guarded by [`Cancellation::guard`] are dropped at that
//! point, which closes whatever browser session or SMTP socket they own.

use crate::errors::{Error, Result};
use std::future::Future;
use std::sync::Arc;
use tokio::sync::watch;

#[derive(Debug, Clone)]
pub struct Cancellation {
    sender: Arc<watch::Sender<bool>>,
    receiver: watch::Receiver<bool>,
}

impl Default for Cancellation {
    fn default() -> Self {
        Self::new()
    }
}

impl Cancellation {
    #[must_use]
    pub fn new() -> Self {
        let (sender, receiver) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
            receiver,
        }
    }

    /// Signals cancellation to every clone. Idempotent.
    pub fn cancel(&self) {
        self.sender.send_replace(true);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.receiver.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    pub async fn cancelled(&self) {
        let mut receiver = self.receiver.clone();
        // The sender lives as long as `self`, so this only returns once the flag is set.
        let _ = receiver.wait_for(|cancelled| *cancelled).await;
    }

    /// Runs `future` unless cancellation wins the race, in which case the future
    /// is dropped and [`Error::Cancelled`] is returned.
    pub async fn guard<F: Future>(&self, future: F) -> Result<F::Output> {
        tokio::select! {
            biased;
            () = self.cancelled() => Err(Error::Cancelled),
            output = future => Ok(output),
        }
    }
}
