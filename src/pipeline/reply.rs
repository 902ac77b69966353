//! One-shot reply slot shared by the pipeline task and its watchdog.

use super::SendResponse;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::oneshot;

/// Lets exactly one of several racing paths deliver the reply.
///
/// Every clone shares the same slot. The first [`send`](Self::send) takes the
/// sender out and delivers; later calls find the slot empty and return `false`.
#[derive(Debug, Clone)]
pub struct ReplyGuard {
    slot: Arc<Mutex<Option<oneshot::Sender<SendResponse>>>>,
}

impl ReplyGuard {
    /// Returns the guard and the receiving end the caller awaits.
    #[must_use]
    pub fn new() -> (Self, oneshot::Receiver<SendResponse>) {
        let (sender, receiver) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(sender))),
            },
            receiver,
        )
    }

    /// Delivers `response` if no reply has been delivered yet.
    ///
    /// Returns whether this call won. A caller that stopped listening still
    /// counts as replied to.
    pub fn send(&self, response: SendResponse) -> bool {
        let sender = self
            .slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match sender {
            Some(sender) => {
                let _ = sender.send(response);
                true
            }
            None => false,
        }
    }

    #[must_use]
    pub fn is_spent(&self) -> bool {
        self.slot
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_none()
    }
}
