//! Registry of invoices with a send in progress.
//!
//! The set lives inside one coordinating task; callers talk to it over a
//! channel. A granted [`SendLease`] releases its invoice when dropped, and the
//! next queued caller (if any) is handed the invoice directly.

use crate::{
    config::DuplicateSendPolicy,
    errors::{Error, Result},
};
use std::collections::{HashMap, VecDeque};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

type LeaseReply = oneshot::Sender<Result<SendLease>>;

enum Command {
    Acquire {
        invoice_id: i64,
        policy: DuplicateSendPolicy,
        reply: LeaseReply,
    },
    Release {
        invoice_id: i64,
    },
}

/// Handle to the coordinating task.
#[derive(Debug, Clone)]
pub struct InFlightRegistry {
    tx: mpsc::UnboundedSender<Command>,
}

impl InFlightRegistry {
    /// Starts the coordinating task. Must be called inside a Tokio runtime.
    #[must_use]
    pub fn spawn() -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Command>();
        let weak = tx.downgrade();

        tokio::spawn(async move {
            let mut in_flight: HashMap<i64, VecDeque<LeaseReply>> = HashMap::new();

            while let Some(command) = rx.recv().await {
                // Leases keep the channel open, so this only fails once every
                // registry handle is gone and no lease could be used anyway.
                let Some(tx) = weak.upgrade() else { break };

                match command {
                    Command::Acquire {
                        invoice_id,
                        policy,
                        reply,
                    } => match in_flight.get_mut(&invoice_id) {
                        None => {
                            in_flight.insert(invoice_id, VecDeque::new());
                            let _ = reply.send(Ok(SendLease { invoice_id, tx }));
                        }
                        Some(_) if policy == DuplicateSendPolicy::Reject => {
                            debug!(invoice_id, "Rejecting duplicate send");
                            let _ = reply.send(Err(Error::AlreadySending { invoice_id }));
                        }
                        Some(waiters) => {
                            let queued = waiters.len() + 1;
                            debug!(invoice_id, queued, "Queueing duplicate send");
                            waiters.push_back(reply);
                        }
                    },
                    Command::Release { invoice_id } => {
                        let next = in_flight
                            .get_mut(&invoice_id)
                            .and_then(VecDeque::pop_front);
                        match next {
                            // A waiter that already gave up drops the lease
                            // unread, which queues another release.
                            Some(waiter) => {
                                debug!(invoice_id, "Handing invoice to queued send");
                                let _ = waiter.send(Ok(SendLease { invoice_id, tx }));
                            }
                            None => {
                                in_flight.remove(&invoice_id);
                            }
                        }
                    }
                }
            }
        });

        Self { tx }
    }

    /// Claims `invoice_id` for one send.
    ///
    /// With [`DuplicateSendPolicy::Queue`] this waits for the current holder to
    /// finish; dropping the returned future gives up the place in the queue.
    ///
    /// # Errors
    /// Returns [`Error::AlreadySending`] when the invoice is taken and the policy
    /// is [`DuplicateSendPolicy::Reject`].
    pub async fn acquire(&self, invoice_id: i64, policy: DuplicateSendPolicy) -> Result<SendLease> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Command::Acquire {
                invoice_id,
                policy,
                reply,
            })
            .map_err(|_| registry_gone())?;
        response.await.map_err(|_| registry_gone())?
    }
}

fn registry_gone() -> Error {
    Error::Config {
        message: "send registry is not running".to_string(),
    }
}

/// Exclusive claim on one invoice; released on drop.
#[derive(Debug)]
pub struct SendLease {
    invoice_id: i64,
    tx: mpsc::UnboundedSender<Command>,
}

impl SendLease {
    #[must_use]
    pub const fn invoice_id(&self) -> i64 {
        self.invoice_id
    }
}

impl Drop for SendLease {
    fn drop(&mut self) {
        if self
            .tx
            .send(Command::Release {
                invoice_id: self.invoice_id,
            })
            .is_err()
        {
            warn!(invoice_id = self.invoice_id, "Send registry stopped before lease release");
        }
    }
}
