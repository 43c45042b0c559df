//! In-memory message ledger shared by the feed listener and the consumer.
//!
//! Holds the pending FIFO, the set of deleted ids and the leases of messages
//! currently being processed. Every operation takes the single state lock
//! for a few instructions only; nothing awaits while holding it.

use parking_lot::Mutex;
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use super::message::ChatMessage;

#[derive(Default)]
struct LedgerState {
    pending: VecDeque<ChatMessage>,
    deleted: HashSet<String>,
    in_flight: Vec<InFlight>,
    next_lease: u64,
}

struct InFlight {
    lease_no: u64,
    id: String,
    token: CancellationToken,
}

#[derive(Default)]
pub struct MessageLedger {
    state: Mutex<LedgerState>,
    notify: Notify,
}

impl MessageLedger {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Append a message and wake the consumer.
    pub fn enqueue(&self, message: ChatMessage) {
        tracing::debug!(
            message_id = %message.id,
            author = %message.author.name,
            "Message queued"
        );
        self.state.lock().pending.push_back(message);
        self.notify.notify_one();
    }

    /// Record a deletion.
    ///
    /// Pending copies are skipped at dequeue. A message already being
    /// processed has its lease cancelled; returns `true` in that case.
    pub fn mark_deleted(&self, id: &str) -> bool {
        let mut state = self.state.lock();
        state.deleted.insert(id.to_string());

        let mut cancelled = false;
        for flight in state.in_flight.iter().filter(|f| f.id == id) {
            flight.token.cancel();
            cancelled = true;
        }
        if cancelled {
            tracing::info!(message_id = %id, "In-flight message deleted, cancelling");
        }
        cancelled
    }

    /// Drop every pending message and cancel everything in flight.
    ///
    /// Returns how many pending messages were discarded.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let discarded = state.pending.len();
        state.pending.clear();
        state.deleted.clear();
        for flight in state.in_flight.drain(..) {
            flight.token.cancel();
        }
        discarded
    }

    /// Wait for the oldest live message and lease it.
    ///
    /// Messages deleted while pending are discarded on the way.
    pub async fn dequeue(self: &Arc<Self>) -> MessageLease {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register before checking so an enqueue in between still wakes us.
            notified.as_mut().enable();

            if let Some(lease) = self.try_dequeue() {
                return lease;
            }
            notified.await;
        }
    }

    /// Non-waiting variant of [`Self::dequeue`].
    pub fn try_dequeue(self: &Arc<Self>) -> Option<MessageLease> {
        let mut state = self.state.lock();

        while let Some(message) = state.pending.pop_front() {
            if message.deleted || state.deleted.contains(&message.id) {
                tracing::debug!(message_id = %message.id, "Skipping deleted message");
                continue;
            }

            state.next_lease += 1;
            let lease_no = state.next_lease;
            let token = CancellationToken::new();
            state.in_flight.push(InFlight {
                lease_no,
                id: message.id.clone(),
                token: token.clone(),
            });

            return Some(MessageLease {
                message,
                token,
                lease_no,
                ledger: Arc::clone(self),
            });
        }
        None
    }

    /// Backlog depth: pending messages that will actually be read.
    pub fn len(&self) -> usize {
        let state = self.state.lock();
        state
            .pending
            .iter()
            .filter(|m| !m.deleted && !state.deleted.contains(&m.id))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Id of the most recently leased message that is still live.
    pub fn current(&self) -> Option<String> {
        self.state
            .lock()
            .in_flight
            .iter()
            .rev()
            .find(|f| !f.token.is_cancelled())
            .map(|f| f.id.clone())
    }

    pub fn is_deleted(&self, id: &str) -> bool {
        self.state.lock().deleted.contains(id)
    }

    fn release(&self, lease_no: u64) {
        self.state.lock().in_flight.retain(|f| f.lease_no != lease_no);
    }
}

/// A dequeued message and its cancellation token.
///
/// The message stays registered as in flight (and so cancellable through
/// [`MessageLedger::mark_deleted`] and [`MessageLedger::clear`]) until the
/// lease is dropped.
pub struct MessageLease {
    message: ChatMessage,
    token: CancellationToken,
    lease_no: u64,
    ledger: Arc<MessageLedger>,
}

impl MessageLease {
    pub fn message(&self) -> &ChatMessage {
        &self.message
    }

    pub fn id(&self) -> &str {
        &self.message.id
    }

    pub fn token(&self) -> &CancellationToken {
        &self.token
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves once the message is deleted or the ledger cleared.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

impl fmt::Debug for MessageLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MessageLease")
            .field("id", &self.message.id)
            .field("lease_no", &self.lease_no)
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

impl Drop for MessageLease {
    fn drop(&mut self) {
        self.ledger.release(self.lease_no);
    }
}
