//! Mailbox contract
//!
//! Defines the trait implemented by every mailbox variant, the message
//! contract, and the mailbox error taxonomy.

use super::wait::Wait;
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;

/// Contract for mailbox payloads.
///
/// `Clone` is what forwarding fan-out duplicates; `Serialize` keeps payloads
/// wire-encodable for handles that sit behind a serialization boundary.
/// Implemented automatically for every qualifying type.
pub trait Message: Serialize + Clone + Send + 'static {}

impl<T: Serialize + Clone + Send + 'static> Message for T {}

/// Mailbox errors
#[derive(Debug, Error)]
pub enum MailboxError {
    /// Operation attempted on, or racing, a closed mailbox
    #[error("mailbox closed")]
    Closed,

    /// Rejected construction argument; capacity 0 belongs to `Rendezvous`
    #[error("invalid capacity: {0}")]
    InvalidCapacity(usize),

    /// `check_type` requested a type the mailbox does not carry
    #[error("mailbox carries messages of type {carried}, not {requested}")]
    TypeMismatch {
        /// Payload type the mailbox actually conveys
        carried: &'static str,
        /// Payload type the caller asked for
        requested: &'static str,
    },

    /// First transport-level error encountered while fanning a message out.
    /// The deposit that triggered it left no local trace.
    #[error("forwarding failed: {0}")]
    Forwarding(#[source] Box<MailboxError>),

    /// A blocking wait was interrupted by a [`CancelToken`](super::CancelToken)
    #[error("operation cancelled")]
    Cancelled,
}

impl MailboxError {
    /// Wrap a downstream failure observed during fan-out.
    pub(crate) fn forwarding(cause: MailboxError) -> Self {
        MailboxError::Forwarding(Box::new(cause))
    }
}

/// Result type for mailbox operations
pub type Result<T> = std::result::Result<T, MailboxError>;

/// A repository for messages, shared between producers and consumers.
///
/// Messages are received and forwarded in the order deposited. A mailbox has
/// a capacity: the maximum number of pending (deposited but unreceived)
/// messages. [`UNBOUNDED`](super::UNBOUNDED) means no set limit; a capacity
/// of 0 ([`Rendezvous`](super::Rendezvous)) synchronizes senders and
/// receivers directly.
pub trait Mailbox<M: Message>: Send + Sync {
    /// Deposit `msg`, waiting as long as necessary for the admission gate to
    /// open. Fails with [`MailboxError::Closed`] if the mailbox is closed at
    /// the time of the call or becomes closed while waiting.
    fn deposit(&self, msg: M) -> Result<()> {
        self.deposit_within(msg, Wait::forever()).map(|_| ())
    }

    /// Deposit `msg` if this can be done within `wait`. Returns whether the
    /// message was accepted in time; `Wait::no_wait` attempts once without
    /// blocking. Fails with [`MailboxError::Closed`] on a closed mailbox and
    /// [`MailboxError::Forwarding`] if fan-out to a forward target failed (in
    /// which case the message is not stored locally either).
    fn deposit_within(&self, msg: M, wait: Wait) -> Result<bool>;

    /// Receive the oldest pending message, waiting as long as necessary.
    /// Returns `None` once the mailbox is closed.
    fn receive(&self) -> Result<Option<M>> {
        self.receive_within(Wait::forever())
    }

    /// Receive the oldest pending message if one is available within `wait`.
    /// Returns `None` if the budget expires or the mailbox is closed;
    /// closed mailboxes drain silently, this is not an error.
    fn receive_within(&self, wait: Wait) -> Result<Option<M>>;

    /// Forward a copy of every future deposit to `target`, and immediately
    /// replay all currently pending messages to it in order, so a late
    /// subscriber still observes the backlog. Registering a mailbox with
    /// itself is ignored.
    fn forward_to(&self, target: Arc<dyn Mailbox<M>>) -> Result<()>;

    /// [`forward_to`](Mailbox::forward_to) for several targets at once.
    fn forward_to_all(&self, targets: Vec<Arc<dyn Mailbox<M>>>) -> Result<()> {
        for target in targets {
            self.forward_to(target)?;
        }
        Ok(())
    }

    /// Stop forwarding copies of messages. Already-forwarded messages are
    /// not rewound.
    fn stop_forwarding(&self);

    /// Wait for all pending messages to be received, or for `wait` to
    /// elapse, whichever comes first. While flushing, the mailbox acts as if
    /// full toward depositors. Returns whether everything drained in time
    /// (always true if the mailbox is already closed).
    fn flush(&self, wait: Wait) -> Result<bool>;

    /// Flush within `wait`, then close terminally: remaining messages are
    /// discarded and every blocked caller wakes to observe the closed
    /// condition. Close itself cannot fail; the only error is cancellation
    /// of the embedded flush wait.
    fn close_within(&self, wait: Wait) -> Result<()>;

    /// Close with a best-effort, non-blocking flush. Short for
    /// `close_within(Wait::no_wait())`.
    fn close(&self) -> Result<()> {
        self.close_within(Wait::no_wait())
    }

    /// True iff this mailbox is open and currently has forward targets.
    fn is_forwarding(&self) -> bool;

    /// True iff this mailbox has been closed.
    fn is_closed(&self) -> bool;

    /// The capacity fixed at construction.
    fn capacity(&self) -> usize;

    /// Number of currently pending (deposited but unreceived) messages.
    fn pending(&self) -> usize;

    /// The declared payload type tag, if one was set at construction.
    fn message_type(&self) -> Option<&'static str>;
}
