//! Mailbox primitives
//!
//! Thread-safe message repositories with backpressure, forwarding fan-out,
//! and a cooperative flush/close shutdown protocol.
//!
//! # Overview
//!
//! A mailbox is shared (via `Arc`) between any number of producers and
//! consumers:
//! - **Deposit** blocks while the admission gate is closed (storage full or
//!   a flush in progress), or bounces after an explicit wait budget
//! - **Receive** drains messages in FIFO order and reopens the gate
//! - **Forwarding** replicates every deposit to registered downstream
//!   mailboxes, in deposit order, before the message becomes locally visible
//! - **Flush/close** drain pending messages, then close terminally; blocked
//!   callers wake and observe the closed condition
//!
//! # Variants
//!
//! - [`QueuedMailbox`] - bounded FIFO storage (or [`UNBOUNDED`])
//! - [`Rendezvous`] - zero-capacity synchronous hand-off
//! - [`QueuedMailbox::sink`] - forward-only tap that retains nothing
//!
//! # Observation
//!
//! - [`TypedHandle`] - recovers a typed mailbox from an erased reference
//! - [`MailboxWatch`] - background thread reporting forwarded messages to a
//!   writer

mod cancel;
mod queued;
mod rendezvous;
mod sink;
mod traits;
mod typed;
mod wait;
mod watch;

pub use cancel::CancelToken;
pub use queued::{QueuedMailbox, StorePolicy, UNBOUNDED};
pub use rendezvous::Rendezvous;
pub use traits::{Mailbox, MailboxError, Message, Result};
pub use typed::TypedHandle;
pub use wait::Wait;
pub use watch::MailboxWatch;
