//! Postbox - Bounded Mailboxes for Inter-Thread Messaging
//!
//! Postbox provides capacity-bounded, thread-safe message repositories with
//! blocking deposit/receive, timeouts, multi-target forwarding (fan-out), and
//! a cooperative flush/close shutdown protocol. Producers block (or bounce)
//! when a mailbox is full; consumers drain it and release the backpressure.
//!
//! # Architecture
//!
//! - **mailbox**: The core primitives: `Mailbox` trait, `QueuedMailbox`
//!   (bounded FIFO), `Rendezvous` (zero-capacity hand-off), sink constructors
//!   (forward-only tap), `TypedHandle` (runtime type recovery), and
//!   `MailboxWatch` (observer thread)
//! - **error**: Crate-level error aggregation
//! - **logging**: Tracing subscriber setup
//!
//! # Example
//!
//! ```
//! use postbox::mailbox::{Mailbox, QueuedMailbox, Wait};
//! use std::thread;
//!
//! let mailbox = QueuedMailbox::new(4).unwrap();
//!
//! let producer = {
//!     let mailbox = mailbox.clone();
//!     thread::spawn(move || {
//!         for n in 0..8 {
//!             mailbox.deposit(n).unwrap();
//!         }
//!         mailbox.close_within(Wait::forever()).unwrap();
//!     })
//! };
//!
//! let mut received = Vec::new();
//! while let Some(n) = mailbox.receive().unwrap() {
//!     received.push(n);
//! }
//! producer.join().unwrap();
//! assert_eq!(received, (0..8).collect::<Vec<_>>());
//! ```

// Core modules
pub mod error;
pub mod logging;
pub mod mailbox;

// Re-exports
pub use error::{PostboxError, Result};
