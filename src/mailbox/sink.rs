//! Non-retaining tap mailbox
//!
//! A sink box accepts and forwards messages but never retains them: the
//! queued core runs with [`StorePolicy::Discard`], so storage is always
//! observed empty, storage pressure never closes the admission gate, and
//! receiving blocks until the box is closed. Used to attach a forwarding
//! tap to a stream without creating a secondary backlog or a consumer
//! obligation.

use super::queued::{QueuedMailbox, StorePolicy};
use super::traits::Message;
use std::sync::Arc;

impl<M: Message> QueuedMailbox<M> {
    /// A new sink box: forwards every deposit, stores nothing.
    pub fn sink() -> Arc<Self> {
        Self::build(1, StorePolicy::Discard, None)
    }

    /// A new sink box carrying the payload type tag.
    pub fn sink_with_message_type() -> Arc<Self> {
        Self::build(1, StorePolicy::Discard, Some(std::any::type_name::<M>()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::{Mailbox, Wait};
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_sink_retains_nothing() {
        let sink = QueuedMailbox::sink();

        for n in 0..16 {
            // Never blocks on storage pressure
            assert!(sink.deposit_within(n, Wait::no_wait()).unwrap());
            assert_eq!(sink.pending(), 0);
        }
    }

    #[test]
    fn test_sink_still_forwards_everything_in_order() {
        let sink = QueuedMailbox::sink();
        let downstream = QueuedMailbox::unbounded();

        sink.forward_to(downstream.clone()).unwrap();
        for n in 0..8 {
            sink.deposit(n).unwrap();
        }

        assert_eq!(sink.pending(), 0);
        for expected in 0..8 {
            assert_eq!(
                downstream.receive_within(Wait::no_wait()).unwrap(),
                Some(expected)
            );
        }
    }

    #[test]
    fn test_sink_receive_blocks_until_closed() {
        let sink = QueuedMailbox::<u8>::sink();
        sink.deposit(1).unwrap();

        // Nothing is ever stored, so a bounded receive times out empty
        assert_eq!(sink.receive_within(Wait::millis(50)).unwrap(), None);

        let receiver = {
            let sink = sink.clone();
            thread::spawn(move || sink.receive())
        };
        thread::sleep(Duration::from_millis(50));
        sink.close().unwrap();

        assert_eq!(receiver.join().unwrap().unwrap(), None);
    }

    #[test]
    fn test_sink_message_type_tag() {
        let sink = QueuedMailbox::<String>::sink_with_message_type();
        assert!(sink.message_type().is_some());
    }
}
