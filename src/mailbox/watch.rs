//! Mailbox observation
//!
//! A [`MailboxWatch`] subscribes to a mailbox by forwarding into its own
//! small private queue and reports every message it sees to a writer, each
//! line prefixed with a label. The observer runs on a background thread
//! until the upstream mailbox closes or the watch is closed; closing the
//! watch never closes the upstream.

use super::queued::QueuedMailbox;
use super::traits::{Mailbox, MailboxError, Message, Result};
use super::wait::Wait;
use super::CancelToken;
use std::fmt::Display;
use std::io::Write;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, warn};

/// Capacity of the watch's private queue.
const WATCH_CAPACITY: usize = 10;

/// How often the observer re-checks for an upstream close while idle.
const IDLE_POLL_MS: u64 = 100;

/// A background observer reporting a mailbox's traffic to a writer.
pub struct MailboxWatch {
    label: String,
    cancel: CancelToken,
    handle: Option<JoinHandle<()>>,
}

impl MailboxWatch {
    /// Watch `upstream`, writing each observed message to `sink` as
    /// `{label}{message}`. Currently pending messages are replayed to the
    /// watch, so the backlog is reported too.
    pub fn new<M, B, W>(upstream: &Arc<B>, label: impl Into<String>, sink: W) -> Result<Self>
    where
        M: Message + Display,
        B: Mailbox<M> + ?Sized + 'static,
        W: Write + Send + 'static,
    {
        let label = label.into();
        let inbox = QueuedMailbox::<M>::new(WATCH_CAPACITY)?;
        let cancel = CancelToken::new();

        // Start the consumer before registering the forward: replaying a
        // backlog larger than the private capacity blocks until it drains.
        let handle = {
            let inbox = inbox.clone();
            let upstream = upstream.clone();
            let label = label.clone();
            let cancel = cancel.clone();
            thread::spawn(move || run(inbox, upstream, &label, sink, &cancel))
        };

        if let Err(err) = upstream.forward_to(inbox) {
            cancel.cancel();
            let _ = handle.join();
            return Err(err);
        }

        Ok(Self {
            label,
            cancel,
            handle: Some(handle),
        })
    }

    /// The label prefixed to each reported message.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Stop observing: cancel the observer loop and wait for it to finish.
    /// The upstream mailbox is left untouched.
    pub fn close(&mut self) {
        self.cancel.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MailboxWatch {
    fn drop(&mut self) {
        self.close();
    }
}

fn run<M, B, W>(
    inbox: Arc<QueuedMailbox<M>>,
    upstream: Arc<B>,
    label: &str,
    mut sink: W,
    cancel: &CancelToken,
) where
    M: Message + Display,
    B: Mailbox<M> + ?Sized,
    W: Write + Send,
{
    debug!(label, "mailbox watch started");
    loop {
        match inbox.receive_within(Wait::millis(IDLE_POLL_MS).cancelled_by(cancel)) {
            Ok(Some(msg)) => {
                let report = writeln!(sink, "{label}{msg}").and_then(|()| sink.flush());
                if let Err(err) = report {
                    warn!(label, error = %err, "mailbox watch sink failed");
                    break;
                }
            }
            Ok(None) => {
                // Idle: either our inbox closed, the upstream closed and the
                // backlog is drained, or the poll simply timed out.
                if inbox.is_closed() || upstream.is_closed() {
                    break;
                }
            }
            Err(MailboxError::Cancelled) => break,
            Err(err) => {
                warn!(label, error = %err, "mailbox watch receive failed");
                break;
            }
        }
    }
    debug!(label, "mailbox watch stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;

    /// A `Write` sink tests can inspect after the watch finishes.
    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<u8>>>);

    impl SharedSink {
        fn contents(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    impl Write for SharedSink {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn wait_until(deadline_ms: u64, mut done: impl FnMut() -> bool) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_millis(deadline_ms);
        while std::time::Instant::now() < deadline {
            if done() {
                return true;
            }
            thread::sleep(Duration::from_millis(10));
        }
        done()
    }

    #[test]
    fn test_watch_reports_messages_in_order() {
        let mailbox = QueuedMailbox::unbounded();
        let sink = SharedSink::default();
        let mut watch = MailboxWatch::new(&mailbox, "box: ", sink.clone()).unwrap();

        for n in 1..=3 {
            mailbox.deposit(n).unwrap();
        }

        assert!(wait_until(2_000, || {
            sink.contents() == "box: 1\nbox: 2\nbox: 3\n"
        }));
        watch.close();
    }

    #[test]
    fn test_watch_replays_backlog() {
        let mailbox = QueuedMailbox::unbounded();
        mailbox.deposit("early").unwrap();

        let sink = SharedSink::default();
        let mut watch = MailboxWatch::new(&mailbox, "", sink.clone()).unwrap();

        assert!(wait_until(2_000, || sink.contents() == "early\n"));
        // The watch consumed only its forwarded copies
        assert_eq!(mailbox.pending(), 1);
        watch.close();
    }

    #[test]
    fn test_watch_stops_when_upstream_closes() {
        let mailbox = QueuedMailbox::unbounded();
        let sink = SharedSink::default();
        let watch = MailboxWatch::new(&mailbox, "w", sink.clone()).unwrap();

        mailbox.deposit(7).unwrap();
        // The watch already holds its forwarded copy; the upstream's own
        // copy is discarded by the close
        mailbox.close().unwrap();

        assert!(wait_until(2_000, || sink.contents() == "w7\n"));
        // The loop notices the upstream close and exits on its own; the
        // drop only joins it
        drop(watch);
    }

    #[test]
    fn test_close_does_not_close_upstream() {
        let mailbox = QueuedMailbox::unbounded();
        let mut watch = MailboxWatch::new(&mailbox, "w", SharedSink::default()).unwrap();
        assert_eq!(watch.label(), "w");

        watch.close();
        assert!(!mailbox.is_closed());
        mailbox.deposit(1).unwrap();
    }
}
