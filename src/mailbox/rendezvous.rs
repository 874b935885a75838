//! Zero-capacity hand-off mailbox
//!
//! A rendezvous has no storage: a single ticketed slot carries the message
//! in flight, and a deposit completes only once a receive (or
//! [`await_close`](Rendezvous::await_close)) has consumed it. With nobody
//! receiving, a zero-budget deposit reports not-accepted instead of
//! blocking. The admission gate of the queued protocol degenerates to
//! "slot occupied", plus the flush counter.

use super::cancel::WakeFn;
use super::queued::{forward_copies, is_self_target};
use super::traits::{Mailbox, MailboxError, Message, Result};
use super::wait::{TimeBudget, Wait};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::debug;

struct State<M: Message> {
    /// The in-flight message, tagged with its deposit ticket
    slot: Option<(u64, M)>,
    /// Ticket for the next deposit; tickets start at 1
    next_ticket: u64,
    /// Highest ticket consumed so far (0 = none yet)
    delivered: u64,
    open: bool,
    /// Flush gate; slot occupancy itself already blocks deposits
    deposit_blocks: usize,
    targets: Vec<Arc<dyn Mailbox<M>>>,
}

struct Shared<M: Message> {
    state: Mutex<State<M>>,
    cond: Condvar,
}

/// A mailbox with a capacity of 0: synchronous hand-off between one
/// producer and one consumer at a time.
pub struct Rendezvous<M: Message> {
    message_type: Option<&'static str>,
    shared: Arc<Shared<M>>,
    wake: Arc<WakeFn>,
}

impl<M: Message> Rendezvous<M> {
    /// A new rendezvous for messages of unchecked type.
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// A new rendezvous carrying the payload type tag.
    pub fn with_message_type() -> Arc<Self> {
        Self::build(Some(std::any::type_name::<M>()))
    }

    fn build(message_type: Option<&'static str>) -> Arc<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                slot: None,
                next_ticket: 1,
                delivered: 0,
                open: true,
                deposit_blocks: 0,
                targets: Vec::new(),
            }),
            cond: Condvar::new(),
        });
        let wake: Arc<WakeFn> = {
            let shared = Arc::downgrade(&shared);
            Arc::new(move || {
                if let Some(shared) = shared.upgrade() {
                    let _guard = lock_state(&shared.state);
                    shared.cond.notify_all();
                }
            })
        };
        Arc::new(Self {
            message_type,
            shared,
            wake,
        })
    }

    fn lock(&self) -> MutexGuard<'_, State<M>> {
        lock_state(&self.shared.state)
    }

    /// Wait for this rendezvous to be closed, receiving and throwing away
    /// every message that arrives in the interim.
    pub fn await_close(&self) -> Result<()> {
        self.await_close_within(Wait::forever()).map(|_| ())
    }

    /// [`await_close`](Rendezvous::await_close) bounded by `wait`; returns
    /// whether the box closed within the budget.
    pub fn await_close_within(&self, wait: Wait) -> Result<bool> {
        let budget = wait.begin();
        let _cancel = budget.subscribe(&self.wake);
        let mut state = self.lock();
        while state.open && !budget.exhausted() && !budget.cancelled() {
            if let Some((ticket, _discarded)) = state.slot.take() {
                state.delivered = ticket;
                self.shared.cond.notify_all();
            }
            state = budget.block(&self.shared.cond, state);
        }
        if budget.cancelled() {
            return Err(MailboxError::Cancelled);
        }
        Ok(!state.open)
    }

    /// Drop our ticket from the slot after a timed-out or cancelled
    /// hand-off wait.
    fn retract(&self, state: &mut State<M>, ticket: u64) {
        if matches!(state.slot, Some((t, _)) if t == ticket) {
            state.slot = None;
            self.shared.cond.notify_all();
        }
    }

    /// Flush-style drain: hold the gate and wait for the slot to empty.
    fn drain_within<'g>(
        &self,
        mut state: MutexGuard<'g, State<M>>,
        budget: &TimeBudget,
    ) -> (MutexGuard<'g, State<M>>, Result<bool>) {
        if !state.open {
            return (state, Ok(true));
        }
        state.deposit_blocks += 1;
        while state.open && state.slot.is_some() && !budget.exhausted() && !budget.cancelled() {
            state = budget.block(&self.shared.cond, state);
        }
        state.deposit_blocks -= 1;
        self.shared.cond.notify_all();
        if budget.cancelled() {
            return (state, Err(MailboxError::Cancelled));
        }
        let drained = !state.open || state.slot.is_none();
        (state, Ok(drained))
    }
}

impl<M: Message> Mailbox<M> for Rendezvous<M> {
    fn deposit_within(&self, msg: M, wait: Wait) -> Result<bool> {
        let budget = wait.begin();
        let _cancel = budget.subscribe(&self.wake);
        let mut state = self.lock();

        // Admission: wait for an empty slot and a clear flush gate
        while state.open
            && (state.slot.is_some() || state.deposit_blocks > 0)
            && !budget.exhausted()
            && !budget.cancelled()
        {
            state = budget.block(&self.shared.cond, state);
        }
        if budget.cancelled() {
            return Err(MailboxError::Cancelled);
        }
        if !state.open {
            return Err(MailboxError::Closed);
        }
        if state.slot.is_some() || state.deposit_blocks > 0 {
            return Ok(false);
        }

        self.fan_out(&state, &msg, &wait)?;
        let ticket = state.next_ticket;
        state.next_ticket += 1;
        state.slot = Some((ticket, msg));
        self.shared.cond.notify_all();

        // Hand-off: the deposit only completes once a receiver has taken
        // the message. On timeout the message is retracted, so it was never
        // observable as accepted.
        loop {
            if state.delivered >= ticket {
                return Ok(true);
            }
            if !state.open {
                return Err(MailboxError::Closed);
            }
            if budget.cancelled() {
                self.retract(&mut state, ticket);
                return Err(MailboxError::Cancelled);
            }
            if budget.exhausted() {
                self.retract(&mut state, ticket);
                return Ok(false);
            }
            state = budget.block(&self.shared.cond, state);
        }
    }

    fn receive_within(&self, wait: Wait) -> Result<Option<M>> {
        let budget = wait.begin();
        let _cancel = budget.subscribe(&self.wake);
        let mut state = self.lock();
        while state.open && state.slot.is_none() && !budget.exhausted() && !budget.cancelled() {
            state = budget.block(&self.shared.cond, state);
        }
        if budget.cancelled() {
            return Err(MailboxError::Cancelled);
        }
        match state.slot.take() {
            Some((ticket, msg)) => {
                state.delivered = ticket;
                self.shared.cond.notify_all();
                Ok(Some(msg))
            }
            None => Ok(None),
        }
    }

    fn forward_to(&self, target: Arc<dyn Mailbox<M>>) -> Result<()> {
        self.forward_to_all(vec![target])
    }

    fn forward_to_all(&self, targets: Vec<Arc<dyn Mailbox<M>>>) -> Result<()> {
        let mut state = self.lock();
        let added: Vec<Arc<dyn Mailbox<M>>> = targets
            .into_iter()
            .filter(|target| !is_self_target(target, self))
            .collect();
        if added.is_empty() {
            return Ok(());
        }
        state.targets.extend(added.iter().cloned());
        // The backlog of a rendezvous is at most the in-flight message
        if let Some((_ticket, msg)) = &state.slot {
            let msg = msg.clone();
            forward_copies(&added, &msg, &Wait::forever())?;
        }
        Ok(())
    }

    fn stop_forwarding(&self) {
        self.lock().targets.clear();
    }

    fn flush(&self, wait: Wait) -> Result<bool> {
        let budget = wait.begin();
        let _cancel = budget.subscribe(&self.wake);
        let state = self.lock();
        let (_state, drained) = self.drain_within(state, &budget);
        drained
    }

    fn close_within(&self, wait: Wait) -> Result<()> {
        let budget = wait.begin();
        let _cancel = budget.subscribe(&self.wake);
        let state = self.lock();
        let (mut state, drained) = self.drain_within(state, &budget);
        let fully = drained?;
        if state.open {
            debug!(fully_drained = fully, "closing rendezvous");
        }
        state.open = false;
        state.slot = None;
        self.shared.cond.notify_all();
        Ok(())
    }

    fn is_forwarding(&self) -> bool {
        let state = self.lock();
        state.open && !state.targets.is_empty()
    }

    fn is_closed(&self) -> bool {
        !self.lock().open
    }

    fn capacity(&self) -> usize {
        0
    }

    fn pending(&self) -> usize {
        usize::from(self.lock().slot.is_some())
    }

    fn message_type(&self) -> Option<&'static str> {
        self.message_type
    }
}

impl<M: Message> Rendezvous<M> {
    fn fan_out(&self, state: &State<M>, msg: &M, wait: &Wait) -> Result<()> {
        if state.targets.is_empty() {
            return Ok(());
        }
        let targets = state.targets.clone();
        forward_copies(&targets, msg, wait)
    }
}

fn lock_state<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mailbox::QueuedMailbox;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_zero_budget_deposit_without_receiver_bounces() {
        let rendezvous = Rendezvous::new();
        assert!(!rendezvous.deposit_within(1, Wait::no_wait()).unwrap());
        assert_eq!(rendezvous.pending(), 0);
    }

    #[test]
    fn test_deposit_completes_only_after_receive() {
        let rendezvous = Rendezvous::new();

        let receiver = {
            let rendezvous = rendezvous.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                rendezvous.receive().unwrap()
            })
        };

        let started = std::time::Instant::now();
        rendezvous.deposit("handoff").unwrap();
        // The deposit could not have returned before the receiver ran
        assert!(started.elapsed() >= Duration::from_millis(80));

        assert_eq!(receiver.join().unwrap(), Some("handoff"));
        assert_eq!(rendezvous.pending(), 0);
    }

    #[test]
    fn test_timed_deposit_retracts_unconsumed_message() {
        let rendezvous = Rendezvous::new();
        assert!(!rendezvous.deposit_within("nobody", Wait::millis(50)).unwrap());
        // The retracted message is not observable afterwards
        assert_eq!(rendezvous.receive_within(Wait::no_wait()).unwrap(), None);
    }

    #[test]
    fn test_receive_without_deposit_times_out() {
        let rendezvous = Rendezvous::<u8>::new();
        assert_eq!(rendezvous.receive_within(Wait::millis(50)).unwrap(), None);
    }

    #[test]
    fn test_capacity_is_zero() {
        let rendezvous = Rendezvous::<u8>::new();
        assert_eq!(rendezvous.capacity(), 0);
    }

    #[test]
    fn test_deposit_on_closed_fails() {
        let rendezvous = Rendezvous::new();
        rendezvous.close().unwrap();
        assert!(matches!(
            rendezvous.deposit_within(1, Wait::no_wait()),
            Err(MailboxError::Closed)
        ));
    }

    #[test]
    fn test_receive_on_closed_returns_none() {
        let rendezvous = Rendezvous::<u8>::new();
        rendezvous.close().unwrap();
        assert_eq!(rendezvous.receive().unwrap(), None);
    }

    #[test]
    fn test_close_fails_the_waiting_depositor() {
        let rendezvous = Rendezvous::new();

        let depositor = {
            let rendezvous = rendezvous.clone();
            thread::spawn(move || rendezvous.deposit("discarded"))
        };

        thread::sleep(Duration::from_millis(50));
        rendezvous.close().unwrap();

        assert!(matches!(
            depositor.join().unwrap(),
            Err(MailboxError::Closed)
        ));
    }

    #[test]
    fn test_forwarding_happens_before_handoff() {
        let rendezvous = Rendezvous::new();
        let tap = QueuedMailbox::unbounded();
        rendezvous.forward_to(tap.clone()).unwrap();

        let receiver = {
            let rendezvous = rendezvous.clone();
            thread::spawn(move || rendezvous.receive().unwrap())
        };

        rendezvous.deposit(42).unwrap();
        assert_eq!(receiver.join().unwrap(), Some(42));
        assert_eq!(tap.receive_within(Wait::no_wait()).unwrap(), Some(42));
    }

    #[test]
    fn test_await_close_discards_interim_messages() {
        let rendezvous = Rendezvous::new();

        let closer = {
            let rendezvous = rendezvous.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                rendezvous.close().unwrap();
            })
        };
        let depositor = {
            let rendezvous = rendezvous.clone();
            thread::spawn(move || rendezvous.deposit("thrown away"))
        };

        rendezvous.await_close().unwrap();
        assert!(rendezvous.is_closed());

        // The interim deposit was either consumed-and-discarded or beaten
        // by the close; it never hangs
        assert!(matches!(
            depositor.join().unwrap(),
            Ok(()) | Err(MailboxError::Closed)
        ));
        closer.join().unwrap();
    }

    #[test]
    fn test_await_close_within_times_out_while_open() {
        let rendezvous = Rendezvous::<u8>::new();
        assert!(!rendezvous.await_close_within(Wait::millis(50)).unwrap());
    }
}
