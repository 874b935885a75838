//! Bounded FIFO mailbox
//!
//! The general mailbox implementation: a capacity-bounded queue guarded by
//! one mutex and one condvar per instance. An admission-gate counter
//! (`deposit_blocks`) provides backpressure: it is raised while storage is
//! full or a flush is in progress, and every depositor waits while it is
//! non-zero.
//!
//! Forwarding fan-out happens synchronously inside the depositing call,
//! before the message becomes locally visible: the current targets are
//! snapshotted under the state lock and every one is attempted even if an
//! earlier one fails. Only the first transport-level failure is surfaced,
//! and surfacing it aborts the deposit with no local storage side effect:
//! all-or-nothing local storage, best-effort remote fan-out. The flush/close
//! drain guarantee relies on this asymmetry.
//!
//! Fan-out runs while the local lock is held and takes each target's own
//! lock in turn; forwarding cycles between mailboxes therefore deadlock and
//! must be avoided by the caller.

use super::cancel::WakeFn;
use super::traits::{Mailbox, MailboxError, Message, Result};
use super::wait::{TimeBudget, Wait};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

/// Capacity sentinel: no storage limit.
pub const UNBOUNDED: usize = usize::MAX;

/// What the queued core does with a message after fan-out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorePolicy {
    /// Keep the message until a consumer receives it
    #[default]
    Retain,

    /// Drop the message once forwarded (non-retaining tap)
    Discard,
}

/// Mutable mailbox state, all guarded by one lock.
struct State<M: Message> {
    /// Pending messages, oldest first
    queue: VecDeque<M>,
    /// Monotone true -> false; the queue is discarded at the transition
    open: bool,
    /// Admission gate: number of reasons deposits must currently wait
    deposit_blocks: usize,
    /// Forward targets, in registration order; never contains this mailbox
    targets: Vec<Arc<dyn Mailbox<M>>>,
}

struct Shared<M: Message> {
    state: Mutex<State<M>>,
    cond: Condvar,
}

/// A mailbox with a fixed positive capacity.
///
/// Shared by cloning the `Arc` the constructors return; every operation
/// takes `&self`.
pub struct QueuedMailbox<M: Message> {
    capacity: usize,
    policy: StorePolicy,
    message_type: Option<&'static str>,
    shared: Arc<Shared<M>>,
    /// Wake-up hook handed to cancel tokens; locks the state before
    /// notifying so cancellation cannot race a waiter into a missed wakeup.
    wake: Arc<WakeFn>,
}

impl<M: Message> QueuedMailbox<M> {
    /// A new mailbox holding at most `capacity` pending messages.
    ///
    /// # Errors
    /// Returns [`MailboxError::InvalidCapacity`] for capacity 0; the
    /// zero-capacity protocol is [`Rendezvous`](super::Rendezvous).
    pub fn new(capacity: usize) -> Result<Arc<Self>> {
        Self::with_policy(capacity, StorePolicy::Retain)
    }

    /// A new mailbox with no storage limit.
    pub fn unbounded() -> Arc<Self> {
        Self::build(UNBOUNDED, StorePolicy::Retain, None)
    }

    /// A new mailbox carrying the payload type tag, for recovery through a
    /// [`TypedHandle`](super::TypedHandle).
    pub fn with_message_type(capacity: usize) -> Result<Arc<Self>> {
        if capacity == 0 {
            return Err(MailboxError::InvalidCapacity(capacity));
        }
        Ok(Self::build(
            capacity,
            StorePolicy::Retain,
            Some(std::any::type_name::<M>()),
        ))
    }

    /// A new mailbox with an explicit store policy.
    pub fn with_policy(capacity: usize, policy: StorePolicy) -> Result<Arc<Self>> {
        if capacity == 0 {
            return Err(MailboxError::InvalidCapacity(capacity));
        }
        Ok(Self::build(capacity, policy, None))
    }

    pub(super) fn build(
        capacity: usize,
        policy: StorePolicy,
        message_type: Option<&'static str>,
    ) -> Arc<Self> {
        let shared = Arc::new(Shared {
            state: Mutex::new(State {
                queue: VecDeque::new(),
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
            capacity,
            policy,
            message_type,
            shared,
            wake,
        })
    }

    fn lock(&self) -> MutexGuard<'_, State<M>> {
        lock_state(&self.shared.state)
    }

    /// Fan `msg` out to a snapshot of the current targets, taken under the
    /// caller's lock so fan-out order stays consistent with deposit order.
    fn fan_out(&self, state: &State<M>, msg: &M, wait: &Wait) -> Result<()> {
        if state.targets.is_empty() {
            return Ok(());
        }
        let targets = state.targets.clone();
        forward_copies(&targets, msg, wait)
    }

    /// Hold the admission gate closed and wait for the queue to drain.
    /// The gate is restored before returning, even on cancellation.
    fn drain_within<'g>(
        &self,
        mut state: MutexGuard<'g, State<M>>,
        budget: &TimeBudget,
    ) -> (MutexGuard<'g, State<M>>, Result<bool>) {
        if !state.open {
            return (state, Ok(true));
        }
        state.deposit_blocks += 1;
        while state.open
            && !state.queue.is_empty()
            && !budget.exhausted()
            && !budget.cancelled()
        {
            state = budget.block(&self.shared.cond, state);
        }
        state.deposit_blocks -= 1;
        self.shared.cond.notify_all();
        if budget.cancelled() {
            return (state, Err(MailboxError::Cancelled));
        }
        let drained = !state.open || state.queue.is_empty();
        (state, Ok(drained))
    }
}

impl<M: Message> Mailbox<M> for QueuedMailbox<M> {
    fn deposit_within(&self, msg: M, wait: Wait) -> Result<bool> {
        let budget = wait.begin();
        let _cancel = budget.subscribe(&self.wake);
        let mut state = self.lock();
        while state.open
            && state.deposit_blocks > 0
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
        if state.deposit_blocks > 0 {
            return Ok(false);
        }
        self.fan_out(&state, &msg, &wait)?;
        if self.policy == StorePolicy::Retain {
            state.queue.push_back(msg);
        }
        if state.queue.len() >= self.capacity {
            state.deposit_blocks += 1;
        }
        self.shared.cond.notify_all();
        Ok(true)
    }

    fn receive_within(&self, wait: Wait) -> Result<Option<M>> {
        let budget = wait.begin();
        let _cancel = budget.subscribe(&self.wake);
        let mut state = self.lock();
        while state.open
            && state.queue.is_empty()
            && !budget.exhausted()
            && !budget.cancelled()
        {
            state = budget.block(&self.shared.cond, state);
        }
        if budget.cancelled() {
            return Err(MailboxError::Cancelled);
        }
        if !state.open || state.queue.is_empty() {
            return Ok(None);
        }
        if state.queue.len() == self.capacity {
            state.deposit_blocks -= 1;
        }
        let msg = state.queue.pop_front();
        self.shared.cond.notify_all();
        Ok(msg)
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
        // Replay the backlog to the newly added targets only, so a late
        // subscriber observes the same order as everyone else.
        let backlog: Vec<M> = state.queue.iter().cloned().collect();
        for msg in &backlog {
            forward_copies(&added, msg, &Wait::forever())?;
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
            debug!(discarded = state.queue.len(), fully_drained = fully, "closing mailbox");
        }
        state.open = false;
        state.queue.clear();
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
        self.capacity
    }

    fn pending(&self) -> usize {
        self.lock().queue.len()
    }

    fn message_type(&self) -> Option<&'static str> {
        self.message_type
    }
}

fn lock_state<T>(state: &Mutex<T>) -> MutexGuard<'_, T> {
    match state.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Deliver a copy of `msg` to every target in order. Every target is
/// attempted even after a failure; only the first failure is surfaced. A
/// target that merely reports "not accepted" within the budget loses its
/// copy silently; only transport-level errors count.
pub(super) fn forward_copies<M: Message>(
    targets: &[Arc<dyn Mailbox<M>>],
    msg: &M,
    wait: &Wait,
) -> Result<()> {
    let mut first_failure: Option<MailboxError> = None;
    for target in targets {
        match target.deposit_within(msg.clone(), wait.clone()) {
            Ok(_accepted) => {}
            Err(MailboxError::Cancelled) => return Err(MailboxError::Cancelled),
            Err(err) => {
                warn!(error = %err, "forward target rejected message");
                first_failure.get_or_insert(err);
            }
        }
    }
    match first_failure {
        Some(cause) => Err(MailboxError::forwarding(cause)),
        None => Ok(()),
    }
}

/// True iff `target` is the same mailbox instance as `me` (self-forwarding
/// is ignored rather than registered).
pub(super) fn is_self_target<M: Message, T>(target: &Arc<dyn Mailbox<M>>, me: &T) -> bool {
    std::ptr::eq(
        Arc::as_ptr(target) as *const u8,
        (me as *const T).cast::<u8>(),
    )
}
