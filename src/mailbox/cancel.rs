//! Cancellation of blocking mailbox waits
//!
//! A [`CancelToken`] is a cloneable signal shared between the thread that
//! waits and the thread that cancels. Cancelling wakes every wait that was
//! started with the token (via [`Wait::cancelled_by`](super::Wait::cancelled_by));
//! the interrupted operation aborts with
//! [`MailboxError::Cancelled`](super::MailboxError::Cancelled) and leaves
//! mailbox state untouched.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// A wake-up hook registered by a mailbox with a wait in progress. The hook
/// must acquire the mailbox's state lock before notifying its condvar, so a
/// cancellation can never slip between a waiter's flag check and its wait.
pub(crate) type WakeFn = dyn Fn() + Send + Sync;

/// A cloneable cancellation signal for blocking mailbox operations.
///
/// Cancellation is one-way and permanent: once cancelled, every current and
/// future wait carrying the token aborts.
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<TokenInner>,
}

#[derive(Default)]
struct TokenInner {
    cancelled: AtomicBool,
    /// Wake-up hooks of mailboxes with a wait in progress under this token.
    waiters: Mutex<Vec<Weak<WakeFn>>>,
}

impl CancelToken {
    /// Create a new, uncancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Signal cancellation and wake every subscribed wait.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        // Snapshot the hooks, then invoke them outside the registry lock:
        // a hook takes its mailbox's state lock, which a subscribing thread
        // may hold while registering with this token.
        let wakers: Vec<Arc<WakeFn>> = {
            let waiters = lock_waiters(&self.inner.waiters);
            waiters.iter().filter_map(Weak::upgrade).collect()
        };
        for wake in wakers {
            wake();
        }
    }

    /// True iff [`cancel`](CancelToken::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Register a wake-up hook for the lifetime of the returned guard.
    pub(crate) fn subscribe(&self, wake: &Arc<WakeFn>) -> CancelSubscription<'_> {
        let mut waiters = lock_waiters(&self.inner.waiters);
        waiters.retain(|w| w.upgrade().is_some());
        waiters.push(Arc::downgrade(wake));
        CancelSubscription {
            token: self,
            wake: Arc::downgrade(wake),
        }
    }

    fn unsubscribe(&self, wake: &Weak<WakeFn>) {
        let mut waiters = lock_waiters(&self.inner.waiters);
        waiters.retain(|w| !Weak::ptr_eq(w, wake) && w.upgrade().is_some());
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

fn lock_waiters(
    waiters: &Mutex<Vec<Weak<WakeFn>>>,
) -> std::sync::MutexGuard<'_, Vec<Weak<WakeFn>>> {
    match waiters.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Keeps a mailbox's wake-up hook subscribed to a token while a wait is in
/// progress.
pub(crate) struct CancelSubscription<'t> {
    token: &'t CancelToken,
    wake: Weak<WakeFn>,
}

impl Drop for CancelSubscription<'_> {
    fn drop(&mut self) {
        self.token.unsubscribe(&self.wake);
    }
}
