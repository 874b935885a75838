//! Wait budgets for blocking mailbox operations
//!
//! A [`Wait`] expresses how long a deposit/receive/flush may block: not at
//! all, up to a duration, or without limit, optionally interruptible
//! through a [`CancelToken`]. Internally a wait becomes a [`TimeBudget`]
//! whose deadline is fixed once, so spurious condvar wakeups never extend a
//! caller's effective time budget.

use super::cancel::{CancelSubscription, CancelToken, WakeFn};
use std::sync::{Arc, Condvar, MutexGuard};
use std::time::{Duration, Instant};

/// A time budget for one blocking mailbox operation.
#[derive(Debug, Clone)]
pub struct Wait {
    limit: Option<Duration>,
    cancel: Option<CancelToken>,
}

impl Wait {
    /// Wait indefinitely.
    pub fn forever() -> Self {
        Self {
            limit: None,
            cancel: None,
        }
    }

    /// Do not block: attempt once and report the immediate outcome.
    pub fn no_wait() -> Self {
        Self::up_to(Duration::ZERO)
    }

    /// Wait up to `limit`.
    pub fn up_to(limit: Duration) -> Self {
        Self {
            limit: Some(limit),
            cancel: None,
        }
    }

    /// Wait up to `ms` milliseconds.
    pub fn millis(ms: u64) -> Self {
        Self::up_to(Duration::from_millis(ms))
    }

    /// Make the wait interruptible by `token`.
    pub fn cancelled_by(mut self, token: &CancelToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    /// Fix the deadline and start the budget.
    pub(crate) fn begin(&self) -> TimeBudget {
        TimeBudget {
            deadline: self.limit.map(|limit| Instant::now() + limit),
            cancel: self.cancel.clone(),
        }
    }
}

/// Running bookkeeping for one blocking operation: remaining time across
/// repeated condvar waits plus the cancellation hook.
pub(crate) struct TimeBudget {
    deadline: Option<Instant>,
    cancel: Option<CancelToken>,
}

impl TimeBudget {
    /// True once the deadline has passed. A no-limit budget never exhausts.
    pub(crate) fn exhausted(&self) -> bool {
        match self.deadline {
            Some(deadline) => Instant::now() >= deadline,
            None => false,
        }
    }

    /// True once the attached token (if any) has been cancelled.
    pub(crate) fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(CancelToken::is_cancelled)
    }

    /// Register the caller's wake-up hook with the attached token for the
    /// duration of the operation.
    pub(crate) fn subscribe<'t>(&'t self, wake: &Arc<WakeFn>) -> Option<CancelSubscription<'t>> {
        self.cancel.as_ref().map(|token| token.subscribe(wake))
    }

    /// Wait on `cond` until notified or the remaining budget elapses,
    /// releasing `guard` for the duration. Returns the reacquired guard;
    /// callers re-check their predicate, the budget, and cancellation.
    pub(crate) fn block<'g, T>(
        &self,
        cond: &Condvar,
        guard: MutexGuard<'g, T>,
    ) -> MutexGuard<'g, T> {
        match self.deadline {
            None => match cond.wait(guard) {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            },
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    return guard;
                }
                match cond.wait_timeout(guard, deadline - now) {
                    Ok((guard, _timeout)) => guard,
                    Err(poisoned) => poisoned.into_inner().0,
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_wait_is_immediately_exhausted() {
        let budget = Wait::no_wait().begin();
        assert!(budget.exhausted());
    }

    #[test]
    fn test_forever_never_exhausts() {
        let budget = Wait::forever().begin();
        assert!(!budget.exhausted());
        assert!(!budget.cancelled());
    }

    #[test]
    fn test_deadline_is_fixed_at_begin() {
        let budget = Wait::millis(20).begin();
        assert!(!budget.exhausted());
        std::thread::sleep(Duration::from_millis(40));
        assert!(budget.exhausted());
    }

    #[test]
    fn test_cancelled_budget_reports_cancellation() {
        let token = CancelToken::new();
        let budget = Wait::forever().cancelled_by(&token).begin();
        assert!(!budget.cancelled());
        token.cancel();
        assert!(budget.cancelled());
    }
}
