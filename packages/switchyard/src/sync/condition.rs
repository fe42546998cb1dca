use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Condvar;

use crate::sync::ScopedLock;

/// A condition variable with a single sticky "signalled" flag.
///
/// A condition is always used together with one [`Mutex`][crate::sync::Mutex]. All operations
/// take the caller's [`ScopedLock`] on that mutex, which is what protects the flag.
///
/// * [`signal()`][Self::signal] sets the flag and wakes a waiter. Signals that arrive while the
///   flag is already set coalesce into one pending wake; they do not accumulate.
/// * [`wait()`][Self::wait] returns immediately if the flag is set, otherwise it releases the
///   mutex and blocks until signalled. Either way the flag is consumed (cleared) on return.
/// * [`wait_for()`][Self::wait_for] and [`wait_until()`][Self::wait_until] additionally give up
///   when the timeout elapses, returning `false` and leaving the (unset) flag as it is.
///
/// Spurious wakeups of the underlying condition variable are absorbed internally.
#[derive(Debug, Default)]
pub struct Condition {
    condvar: Condvar,

    // Only read or written while the associated mutex is held; the atomic merely makes the type
    // `Sync` without an `UnsafeCell`.
    signalled: AtomicBool,
}

impl Condition {
    /// Creates a new condition in the non-signalled state.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Blocks until the condition is signalled, then consumes the signal.
    ///
    /// The mutex is released while blocked and re-acquired before returning.
    pub fn wait<T>(&self, lock: &mut ScopedLock<'_, T>) {
        while !self.signalled.load(Ordering::Relaxed) {
            self.condvar.wait(lock.guard_mut());
        }

        self.signalled.store(false, Ordering::Relaxed);
    }

    /// Blocks until the condition is signalled or `timeout` elapses.
    ///
    /// Returns `true` if the signal was received (and consumed), `false` on timeout.
    pub fn wait_for<T>(&self, lock: &mut ScopedLock<'_, T>, timeout: Duration) -> bool {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.wait_until(lock, deadline),
            // The deadline is beyond what the platform clock can represent. That is the
            // same as waiting forever.
            None => {
                self.wait(lock);
                true
            }
        }
    }

    /// Blocks until the condition is signalled or `deadline` is reached.
    ///
    /// Returns `true` if the signal was received (and consumed), `false` on timeout.
    pub fn wait_until<T>(&self, lock: &mut ScopedLock<'_, T>, deadline: Instant) -> bool {
        while !self.signalled.load(Ordering::Relaxed) {
            if self.condvar.wait_until(lock.guard_mut(), deadline).timed_out() {
                // A signal may have raced with the timeout; it still counts.
                break;
            }
        }

        self.signalled.swap(false, Ordering::Relaxed)
    }

    /// Sets the signalled flag and wakes one waiter, if any.
    ///
    /// Does nothing if the flag is already set: the pending wake is not duplicated.
    pub fn signal<T>(&self, _lock: &ScopedLock<'_, T>) {
        if !self.signalled.swap(true, Ordering::Relaxed) {
            self.condvar.notify_one();
        }
    }

    /// Whether a signal is pending that no waiter has consumed yet.
    #[must_use]
    pub fn signalled<T>(&self, _lock: &ScopedLock<'_, T>) -> bool {
        self.signalled.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::sync::Mutex;

    assert_impl_all!(Condition: Send, Sync);

    #[test]
    fn wait_returns_immediately_when_already_signalled() {
        let mutex = Mutex::new(());
        let condition = Condition::new();
        let mut lock = mutex.lock();

        condition.signal(&lock);
        assert!(condition.signalled(&lock));

        condition.wait(&mut lock);
        assert!(!condition.signalled(&lock));
    }

    #[test]
    fn signals_coalesce() {
        let mutex = Mutex::new(());
        let condition = Condition::new();
        let mut lock = mutex.lock();

        condition.signal(&lock);
        condition.signal(&lock);
        condition.signal(&lock);

        assert!(condition.wait_for(&mut lock, Duration::ZERO));
        // The three signals were one pending wake, which the first wait consumed.
        assert!(!condition.wait_for(&mut lock, Duration::from_millis(10)));
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Timing-based.
    fn wait_for_times_out_without_signal() {
        let mutex = Mutex::new(());
        let condition = Condition::new();
        let mut lock = mutex.lock();

        let started = Instant::now();
        assert!(!condition.wait_for(&mut lock, Duration::from_millis(20)));

        assert!(started.elapsed() >= Duration::from_millis(20));
        assert!(!condition.signalled(&lock));
    }

    #[test]
    fn wait_until_past_deadline_consumes_pending_signal() {
        let mutex = Mutex::new(());
        let condition = Condition::new();
        let mut lock = mutex.lock();

        condition.signal(&lock);

        let deadline = Instant::now();
        assert!(condition.wait_until(&mut lock, deadline));
        assert!(!condition.signalled(&lock));
    }

    #[test]
    #[cfg_attr(miri, ignore)] // Real threads are slow under Miri.
    fn signal_from_other_thread_wakes_waiter() {
        let shared = Arc::new((Mutex::new(false), Condition::new()));

        let signaller = {
            let shared = Arc::clone(&shared);
            thread::spawn(move || {
                let (mutex, condition) = &*shared;
                let mut lock = mutex.lock();
                *lock = true;
                condition.signal(&lock);
            })
        };

        let (mutex, condition) = &*shared;
        let mut lock = mutex.lock();
        condition.wait(&mut lock);
        assert!(*lock);
        drop(lock);

        signaller.join().unwrap();
    }
}
