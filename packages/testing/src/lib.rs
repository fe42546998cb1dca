#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))] // This is all test code, no need to test it.

//! Private helpers for testing and examples in switchyard.

use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

/// Runs a test with a timeout to prevent infinite hangs.
///
/// Event loop tests block on worker threads in many places. If a test takes longer than the
/// timeout to complete, it fails instead of hanging the test run.
///
/// The timeout is 10 seconds under normal conditions and 60 seconds under Miri, where thread
/// synchronization primitives are significantly slower.
///
/// When the `MUTATION_TESTING` environment variable is set to "1", the watchdog is disabled
/// and the test function is executed directly. This allows mutation testing to properly detect
/// hanging mutations.
///
/// # Panics
///
/// Panics if the test exceeds the timeout (when not in mutation testing mode). Panics of the
/// test itself are propagated unchanged.
///
/// # Example
///
/// ```rust
/// use testing::with_watchdog;
///
/// with_watchdog(|| {
///     assert_eq!(2 + 2, 4);
/// });
/// ```
pub fn with_watchdog<F, R>(test_fn: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    if std::env::var("MUTATION_TESTING").as_deref() == Ok("1") {
        return test_fn();
    }

    let (tx, rx) = mpsc::channel();

    let test_handle = thread::Builder::new()
        .name("watchdog-test".to_string())
        .spawn(move || {
            let result = test_fn();
            // If this fails, the receiver has timed out.
            drop(tx.send(result));
        })
        .expect("failed to spawn test thread");

    let timeout = watchdog_timeout();

    match rx.recv_timeout(timeout) {
        Ok(result) => {
            test_handle.join().expect("test thread should not panic");
            result
        }
        Err(mpsc::RecvTimeoutError::Timeout) => {
            panic!("test exceeded {timeout:?} timeout");
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => match test_handle.join() {
            Ok(()) => panic!("test thread disconnected unexpectedly"),
            Err(e) => std::panic::resume_unwind(e),
        },
    }
}

fn watchdog_timeout() -> Duration {
    if cfg!(miri) {
        Duration::from_secs(60)
    } else {
        Duration::from_secs(10)
    }
}

/// Polls `condition` until it returns `true` or `timeout` elapses.
///
/// Returns whether the condition was satisfied. Use this for state that is updated by another
/// thread without a notification the test could block on.
pub fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;

    loop {
        if condition() {
            return true;
        }

        if Instant::now() >= deadline {
            return false;
        }

        thread::sleep(Duration::from_millis(1));
    }
}

/// A thread-safe, append-only record of observations, such as the order in which handler
/// callbacks ran.
///
/// Tests record from callbacks on a worker thread and read the entries from the test thread,
/// optionally blocking until a number of entries have been recorded.
#[derive(Debug)]
pub struct Journal<T> {
    entries: Mutex<Vec<T>>,
    changed: Condvar,
}

impl<T: Clone> Journal<T> {
    /// Creates an empty journal.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            changed: Condvar::new(),
        }
    }

    /// Appends an entry and wakes any thread waiting for entries.
    pub fn record(&self, entry: T) {
        self.entries.lock().push(entry);
        self.changed.notify_all();
    }

    /// A copy of the entries recorded so far, in recording order.
    #[must_use]
    pub fn entries(&self) -> Vec<T> {
        self.entries.lock().clone()
    }

    /// The number of entries recorded so far.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether nothing has been recorded yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Blocks until at least `count` entries have been recorded, then returns a copy of all
    /// entries.
    ///
    /// # Panics
    ///
    /// Panics if `timeout` elapses first.
    pub fn wait_for(&self, count: usize, timeout: Duration) -> Vec<T> {
        let deadline = Instant::now() + timeout;
        let mut entries = self.entries.lock();

        while entries.len() < count {
            if self.changed.wait_until(&mut entries, deadline).timed_out() && entries.len() < count
            {
                panic!(
                    "expected {count} journal entries within {timeout:?}, got {}",
                    entries.len()
                );
            }
        }

        entries.clone()
    }
}

impl<T: Clone> Default for Journal<T> {
    fn default() -> Self {
        Self::new()
    }
}
