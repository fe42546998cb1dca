//! Joinable worker thread.

use std::fmt;
use std::process;
use std::thread::{self, JoinHandle};

use tracing::{debug, error};

use crate::{Error, Result};

/// A named OS thread that must be explicitly joined before it is dropped.
///
/// The thread is created in the "not running" state. [`run()`][Self::run] spawns it and
/// [`join()`][Self::join] waits for it to finish, returning to the "not running" state so the
/// object can be reused.
///
/// # Panics
///
/// Dropping a `WorkerThread` whose thread has been started but not joined is a programming
/// error and aborts the process. Silently detaching would let the thread keep running against
/// state its owner believes to be torn down. If the drop happens while the current thread is
/// already unwinding from a panic, the thread is detached with an error log instead, so the
/// original panic is not masked by an abort.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicBool, Ordering};
///
/// use switchyard::WorkerThread;
///
/// let ran = Arc::new(AtomicBool::new(false));
/// let mut thread = WorkerThread::new("example-worker");
///
/// let ran_clone = Arc::clone(&ran);
/// thread.run(move || ran_clone.store(true, Ordering::Relaxed))?;
/// thread.join().expect("entry point does not panic");
///
/// assert!(ran.load(Ordering::Relaxed));
/// # Ok::<(), switchyard::Error>(())
/// ```
pub struct WorkerThread {
    name: String,
    stack_size: Option<usize>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerThread {
    /// Creates a worker thread object with the given thread name. No thread is started yet.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stack_size: None,
            handle: None,
        }
    }

    /// Sets the stack size used for threads started by subsequent [`run()`][Self::run] calls.
    ///
    /// By default the platform default stack size is used.
    #[must_use]
    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }

    /// The name given to the OS thread.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a thread has been started and not yet joined.
    #[must_use]
    pub fn is_joinable(&self) -> bool {
        self.handle.is_some()
    }

    /// Spawns the OS thread, which executes `entry` and then exits.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ThreadAlreadyRunning`] if a previously started thread has not been
    /// joined yet, and [`Error::ThreadSpawn`] if the platform cannot create the thread. In both
    /// cases `entry` is dropped without being called.
    pub fn run<F>(&mut self, entry: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        if self.handle.is_some() {
            return Err(Error::ThreadAlreadyRunning {
                name: self.name.clone(),
            });
        }

        let mut builder = thread::Builder::new().name(self.name.clone());

        if let Some(stack_size) = self.stack_size {
            builder = builder.stack_size(stack_size);
        }

        let handle = builder.spawn(entry).map_err(|source| Error::ThreadSpawn {
            name: self.name.clone(),
            source,
        })?;

        debug!(thread = %self.name, "worker thread started");

        self.handle = Some(handle);
        Ok(())
    }

    /// Blocks until the thread has finished and returns to the "not running" state.
    ///
    /// Does nothing if no thread is running.
    ///
    /// # Errors
    ///
    /// If the entry point panicked, the panic payload is returned so the caller can decide
    /// whether to re-raise it.
    pub fn join(&mut self) -> thread::Result<()> {
        let Some(handle) = self.handle.take() else {
            return Ok(());
        };

        let result = handle.join();
        debug!(thread = %self.name, panicked = result.is_err(), "worker thread joined");

        result
    }
}

impl fmt::Debug for WorkerThread {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerThread")
            .field("name", &self.name)
            .field("joinable", &self.is_joinable())
            .finish_non_exhaustive()
    }
}

impl Drop for WorkerThread {
    #[cfg_attr(test, mutants::skip)] // Mutations here can only manifest as process aborts.
    fn drop(&mut self) {
        if self.handle.is_none() {
            return;
        }

        if thread::panicking() {
            error!(
                thread = %self.name,
                "worker thread dropped without being joined during unwinding; detaching it"
            );
            return;
        }

        error!(
            thread = %self.name,
            "worker thread dropped without being joined; this is a fatal programming error"
        );
        process::abort();
    }
}
