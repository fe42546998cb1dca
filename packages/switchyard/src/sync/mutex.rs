use std::fmt;
use std::ops::{Deref, DerefMut};

/// A mutual exclusion lock protecting a value of type `T`.
///
/// The only way to access the value is through a [`ScopedLock`], which releases the mutex when
/// it goes out of scope. There is no manual unlock; use [`ScopedLock::unlocked()`] to release the
/// mutex for the duration of a closure.
///
/// This mutex is not re-entrant: locking it again on a thread that already holds it deadlocks.
/// Use [`ReentrantMutex`] if the same thread needs to acquire the lock recursively.
///
/// # Example
///
/// ```
/// use switchyard::sync::Mutex;
///
/// let counter = Mutex::new(0);
///
/// {
///     let mut lock = counter.lock();
///     *lock += 1;
/// }
///
/// assert_eq!(*counter.lock(), 1);
/// ```
pub struct Mutex<T> {
    inner: parking_lot::Mutex<T>,
}

impl<T> Mutex<T> {
    /// Creates a new unlocked mutex holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: parking_lot::Mutex::new(value),
        }
    }

    /// Acquires the mutex, blocking the current thread until it is available.
    pub fn lock(&self) -> ScopedLock<'_, T> {
        ScopedLock {
            guard: self.inner.lock(),
        }
    }

    /// Attempts to acquire the mutex without blocking.
    ///
    /// Returns `None` if the mutex is currently held by someone else.
    pub fn try_lock(&self) -> Option<ScopedLock<'_, T>> {
        self.inner.try_lock().map(|guard| ScopedLock { guard })
    }

    /// Returns a mutable reference to the protected value.
    ///
    /// No locking is needed because the exclusive borrow guarantees there are no other users.
    pub fn get_mut(&mut self) -> &mut T {
        self.inner.get_mut()
    }

    /// Consumes the mutex, returning the protected value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T: Default> Default for Mutex<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for Mutex<T> {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("locked", &self.inner.is_locked())
            .finish_non_exhaustive()
    }
}

/// Exclusive access to the value protected by a [`Mutex`].
///
/// The mutex is released when this is dropped.
pub struct ScopedLock<'a, T> {
    guard: parking_lot::MutexGuard<'a, T>,
}

impl<'a, T> ScopedLock<'a, T> {
    /// Temporarily releases the mutex while `f` executes, re-acquiring it before returning.
    ///
    /// The mutex is re-acquired even if `f` panics.
    pub fn unlocked<F, R>(&mut self, f: F) -> R
    where
        F: FnOnce() -> R,
    {
        parking_lot::MutexGuard::unlocked(&mut self.guard, f)
    }

    pub(crate) fn guard_mut(&mut self) -> &mut parking_lot::MutexGuard<'a, T> {
        &mut self.guard
    }
}

impl<T> Deref for ScopedLock<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for ScopedLock<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> fmt::Debug for ScopedLock<'_, T> {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedLock").finish_non_exhaustive()
    }
}

/// A mutex that the thread already holding it may acquire again.
///
/// Because several locks on the same thread may be alive at once, a [`ReentrantLock`] only
/// grants shared access to the protected value. Combine with a `Cell` or `RefCell` if the value
/// needs to be mutated.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
///
/// use switchyard::sync::ReentrantMutex;
///
/// let depth = ReentrantMutex::new(Cell::new(0));
///
/// let outer = depth.lock();
/// outer.set(outer.get() + 1);
///
/// // Same thread: does not deadlock.
/// let inner = depth.lock();
/// inner.set(inner.get() + 1);
///
/// assert_eq!(inner.get(), 2);
/// ```
pub struct ReentrantMutex<T> {
    inner: parking_lot::ReentrantMutex<T>,
}

impl<T> ReentrantMutex<T> {
    /// Creates a new unlocked re-entrant mutex holding `value`.
    #[must_use]
    pub fn new(value: T) -> Self {
        Self {
            inner: parking_lot::ReentrantMutex::new(value),
        }
    }

    /// Acquires the mutex, blocking unless it is free or already held by the current thread.
    pub fn lock(&self) -> ReentrantLock<'_, T> {
        ReentrantLock {
            guard: self.inner.lock(),
        }
    }

    /// Attempts to acquire the mutex without blocking.
    pub fn try_lock(&self) -> Option<ReentrantLock<'_, T>> {
        self.inner.try_lock().map(|guard| ReentrantLock { guard })
    }

    /// Consumes the mutex, returning the protected value.
    pub fn into_inner(self) -> T {
        self.inner.into_inner()
    }
}

impl<T> fmt::Debug for ReentrantMutex<T> {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantMutex")
            .field("locked", &self.inner.is_locked())
            .finish_non_exhaustive()
    }
}

/// Shared access to the value protected by a [`ReentrantMutex`].
pub struct ReentrantLock<'a, T> {
    guard: parking_lot::ReentrantMutexGuard<'a, T>,
}

impl<T> Deref for ReentrantLock<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> fmt::Debug for ReentrantLock<'_, T> {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReentrantLock").finish_non_exhaustive()
    }
}
