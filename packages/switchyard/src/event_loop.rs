//! Event loop lifecycle and the state it shares with handlers and its worker thread.

use std::any::type_name;
use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::panic;
use std::sync::{Arc, OnceLock, Weak};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use tracing::{debug, error, trace};

use crate::sync::{Condition, Mutex, ScopedLock};
use crate::{
    Event, EventHandler, HandlerCore, HandlerId, HandlerSlot, HandlerState, Result, TimerId,
    TimerMode, TimerSet, WorkerThread, worker,
};

const DEFAULT_THREAD_NAME: &str = "switchyard-worker";

/// An event and the handler it is addressed to, owned by the loop until delivery.
pub(crate) struct QueuedEvent {
    pub(crate) handler: Arc<HandlerSlot>,
    pub(crate) event: Box<dyn Event>,
}

/// The handler whose callback is running on the worker thread.
pub(crate) struct ActiveCallback {
    pub(crate) handler: HandlerId,

    /// Threads blocked in `remove_handler()` for this handler, released when the callback
    /// returns.
    pub(crate) waiters: Vec<oneshot::Sender<()>>,
}

impl ActiveCallback {
    pub(crate) fn new(handler: HandlerId) -> Self {
        Self {
            handler,
            waiters: Vec::new(),
        }
    }
}

/// Everything protected by the loop's lock.
pub(crate) struct LoopState {
    pub(crate) queue: VecDeque<QueuedEvent>,
    pub(crate) timers: TimerSet<Arc<HandlerSlot>>,
    pub(crate) active: Option<ActiveCallback>,
    pub(crate) quit: bool,
}

impl LoopState {
    pub(crate) fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            timers: TimerSet::new(),
            active: None,
            quit: false,
        }
    }

    /// Detaches the queued events for which `predicate` returns `true`, preserving the order of
    /// the remaining ones. The caller drops the returned events after releasing the lock.
    fn take_events_where<P>(&mut self, mut predicate: P) -> VecDeque<QueuedEvent>
    where
        P: FnMut(&QueuedEvent) -> bool,
    {
        let (taken, kept): (VecDeque<_>, VecDeque<_>) =
            mem::take(&mut self.queue).into_iter().partition(|entry| predicate(entry));

        self.queue = kept;
        taken
    }
}

/// State shared between the [`EventLoop`], its worker thread and every [`HandlerCore`] bound to
/// it. Handler cores keep it alive, so it may outlive the loop's worker.
pub(crate) struct LoopShared {
    pub(crate) state: Mutex<LoopState>,

    /// Wakes the worker when there is new work or an earlier deadline.
    pub(crate) wake: Condition,

    pub(crate) worker: OnceLock<ThreadId>,
    name: String,
}

impl LoopShared {
    fn new(name: String) -> Self {
        Self {
            state: Mutex::new(LoopState::new()),
            wake: Condition::new(),
            worker: OnceLock::new(),
            name,
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn is_worker_thread(&self) -> bool {
        self.worker.get() == Some(&thread::current().id())
    }

    pub(crate) fn send_event(&self, handler: &Arc<HandlerSlot>, event: Box<dyn Event>) {
        let rejected = {
            let mut state = self.state.lock();

            if state.quit || !handler.accepts_work() {
                Some(event)
            } else {
                handler.activate();

                trace!(handler = %handler.id(), event = event.name(), "event queued");

                let was_empty = state.queue.is_empty();
                state.queue.push_back(QueuedEvent {
                    handler: Arc::clone(handler),
                    event,
                });

                if was_empty {
                    self.wake.signal(&state);
                }

                None
            }
        };

        // Dropped outside the lock, as the event's destructor may call back into the loop.
        if let Some(event) = rejected {
            trace!(handler = %handler.id(), event = event.name(), "event discarded");
            drop(event);
        }
    }

    pub(crate) fn add_timer(
        &self,
        handler: &Arc<HandlerSlot>,
        interval: Duration,
        mode: TimerMode,
    ) -> Option<TimerId> {
        let mut state = self.state.lock();
        self.add_timer_locked(&mut state, handler, interval, mode)
    }

    pub(crate) fn stop_timer(&self, handler: &Arc<HandlerSlot>, id: TimerId) {
        let mut state = self.state.lock();
        Self::stop_timer_locked(&mut state, handler, id);
    }

    pub(crate) fn stop_add_timer(
        &self,
        handler: &Arc<HandlerSlot>,
        old: TimerId,
        interval: Duration,
        mode: TimerMode,
    ) -> Option<TimerId> {
        let mut state = self.state.lock();
        Self::stop_timer_locked(&mut state, handler, old);
        self.add_timer_locked(&mut state, handler, interval, mode)
    }

    fn add_timer_locked(
        &self,
        state: &mut ScopedLock<'_, LoopState>,
        handler: &Arc<HandlerSlot>,
        interval: Duration,
        mode: TimerMode,
    ) -> Option<TimerId> {
        if state.quit || !handler.accepts_work() {
            return None;
        }

        let (id, is_earliest) =
            state
                .timers
                .insert(Arc::clone(handler), Instant::now(), interval, mode);

        handler.activate();

        trace!(handler = %handler.id(), timer = %id, ?interval, ?mode, "timer armed");

        if is_earliest {
            self.wake.signal(state);
        }

        Some(id)
    }

    fn stop_timer_locked(state: &mut LoopState, handler: &HandlerSlot, id: TimerId) {
        let owned = state
            .timers
            .owner(id)
            .is_some_and(|owner| owner.id() == handler.id());

        if owned && state.timers.remove(id) {
            trace!(handler = %handler.id(), timer = %id, "timer stopped");
        }
    }

    pub(crate) fn filter_events<P>(&self, mut predicate: P) -> usize
    where
        P: FnMut(HandlerId, &dyn Event) -> bool,
    {
        let removed = self
            .state
            .lock()
            .take_events_where(|entry| predicate(entry.handler.id(), &*entry.event));

        trace!(count = removed.len(), "queued events filtered out");

        removed.len()
    }

    pub(crate) fn remove_handler(&self, handler: &Arc<HandlerSlot>) {
        let (purged, timers, completion) = {
            let mut state = self.state.lock();

            if handler.state() == HandlerState::Removed {
                return;
            }

            handler.set_state(HandlerState::Removing);

            let id = handler.id();
            let purged = state.take_events_where(|entry| entry.handler.id() == id);
            let timers = state.timers.remove_where(|owner| owner.id() == id);

            let completion = match state.active.as_mut() {
                Some(active) if active.handler == id => {
                    if self.is_worker_thread() {
                        // Called from the handler's own callback (or from the destructor of the
                        // handler object, released at the end of that callback). The worker
                        // completes the removal once the callback returns.
                        None
                    } else {
                        let (tx, rx) = oneshot::channel();
                        active.waiters.push(tx);
                        Some(rx)
                    }
                }
                _ => {
                    handler.set_state(HandlerState::Removed);
                    None
                }
            };

            (purged, timers, completion)
        };

        debug!(
            handler = %handler.id(),
            discarded_events = purged.len(),
            disarmed_timers = timers,
            waiting = completion.is_some(),
            "removing handler"
        );

        drop(purged);

        if let Some(completion) = completion {
            // The worker always completes the removal before releasing waiters. A receive error
            // means the worker thread itself is gone, which also guarantees no further callback.
            if completion.recv().is_err() {
                handler.finish_removal();
            }
        }
    }
}

impl fmt::Debug for LoopShared {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// A single-threaded event loop that delivers events and timer expiries to handlers.
///
/// Every loop owns one dedicated worker thread, started when the loop is built. Handler
/// callbacks only ever run on that thread, one at a time. Each iteration the worker fires the
/// earliest expired timer if there is one, otherwise delivers the oldest queued event,
/// otherwise sleeps until new work arrives or the next timer deadline is reached.
///
/// Expired timers always take priority over queued events. A handler that arms very frequent
/// or very slow timers can therefore delay the delivery of queued events on the whole loop.
///
/// # Lifetime
///
/// [`stop()`][Self::stop] (also called on drop) lets the callback in progress finish, stops
/// the worker thread and joins it. Events still queued at that point are dropped without being
/// delivered, and armed timers are disarmed. Handler cores stay usable after the loop stops but
/// any work they post is discarded.
///
/// # Panics
///
/// If a handler callback panics, the worker stops processing and the panic is re-raised by
/// [`stop()`][Self::stop] (or the loop's drop) on the thread that owns the loop.
///
/// # Example
///
/// ```
/// use std::sync::mpsc;
/// use std::time::Duration;
///
/// use switchyard::{
///     Event, EventHandler, EventLoop, HandlerCore, TimerEvent, TimerId, TimerMode, dispatch,
/// };
///
/// struct Alarm {
///     core: HandlerCore,
///     rang: mpsc::Sender<TimerId>,
/// }
///
/// impl EventHandler for Alarm {
///     fn on_event(&self, event: Box<dyn Event>) {
///         let handled = dispatch(event)
///             .on::<TimerEvent, _>(|id: TimerId| self.rang.send(id).unwrap())
///             .handled();
///
///         assert!(handled);
///     }
/// }
///
/// impl Drop for Alarm {
///     fn drop(&mut self) {
///         self.core.remove_handler();
///     }
/// }
///
/// let event_loop = EventLoop::builder().thread_name("alarm-clock").build()?;
/// let (tx, rx) = mpsc::channel();
///
/// let alarm = event_loop.create_handler(|core| Alarm { core, rang: tx });
/// let timer = alarm.core.add_timer(Duration::from_millis(10), TimerMode::OneShot);
///
/// assert_eq!(Some(rx.recv().unwrap()), timer);
/// # Ok::<(), switchyard::Error>(())
/// ```
pub struct EventLoop {
    shared: Arc<LoopShared>,
    thread: Mutex<WorkerThread>,
}

impl EventLoop {
    /// Creates a loop with default settings and starts its worker thread.
    ///
    /// Use [`EventLoop::builder()`] for custom configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be started.
    pub fn new() -> Result<Self> {
        Self::builder().build()
    }

    /// Creates a builder for configuring a loop.
    #[must_use]
    pub fn builder() -> LoopBuilder {
        LoopBuilder::new()
    }

    /// Creates a handler bound to this loop.
    ///
    /// `build` receives the [`HandlerCore`] to embed in the handler object. The core refers
    /// back to the handler object, which is why the object is allocated here.
    pub fn create_handler<H, F>(&self, build: F) -> Arc<H>
    where
        H: EventHandler,
        F: FnOnce(HandlerCore) -> H,
    {
        Arc::new_cyclic(|handler: &Weak<H>| build(HandlerCore::new(self, Weak::clone(handler))))
    }

    /// Deletes queued events for which `predicate` returns `true`, across all handlers.
    ///
    /// The predicate receives the addressed handler and the event. It runs while the loop is
    /// locked and must not call back into the loop. Returns the number of deleted events, which
    /// are dropped after the lock is released.
    pub fn filter_events<P>(&self, predicate: P) -> usize
    where
        P: FnMut(HandlerId, &dyn Event) -> bool,
    {
        self.shared.filter_events(predicate)
    }

    /// Stops the worker thread and waits for it to exit.
    ///
    /// A callback in progress runs to completion; queued events are dropped without being
    /// delivered and timers are disarmed. Calling this again has no effect.
    ///
    /// # Panics
    ///
    /// Panics if called from the loop's own worker thread, which cannot wait for itself. If a
    /// handler callback panicked, that panic is re-raised here.
    pub fn stop(&self) {
        assert!(
            !self.shared.is_worker_thread(),
            "an event loop cannot be stopped from its own worker thread"
        );

        {
            let mut state = self.shared.state.lock();

            if !state.quit {
                state.quit = true;
                self.shared.wake.signal(&state);
            }
        }

        let result = self.thread.lock().join();

        if let Err(payload) = result {
            if thread::panicking() {
                error!(
                    event_loop = self.shared.name(),
                    "handler callback panicked; panic discarded while already unwinding"
                );
            } else {
                panic::resume_unwind(payload);
            }
        }
    }

    /// The number of events queued and not yet delivered.
    #[must_use]
    pub fn pending_events(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// The number of armed timers.
    #[must_use]
    pub fn active_timers(&self) -> usize {
        self.shared.state.lock().timers.len()
    }

    /// The name of the loop's worker thread.
    #[must_use]
    pub fn name(&self) -> &str {
        self.shared.name()
    }

    pub(crate) fn shared(&self) -> &Arc<LoopShared> {
        &self.shared
    }
}

impl fmt::Debug for EventLoop {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct(type_name::<Self>())
            .field("name", &self.name())
            .field("thread", &self.thread)
            .finish_non_exhaustive()
    }
}

impl Drop for EventLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Builder for configuring an [`EventLoop`].
#[derive(Debug)]
pub struct LoopBuilder {
    thread_name: String,
    stack_size: Option<usize>,
}

impl LoopBuilder {
    fn new() -> Self {
        Self {
            thread_name: DEFAULT_THREAD_NAME.to_string(),
            stack_size: None,
        }
    }

    /// Sets the name of the worker thread, which also names the loop in logs.
    ///
    /// Default is `switchyard-worker`.
    #[must_use]
    pub fn thread_name(mut self, name: impl Into<String>) -> Self {
        self.thread_name = name.into();
        self
    }

    /// Sets the stack size of the worker thread, in bytes.
    ///
    /// Default is the platform default.
    #[must_use]
    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.stack_size = Some(bytes);
        self
    }

    /// Builds the loop and starts its worker thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker thread cannot be started.
    pub fn build(self) -> Result<EventLoop> {
        let shared = Arc::new(LoopShared::new(self.thread_name.clone()));

        let mut thread = WorkerThread::new(self.thread_name);

        if let Some(stack_size) = self.stack_size {
            thread = thread.with_stack_size(stack_size);
        }

        let worker_shared = Arc::clone(&shared);
        thread.run(move || worker::run(&worker_shared))?;

        debug!(event_loop = shared.name(), "event loop started");

        Ok(EventLoop {
            shared,
            thread: Mutex::new(thread),
        })
    }
}
