//! Handlers: the objects that receive events and own timers on an event loop.

use std::fmt;
use std::num::NonZero;
use std::process;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::Duration;

use tracing::error;

use crate::event_loop::LoopShared;
use crate::{Event, EventLoop, Payload, TimerId, TimerMode};

/// The dispatch callback of a handler.
///
/// The loop invokes [`on_event()`][Self::on_event] on its worker thread, never on the thread
/// that sent the event, and never for two events at the same time. Implementations typically
/// route the event to typed methods with [`dispatch()`][crate::dispatch()].
///
/// A handler type embeds a [`HandlerCore`] and must call
/// [`HandlerCore::remove_handler()`] from its `Drop` implementation at the latest.
pub trait EventHandler: Send + Sync + 'static {
    /// Handles one event sent to this handler or one [`TimerEvent`][crate::TimerEvent] of a
    /// timer it owns.
    fn on_event(&self, event: Box<dyn Event>);
}

/// Process-unique identity of a handler.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct HandlerId(NonZero<u64>);

impl HandlerId {
    fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);

        // Relaxed is enough: uniqueness only depends on the atomicity of the increment.
        let value = NEXT.fetch_add(1, Ordering::Relaxed);

        Self(
            NonZero::new(value)
                .unwrap_or_else(|| unreachable!("64-bit handler identifiers cannot be exhausted")),
        )
    }

    /// The numeric value of the identifier.
    #[must_use]
    pub fn get(self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for HandlerId {
    #[cfg_attr(test, mutants::skip)] // No API contract for display output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle of a handler. Transitions only move forward.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[non_exhaustive]
pub enum HandlerState {
    /// Bound to a loop, but has not sent an event or armed a timer yet.
    Constructed,

    /// Has used its loop at least once and accepts new work.
    Active,

    /// Removal has started. New events and timers are discarded; a callback that was already
    /// running may still be finishing.
    Removing,

    /// Removal has completed. The callback will never be invoked again.
    Removed,
}

impl HandlerState {
    const fn to_raw(self) -> u8 {
        match self {
            Self::Constructed => 0,
            Self::Active => 1,
            Self::Removing => 2,
            Self::Removed => 3,
        }
    }

    const fn from_raw(raw: u8) -> Self {
        match raw {
            0 => Self::Constructed,
            1 => Self::Active,
            2 => Self::Removing,
            _ => Self::Removed,
        }
    }
}

/// The part of a handler the loop refers to from its queue and timer set.
///
/// The handler object itself is only referenced weakly, so pending work never keeps it alive.
/// The state is mutated only while the loop's lock is held; the atomic allows lock-free reads.
pub(crate) struct HandlerSlot {
    id: HandlerId,
    target: Weak<dyn EventHandler>,
    state: AtomicU8,
}

impl HandlerSlot {
    pub(crate) fn new(target: Weak<dyn EventHandler>) -> Self {
        Self {
            id: HandlerId::next(),
            target,
            state: AtomicU8::new(HandlerState::Constructed.to_raw()),
        }
    }

    pub(crate) fn id(&self) -> HandlerId {
        self.id
    }

    pub(crate) fn state(&self) -> HandlerState {
        HandlerState::from_raw(self.state.load(Ordering::Acquire))
    }

    pub(crate) fn set_state(&self, state: HandlerState) {
        self.state.store(state.to_raw(), Ordering::Release);
    }

    /// Whether new events and timers for this handler are accepted.
    pub(crate) fn accepts_work(&self) -> bool {
        matches!(
            self.state(),
            HandlerState::Constructed | HandlerState::Active
        )
    }

    /// Moves a freshly constructed handler to the active state. No effect in any other state.
    pub(crate) fn activate(&self) {
        // Failure means the handler already left the constructed state.
        drop(self.state.compare_exchange(
            HandlerState::Constructed.to_raw(),
            HandlerState::Active.to_raw(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ));
    }

    /// Completes a pending removal once the last callback has finished.
    pub(crate) fn finish_removal(&self) {
        // Failure means no removal was pending.
        drop(self.state.compare_exchange(
            HandlerState::Removing.to_raw(),
            HandlerState::Removed.to_raw(),
            Ordering::AcqRel,
            Ordering::Acquire,
        ));
    }

    pub(crate) fn upgrade(&self) -> Option<Arc<dyn EventHandler>> {
        self.target.upgrade()
    }
}

impl fmt::Debug for HandlerSlot {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerSlot")
            .field("id", &self.id)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

/// The loop-facing half of a handler, embedded in every handler object.
///
/// A `HandlerCore` binds a handler to exactly one [`EventLoop`] for its whole lifetime. It posts
/// events to the handler, arms and stops the handler's timers and, through
/// [`remove_handler()`][Self::remove_handler], tears the handler down safely while work for it
/// may still be in flight.
///
/// Create handlers with [`EventLoop::create_handler()`], which wires the core to the handler
/// object it is embedded in.
///
/// # Panics
///
/// Dropping the core of a handler that has used its loop without calling
/// [`remove_handler()`][Self::remove_handler] first is a fatal programming error and aborts the
/// process: the loop could otherwise still hold work for a handler that no longer exists. If
/// the current thread is already unwinding from a panic, the core removes the handler itself
/// instead so the original panic is not masked.
///
/// # Example
///
/// ```
/// use std::sync::mpsc;
///
/// use switchyard::{Event, EventHandler, EventLoop, HandlerCore, dispatch, simple_event};
///
/// simple_event! {
///     pub Greet(String)
/// }
///
/// struct Greeter {
///     core: HandlerCore,
///     replies: mpsc::Sender<String>,
/// }
///
/// impl Greeter {
///     fn on_greet(&self, name: String) {
///         self.replies.send(format!("hello, {name}")).unwrap();
///     }
/// }
///
/// impl EventHandler for Greeter {
///     fn on_event(&self, event: Box<dyn Event>) {
///         let handled = dispatch(event)
///             .on_method::<Greet, _, _>(self, Self::on_greet)
///             .handled();
///
///         assert!(handled);
///     }
/// }
///
/// impl Drop for Greeter {
///     fn drop(&mut self) {
///         self.core.remove_handler();
///     }
/// }
///
/// let event_loop = EventLoop::new()?;
/// let (tx, rx) = mpsc::channel();
///
/// let greeter = event_loop.create_handler(|core| Greeter { core, replies: tx });
/// greeter.core.send_event::<Greet>(("world".to_string(),));
///
/// assert_eq!(rx.recv().unwrap(), "hello, world");
/// # Ok::<(), switchyard::Error>(())
/// ```
pub struct HandlerCore {
    slot: Arc<HandlerSlot>,
    shared: Arc<LoopShared>,
}

impl HandlerCore {
    /// Binds a new handler core to `event_loop`, delivering to the handler object behind
    /// `handler`.
    ///
    /// The handler object is normally still under construction at this point, which is why it
    /// is passed as a weak reference (see [`Arc::new_cyclic()`]). Prefer
    /// [`EventLoop::create_handler()`], which does this wiring.
    #[must_use]
    pub fn new<H: EventHandler>(event_loop: &EventLoop, handler: Weak<H>) -> Self {
        let target: Weak<dyn EventHandler> = handler;

        Self {
            slot: Arc::new(HandlerSlot::new(target)),
            shared: Arc::clone(event_loop.shared()),
        }
    }

    /// The process-unique identity of this handler.
    #[must_use]
    pub fn id(&self) -> HandlerId {
        self.slot.id()
    }

    /// The current lifecycle state of this handler.
    #[must_use]
    pub fn state(&self) -> HandlerState {
        self.slot.state()
    }

    /// Constructs an event of kind `E` from `values` and posts it to this handler.
    ///
    /// The event is discarded without error if the handler is being removed or the loop has
    /// stopped.
    pub fn send_event<E: Payload>(&self, values: E::Values) {
        self.send(Box::new(E::from_values(values)));
    }

    /// Posts an already constructed event to this handler.
    ///
    /// Events posted to the same handler are delivered in the order they were posted, no matter
    /// which threads posted them. The event is discarded without error if the handler is being
    /// removed or the loop has stopped.
    pub fn send(&self, event: Box<dyn Event>) {
        self.shared.send_event(&self.slot, event);
    }

    /// Arms a timer owned by this handler that first fires after `interval`.
    ///
    /// Each expiry delivers a [`TimerEvent`][crate::TimerEvent] carrying the returned
    /// identifier. Expired timers take priority over queued events.
    ///
    /// A zero interval is accepted in both modes. A zero-interval repeating timer expires again
    /// on every iteration of the worker, so queued events wait until it is stopped. An interval
    /// too large for the platform clock fires at the latest instant the clock can represent.
    ///
    /// Returns `None` without arming anything if the handler is being removed or the loop has
    /// stopped.
    pub fn add_timer(&self, interval: Duration, mode: TimerMode) -> Option<TimerId> {
        self.shared.add_timer(&self.slot, interval, mode)
    }

    /// Disarms a timer owned by this handler.
    ///
    /// Stopping a timer that has already fired (one-shot), was already stopped or belongs to
    /// another handler does nothing.
    pub fn stop_timer(&self, id: TimerId) {
        self.shared.stop_timer(&self.slot, id);
    }

    /// Disarms the timer `old` and arms a new one, as one atomic step.
    ///
    /// No expiry of `old` can be delivered after this returns, unless its callback was already
    /// running. Returns the identifier of the new timer, with the same conditions as
    /// [`add_timer()`][Self::add_timer].
    pub fn stop_add_timer(
        &self,
        old: TimerId,
        interval: Duration,
        mode: TimerMode,
    ) -> Option<TimerId> {
        self.shared.stop_add_timer(&self.slot, old, interval, mode)
    }

    /// Deletes queued events of this handler for which `predicate` returns `true`.
    ///
    /// Returns the number of deleted events. The predicate runs while the loop is locked and
    /// must not call back into the loop. Deleted events are dropped after the lock is released.
    pub fn filter_events<P>(&self, mut predicate: P) -> usize
    where
        P: FnMut(&dyn Event) -> bool,
    {
        let id = self.id();

        self.shared
            .filter_events(|handler, event| handler == id && predicate(event))
    }

    /// Removes this handler from its loop.
    ///
    /// Queued events of the handler are discarded and its timers disarmed. If the handler's
    /// callback is running on the worker thread, this blocks until the callback has returned.
    /// After this returns, the callback is never invoked again.
    ///
    /// It is safe to call this from the callback of another handler on the same loop. When
    /// called from the handler's own callback, it does not wait (that would never finish): new
    /// work is rejected immediately and the running callback is the last one.
    ///
    /// Calling this more than once has no further effect.
    pub fn remove_handler(&self) {
        self.shared.remove_handler(&self.slot);
    }
}

impl fmt::Debug for HandlerCore {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HandlerCore")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("event_loop", &self.shared.name())
            .finish()
    }
}

impl Drop for HandlerCore {
    #[cfg_attr(test, mutants::skip)] // Mutations here can only manifest as process aborts.
    fn drop(&mut self) {
        if self.slot.state() != HandlerState::Active {
            return;
        }

        if thread::panicking() {
            error!(
                handler = %self.id(),
                "handler dropped without being removed during unwinding; removing it now"
            );
            self.remove_handler();
            return;
        }

        error!(
            handler = %self.id(),
            "handler dropped without being removed; this is a fatal programming error"
        );
        process::abort();
    }
}
