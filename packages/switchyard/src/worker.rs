//! Worker thread logic: choosing the next unit of work and delivering it to a handler.

use std::any::Any;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use tracing::{debug, error, trace};

use crate::event_loop::{ActiveCallback, LoopShared, LoopState, QueuedEvent};
use crate::sync::ScopedLock;
use crate::{Event, HandlerSlot, TimerEvent, TimerId};

/// What the worker does in one iteration.
pub(crate) enum Work {
    Quit,
    Timer {
        id: TimerId,
        handler: Arc<HandlerSlot>,
    },
    Event(QueuedEvent),
    WaitUntil(Instant),
    Wait,
}

/// Picks the next unit of work. Expired timers come before queued events.
pub(crate) fn next_work(state: &mut LoopState, now: Instant) -> Work {
    if state.quit {
        return Work::Quit;
    }

    if let Some((id, handler)) = state.timers.pop_expired(now) {
        return Work::Timer { id, handler };
    }

    if let Some(entry) = state.queue.pop_front() {
        return Work::Event(entry);
    }

    match state.timers.next_deadline() {
        Some(deadline) => Work::WaitUntil(deadline),
        None => Work::Wait,
    }
}

/// Entry point of the worker thread. Returns when the loop is told to quit.
pub(crate) fn run(shared: &LoopShared) {
    // The worker identity is only ever set by this thread.
    drop(shared.worker.set(thread::current().id()));

    debug!(event_loop = shared.name(), "worker thread started");

    let mut state = shared.state.lock();
    let mut panic_payload = None;

    loop {
        let delivered = match next_work(&mut state, Instant::now()) {
            Work::Quit => break,
            Work::Timer { id, handler } => {
                trace!(handler = %handler.id(), timer = %id, "timer fired");
                deliver(&mut state, &handler, Box::new(TimerEvent::new((id,))))
            }
            Work::Event(QueuedEvent { handler, event }) => {
                trace!(handler = %handler.id(), event = event.name(), "delivering event");
                deliver(&mut state, &handler, event)
            }
            Work::WaitUntil(deadline) => {
                // Woken early or timed out: either way the next iteration re-evaluates.
                shared.wake.wait_until(&mut state, deadline);
                Ok(())
            }
            Work::Wait => {
                shared.wake.wait(&mut state);
                Ok(())
            }
        };

        if let Err(payload) = delivered {
            error!(
                event_loop = shared.name(),
                "handler callback panicked; the event loop stops processing"
            );
            state.quit = true;
            panic_payload = Some(payload);
            break;
        }
    }

    let discarded = mem::take(&mut state.queue);
    let disarmed = state.timers.len();
    state.timers.clear();
    drop(state);

    debug!(
        event_loop = shared.name(),
        discarded_events = discarded.len(),
        disarmed_timers = disarmed,
        "worker thread exiting"
    );

    // Released without any callback, outside the lock.
    drop(discarded);

    if let Some(payload) = panic_payload {
        panic::resume_unwind(payload);
    }
}

/// Invokes the handler callback with the loop unlocked, marking the handler as active for the
/// duration. Returns the panic payload if the callback panicked.
fn deliver(
    state: &mut ScopedLock<'_, LoopState>,
    handler: &HandlerSlot,
    event: Box<dyn Event>,
) -> Result<(), Box<dyn Any + Send>> {
    state.active = Some(ActiveCallback::new(handler.id()));

    // Everything that runs user code, event destructors included, stays inside `catch_unwind`
    // so that waiters below are always released.
    let outcome = state.unlocked(|| {
        panic::catch_unwind(AssertUnwindSafe(move || {
            // The handler object may already be going away; its removal is then imminent and
            // the event is simply dropped.
            let Some(target) = handler.upgrade() else {
                drop(event);
                return;
            };

            // The target (possibly the last reference to the handler object) is released inside
            // the callback window, so a removal from its destructor counts as self-removal.
            target.on_event(event);
        }))
    });

    let active = state.active.take();

    // A removal requested while the callback ran can now complete.
    handler.finish_removal();

    if let Some(active) = active {
        for waiter in active.waiters {
            // The waiter may have given up; nothing to do then.
            drop(waiter.send(()));
        }
    }

    outcome
}
