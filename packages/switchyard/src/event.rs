//! Type-erased events and their type tokens.

use std::any::{self, Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};

use crate::TimerId;

/// An immutable payload that can be posted to a handler for delivery on its loop's worker
/// thread.
///
/// Queued events are owned by the loop as `Box<dyn Event>` until delivery, at which point
/// ownership moves into the handler callback. The concrete type of an event is its identity:
/// two events are of the same kind if and only if they report the same [`EventKind`].
///
/// Most event kinds are declared with [`simple_event!`][crate::simple_event], which also
/// implements [`Payload`] so the values can be forwarded to handler methods by
/// [`dispatch()`][crate::dispatch()].
pub trait Event: Any + Send {
    /// Human-readable name of the event kind, used in diagnostics.
    fn name(&self) -> &'static str {
        any::type_name::<Self>()
    }
}

impl dyn Event {
    /// The type token of the concrete event kind.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        EventKind {
            type_id: self.as_any().type_id(),
            name: self.name(),
        }
    }

    /// Whether this event is of kind `E`.
    #[must_use]
    pub fn is<E: Event>(&self) -> bool {
        self.as_any().is::<E>()
    }

    /// Returns a reference to the concrete event if it is of kind `E`.
    #[must_use]
    pub fn downcast_ref<E: Event>(&self) -> Option<&E> {
        self.as_any().downcast_ref::<E>()
    }

    /// Converts the boxed event into its concrete kind `E`.
    ///
    /// # Errors
    ///
    /// Returns the original event unchanged if it is not of kind `E`.
    pub fn downcast<E: Event>(self: Box<Self>) -> Result<Box<E>, Box<Self>> {
        if self.is::<E>() {
            let any: Box<dyn Any> = self;
            Ok(any
                .downcast::<E>()
                .unwrap_or_else(|_| unreachable!("kind was checked immediately before")))
        } else {
            Err(self)
        }
    }

    fn as_any(&self) -> &(dyn Any + 'static) {
        self
    }
}

impl fmt::Debug for dyn Event {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.name())
            .finish_non_exhaustive()
    }
}

/// The type token identifying one event kind.
///
/// Every concrete [`Event`] type has exactly one token for the lifetime of the process. Tokens
/// compare by the compiler-assigned type identity, so no registration step is needed and two
/// tokens are equal exactly when they describe the same Rust type.
#[derive(Clone, Copy)]
pub struct EventKind {
    type_id: TypeId,
    name: &'static str,
}

impl EventKind {
    /// The token of event kind `E`.
    #[must_use]
    pub fn of<E: Event>() -> Self {
        Self {
            type_id: TypeId::of::<E>(),
            name: any::type_name::<E>(),
        }
    }

    /// Human-readable name of the event kind.
    #[must_use]
    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for EventKind {
    fn eq(&self, other: &Self) -> bool {
        self.type_id == other.type_id
    }
}

impl Eq for EventKind {}

impl Hash for EventKind {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.type_id.hash(state);
    }
}

impl fmt::Debug for EventKind {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EventKind").field(&self.name).finish()
    }
}

/// An event kind that carries a fixed, ordered tuple of values.
///
/// The tuple is what [`dispatch()`][crate::dispatch()] expands into positional arguments when
/// routing the event to a handler method.
pub trait Payload: Event + Sized {
    /// The values carried by the event, as a tuple (possibly the unit tuple).
    type Values: Send + 'static;

    /// Creates the event from its values.
    fn from_values(values: Self::Values) -> Self;

    /// Borrows the values carried by the event.
    fn values(&self) -> &Self::Values;

    /// Consumes the event, returning its values.
    fn into_values(self) -> Self::Values;
}

/// Declares an event kind carrying a fixed tuple of values.
///
/// The generated struct implements [`Event`] and [`Payload`], has a `new(values)` constructor
/// and a `values()` accessor. Attributes (doc comments, derives) are forwarded to the struct.
///
/// # Example
///
/// ```
/// use switchyard::{Payload, simple_event};
///
/// simple_event! {
///     /// Reports transfer progress as (bytes done, bytes total).
///     #[derive(Debug)]
///     pub TransferProgress(u64, u64)
/// }
///
/// simple_event! {
///     /// Carries no values at all.
///     pub Cancelled()
/// }
///
/// let event = TransferProgress::new((10, 100));
/// assert_eq!(event.values(), &(10, 100));
/// assert_eq!(event.into_values(), (10, 100));
/// ```
#[macro_export]
macro_rules! simple_event {
    ($(#[$meta:meta])* $vis:vis $name:ident($($value:ty),* $(,)?)) => {
        $(#[$meta])*
        $vis struct $name {
            values: ($($value,)*),
        }

        impl $name {
            /// Creates the event from its values.
            #[must_use]
            #[allow(dead_code, reason = "not every event kind is constructed by every crate")]
            $vis fn new(values: ($($value,)*)) -> Self {
                Self { values }
            }
        }

        impl $crate::Event for $name {}

        impl $crate::Payload for $name {
            type Values = ($($value,)*);

            fn from_values(values: Self::Values) -> Self {
                Self { values }
            }

            fn values(&self) -> &Self::Values {
                &self.values
            }

            fn into_values(self) -> Self::Values {
                self.values
            }
        }
    };
}

simple_event! {
    /// The built-in event delivered when a timer fires. It carries the identifier of the timer.
    ///
    /// Timer events travel through the same dispatch path as user events, so handlers route them
    /// with [`Dispatch::on_method::<TimerEvent, _, _>()`][crate::Dispatch::on_method].
    #[derive(Debug)]
    pub TimerEvent(TimerId)
}

impl TimerEvent {
    /// The identifier of the timer that fired.
    #[must_use]
    pub fn timer_id(&self) -> TimerId {
        self.values.0
    }
}
