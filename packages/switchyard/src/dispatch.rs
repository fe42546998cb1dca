//! Routing type-erased events to strongly typed handler methods.

use std::fmt;

use crate::{Event, Payload};

/// Calls a function with the elements of a tuple as positional arguments.
///
/// Implemented for tuples of up to eight elements, including the unit tuple.
///
/// # Example
///
/// ```
/// use switchyard::Apply;
///
/// let sum = (2, 3).apply(|a: i32, b: i32| a + b);
/// assert_eq!(sum, 5);
/// ```
pub trait Apply<F> {
    /// The return type of the function.
    type Output;

    /// Calls `f` with the tuple elements as arguments.
    fn apply(self, f: F) -> Self::Output;
}

/// Calls a method on a target object with the elements of a tuple as positional arguments.
///
/// Implemented for tuples of up to eight elements, including the unit tuple.
///
/// # Example
///
/// ```
/// use switchyard::ApplyMethod;
///
/// struct Scale(i32);
///
/// impl Scale {
///     fn mul(&self, value: i32) -> i32 {
///         self.0 * value
///     }
/// }
///
/// let scale = Scale(3);
/// assert_eq!((7,).apply_method(&scale, Scale::mul), 21);
/// ```
pub trait ApplyMethod<T: ?Sized, F> {
    /// The return type of the method.
    type Output;

    /// Calls `method` on `target` with the tuple elements as arguments.
    fn apply_method(self, target: &T, method: F) -> Self::Output;
}

macro_rules! impl_apply {
    ($($arg:ident),*) => {
        impl<Func, Ret, $($arg),*> Apply<Func> for ($($arg,)*)
        where
            Func: FnOnce($($arg),*) -> Ret,
        {
            type Output = Ret;

            #[allow(non_snake_case, reason = "type parameter names double as bindings")]
            fn apply(self, f: Func) -> Ret {
                let ($($arg,)*) = self;
                f($($arg),*)
            }
        }

        impl<Target, Func, Ret, $($arg),*> ApplyMethod<Target, Func> for ($($arg,)*)
        where
            Target: ?Sized,
            Func: FnOnce(&Target, $($arg),*) -> Ret,
        {
            type Output = Ret;

            #[allow(non_snake_case, reason = "type parameter names double as bindings")]
            fn apply_method(self, target: &Target, method: Func) -> Ret {
                let ($($arg,)*) = self;
                method(target, $($arg),*)
            }
        }
    };
}

impl_apply!();
impl_apply!(A);
impl_apply!(A, B);
impl_apply!(A, B, C);
impl_apply!(A, B, C, D);
impl_apply!(A, B, C, D, E);
impl_apply!(A, B, C, D, E, G);
impl_apply!(A, B, C, D, E, G, H);
impl_apply!(A, B, C, D, E, G, H, I);

/// Starts routing `event` to the first matching link of a [`Dispatch`] chain.
///
/// Candidate kinds are tested in the order the links are added, so list the most frequent kind
/// first. The order only affects efficiency, never the outcome, because an event has exactly
/// one kind.
///
/// # Example
///
/// ```
/// use switchyard::{Event, TimerEvent, dispatch, simple_event};
///
/// simple_event! {
///     pub Progress(u64, u64)
/// }
///
/// struct Download;
///
/// impl Download {
///     fn on_progress(&self, done: u64, total: u64) {
///         assert!(done <= total);
///     }
///
///     fn on_timer(&self, _timer: switchyard::TimerId) {}
/// }
///
/// let download = Download;
/// let event: Box<dyn Event> = Box::new(Progress::new((5, 10)));
///
/// let handled = dispatch(event)
///     .on_method::<Progress, _, _>(&download, Download::on_progress)
///     .on_method::<TimerEvent, _, _>(&download, Download::on_timer)
///     .handled();
///
/// assert!(handled);
/// ```
#[must_use]
pub fn dispatch(event: Box<dyn Event>) -> Dispatch {
    Dispatch { event: Some(event) }
}

/// A chain of candidate event kinds, created by [`dispatch()`].
///
/// The first link whose kind matches consumes the event and forwards its values; all later
/// links are skipped. Finish the chain with [`handled()`][Self::handled] or
/// [`into_unhandled()`][Self::into_unhandled].
#[must_use = "a dispatch chain does nothing unless its outcome is inspected"]
pub struct Dispatch {
    // `None` once a link has consumed the event.
    event: Option<Box<dyn Event>>,
}

impl Dispatch {
    /// Forwards the values of an event of kind `E` to the function `f`.
    pub fn on<E, F>(mut self, f: F) -> Self
    where
        E: Payload,
        E::Values: Apply<F, Output = ()>,
    {
        if let Some(values) = self.take_values::<E>() {
            values.apply(f);
        }

        self
    }

    /// Forwards the values of an event of kind `E` to `method` called on `target`.
    pub fn on_method<E, T, F>(mut self, target: &T, method: F) -> Self
    where
        E: Payload,
        T: ?Sized,
        E::Values: ApplyMethod<T, F, Output = ()>,
    {
        if let Some(values) = self.take_values::<E>() {
            values.apply_method(target, method);
        }

        self
    }

    /// Whether one of the links matched the event.
    #[must_use]
    pub fn handled(self) -> bool {
        self.event.is_none()
    }

    /// Returns the event if none of the links matched it.
    #[must_use]
    pub fn into_unhandled(self) -> Option<Box<dyn Event>> {
        self.event
    }

    fn take_values<E: Payload>(&mut self) -> Option<E::Values> {
        if !self.event.as_deref().is_some_and(<dyn Event>::is::<E>) {
            return None;
        }

        let event = self.event.take()?;

        // The kind was checked above, so the conversion cannot fail.
        event.downcast::<E>().ok().map(|event| event.into_values())
    }
}

impl fmt::Debug for Dispatch {
    #[cfg_attr(test, mutants::skip)] // No API contract for debug output.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatch")
            .field("pending", &self.event.as_deref().map(<dyn Event>::name))
            .finish()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::cell::RefCell;

    use super::*;
    use crate::simple_event;

    simple_event! {
        Opened(u32, String)
    }

    simple_event! {
        Closed(u32)
    }

    simple_event! {
        Stalled()
    }

    #[derive(Default)]
    struct Recorder {
        calls: RefCell<Vec<String>>,
    }

    impl Recorder {
        fn on_opened(&self, id: u32, path: String) {
            self.calls.borrow_mut().push(format!("opened {id} {path}"));
        }

        fn on_closed(&self, id: u32) {
            self.calls.borrow_mut().push(format!("closed {id}"));
        }
    }

    #[test]
    fn apply_expands_tuples() {
        assert_eq!(().apply(|| 1), 1);
        assert_eq!((1,).apply(|a: i32| a * 10), 10);
        assert_eq!(
            (1, 2, 3, 4, 5, 6, 7, 8)
                .apply(|a: i32, b: i32, c: i32, d: i32, e: i32, f: i32, g: i32, h: i32| {
                    a + b + c + d + e + f + g + h
                }),
            36
        );
    }

    #[test]
    fn apply_moves_values() {
        let text = ("moved".to_string(), vec![1_u8, 2]).apply(|s: String, v: Vec<u8>| {
            format!("{s}:{}", v.len())
        });

        assert_eq!(text, "moved:2");
    }

    #[test]
    fn invokes_only_matching_method() {
        let recorder = Recorder::default();

        let handled = dispatch(Box::new(Opened::new((1, "a.txt".to_string()))))
            .on_method::<Opened, _, _>(&recorder, Recorder::on_opened)
            .on_method::<Closed, _, _>(&recorder, Recorder::on_closed)
            .handled();

        assert!(handled);
        assert_eq!(*recorder.calls.borrow(), vec!["opened 1 a.txt".to_string()]);

        let handled = dispatch(Box::new(Closed::new((2,))))
            .on_method::<Opened, _, _>(&recorder, Recorder::on_opened)
            .on_method::<Closed, _, _>(&recorder, Recorder::on_closed)
            .handled();

        assert!(handled);
        assert_eq!(recorder.calls.borrow().len(), 2);
        assert_eq!(recorder.calls.borrow()[1], "closed 2");
    }

    #[test]
    fn unknown_kind_is_unhandled() {
        let recorder = Recorder::default();

        let unhandled = dispatch(Box::new(Stalled::new(())))
            .on_method::<Opened, _, _>(&recorder, Recorder::on_opened)
            .on_method::<Closed, _, _>(&recorder, Recorder::on_closed)
            .into_unhandled()
            .expect("no link matches a third kind");

        assert!(unhandled.is::<Stalled>());
        assert!(recorder.calls.borrow().is_empty());
    }

    #[test]
    fn first_matching_link_wins() {
        let mut hits = Vec::new();

        let handled = dispatch(Box::new(Closed::new((9,))))
            .on::<Closed, _>(|id: u32| hits.push(("first", id)))
            .on::<Closed, _>(|id: u32| hits.push(("second", id)))
            .handled();

        assert!(handled);
        assert_eq!(hits, vec![("first", 9)]);
    }

    #[test]
    fn closures_receive_values() {
        let mut seen = None;

        let handled = dispatch(Box::new(Opened::new((4, "b.bin".to_string()))))
            .on::<Closed, _>(|_id: u32| {})
            .on::<Opened, _>(|id: u32, path: String| seen = Some((id, path)))
            .handled();

        assert!(handled);
        assert_eq!(seen, Some((4, "b.bin".to_string())));
    }

    #[test]
    fn empty_chain_leaves_event_unhandled() {
        assert!(!dispatch(Box::new(Stalled::new(()))).handled());
    }
}
