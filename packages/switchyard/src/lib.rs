#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

//! Single-threaded event loop with typed events, handler lifecycle management and timers.
//!
//! An [`EventLoop`] owns one worker thread. Handlers bound to the loop receive events posted
//! from any thread, and expiries of the timers they arm, as calls to
//! [`EventHandler::on_event()`] on that worker thread. Inside the callback,
//! [`dispatch()`] routes the type-erased [`Event`] to strongly typed methods, expanding the
//! event's values into positional arguments.
//!
//! # Quick start
//!
//! ```rust
//! use std::sync::mpsc;
//! use std::time::Duration;
//!
//! use switchyard::{
//!     Event, EventHandler, EventLoop, HandlerCore, TimerEvent, TimerId, TimerMode, dispatch,
//!     simple_event,
//! };
//!
//! simple_event! {
//!     /// A chunk of a download arrived: (chunk index, byte count).
//!     pub ChunkReceived(u32, usize)
//! }
//!
//! struct Download {
//!     core: HandlerCore,
//!     log: mpsc::Sender<String>,
//! }
//!
//! impl Download {
//!     fn on_chunk(&self, index: u32, bytes: usize) {
//!         self.log.send(format!("chunk {index}: {bytes} bytes")).unwrap();
//!     }
//!
//!     fn on_timer(&self, _timer: TimerId) {
//!         self.log.send("timeout".to_string()).unwrap();
//!     }
//! }
//!
//! impl EventHandler for Download {
//!     fn on_event(&self, event: Box<dyn Event>) {
//!         let handled = dispatch(event)
//!             .on_method::<ChunkReceived, _, _>(self, Self::on_chunk)
//!             .on_method::<TimerEvent, _, _>(self, Self::on_timer)
//!             .handled();
//!
//!         assert!(handled);
//!     }
//! }
//!
//! impl Drop for Download {
//!     fn drop(&mut self) {
//!         // Required before the handler goes away.
//!         self.core.remove_handler();
//!     }
//! }
//!
//! let event_loop = EventLoop::new()?;
//! let (tx, rx) = mpsc::channel();
//!
//! let download = event_loop.create_handler(|core| Download { core, log: tx });
//! download.core.send_event::<ChunkReceived>((0, 4096));
//! download.core.add_timer(Duration::from_millis(20), TimerMode::OneShot);
//!
//! assert_eq!(rx.recv().unwrap(), "chunk 0: 4096 bytes");
//! assert_eq!(rx.recv().unwrap(), "timeout");
//! # Ok::<(), switchyard::Error>(())
//! ```
//!
//! # Ordering
//!
//! * Events posted to one handler are delivered in the order they were posted, even when
//!   posted from different threads.
//! * Expired timers are always delivered before queued events. Timers that expire at the same
//!   instant fire in the order they were armed.
//! * There is no ordering between events posted to different handlers beyond the single
//!   queue of the loop.
//!
//! # Handler removal
//!
//! Every handler that has used its loop must call [`HandlerCore::remove_handler()`] before
//! it is destroyed, normally from its `Drop` implementation. Removal discards the handler's
//! queued events and timers and waits for a running callback of the handler to finish, after
//! which the callback is never invoked again. Dropping a handler without removal aborts the
//! process.
//!
//! # Logging
//!
//! The crate emits `tracing` events: lifecycle at debug level, per-event traffic at trace
//! level and fatal misuse at error level. No subscriber is installed by the crate.

mod dispatch;
mod error;
mod event;
mod event_loop;
mod handler;
pub mod sync;
mod thread;
mod timer;
mod worker;

pub use dispatch::*;
pub use error::*;
pub use event::*;
pub use event_loop::{EventLoop, LoopBuilder};
pub use handler::{EventHandler, HandlerCore, HandlerId, HandlerState};
pub(crate) use handler::HandlerSlot;
pub use thread::*;
pub use timer::{TimerId, TimerMode};
pub(crate) use timer::TimerSet;
