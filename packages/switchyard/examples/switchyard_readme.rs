//! Example demonstrating a handler that receives typed events and timer expiries.
//!
//! A download handler receives chunk notifications from several producer threads and uses a
//! repeating timer to report progress until the download completes.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

use switchyard::{
    Event, EventHandler, EventLoop, HandlerCore, TimerEvent, TimerId, TimerMode, dispatch,
    simple_event,
};
use tracing::info;

simple_event! {
    /// A chunk arrived: (producer, byte count).
    ChunkReceived(u32, u64)
}

simple_event! {
    /// All producers have finished.
    Completed()
}

struct Download {
    core: HandlerCore,
    total: AtomicU64,
    done: mpsc::Sender<u64>,
}

impl Download {
    fn on_chunk(&self, producer: u32, bytes: u64) {
        let total = self.total.fetch_add(bytes, Ordering::Relaxed) + bytes;
        info!(producer, bytes, total, "chunk received");
    }

    fn on_progress(&self, _timer: TimerId) {
        info!(total = self.total.load(Ordering::Relaxed), "progress");
    }

    fn on_completed(&self) {
        // Removing from inside our own callback: this is the last callback we get.
        self.core.remove_handler();
        drop(self.done.send(self.total.load(Ordering::Relaxed)));
    }
}

impl EventHandler for Download {
    fn on_event(&self, event: Box<dyn Event>) {
        let unhandled = dispatch(event)
            .on_method::<ChunkReceived, _, _>(self, Self::on_chunk)
            .on_method::<TimerEvent, _, _>(self, Self::on_progress)
            .on_method::<Completed, _, _>(self, Self::on_completed)
            .into_unhandled();

        if let Some(event) = unhandled {
            info!(event = event.name(), "ignoring unexpected event");
        }
    }
}

impl Drop for Download {
    fn drop(&mut self) {
        self.core.remove_handler();
    }
}

fn main() {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let event_loop = EventLoop::builder()
        .thread_name("download-loop")
        .build()
        .expect("the worker thread can be started");

    let (tx, rx) = mpsc::channel();
    let download = event_loop.create_handler(|core| Download {
        core,
        total: AtomicU64::new(0),
        done: tx,
    });

    download
        .core
        .add_timer(Duration::from_millis(10), TimerMode::Repeating)
        .expect("the handler is not being removed");

    let producers: Vec<_> = (0..3)
        .map(|producer| {
            let download = Arc::clone(&download);
            thread::spawn(move || {
                for _ in 0..5 {
                    download
                        .core
                        .send_event::<ChunkReceived>((producer, 1024));
                    thread::sleep(Duration::from_millis(5));
                }
            })
        })
        .collect();

    for producer in producers {
        producer.join().expect("producer threads do not panic");
    }

    download.core.send_event::<Completed>(());

    let total = rx.recv().expect("the download reports completion");
    println!("Downloaded {total} bytes");

    assert_eq!(total, 3 * 5 * 1024);
}
