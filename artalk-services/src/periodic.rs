//! A small interruptible-sleep primitive shared by the periodic services
//! (RTMP sending, ZIP sending, the RT ager): wait up to an interval, but
//! wake immediately on `stop()`.
//!
//! The reference implementation uses a blocking-queue-with-timeout or a
//! `threading.Event.wait(timeout)` per service; a condvar plus a boolean
//! flag is the idiomatic std equivalent.

use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

struct Inner {
    stop: Mutex<bool>,
    cvar: Condvar,
}

/// Runs `tick` every `interval` on its own thread until `stop()` is called.
/// `tick` also fires once more, synchronously, whenever a caller invokes
/// the owning service's on-demand trigger method directly (`force_send`,
/// `age_now`) rather than through this worker.
pub(crate) struct PeriodicWorker {
    inner: Arc<Inner>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PeriodicWorker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                stop: Mutex::new(false),
                cvar: Condvar::new(),
            }),
            handle: Mutex::new(None),
        }
    }

    /// Start the loop if it isn't already running. `tick` runs after each
    /// wait, including the final wait right before a `stop()`-triggered
    /// wakeup (matching the reference's "check before sleeping again").
    pub fn start(&self, interval: Duration, name: &'static str, mut tick: impl FnMut() + Send + 'static) {
        let mut handle_guard = self.handle.lock().unwrap();
        if handle_guard.is_some() {
            return;
        }
        *self.inner.stop.lock().unwrap() = false;
        let inner = self.inner.clone();
        *handle_guard = Some(std::thread::spawn(move || loop {
            let stop = inner.stop.lock().unwrap();
            let (stop, timed_out) = inner.cvar.wait_timeout_while(stop, interval, |stop| !*stop).unwrap();
            let should_stop = *stop;
            drop(stop);
            if should_stop {
                break;
            }
            debug_assert!(timed_out.timed_out());
            tick();
        }));
        log::debug!("{name}: periodic worker started");
    }

    /// Signal the loop to stop and join it. Idempotent.
    pub fn stop(&self) {
        let mut handle_guard = self.handle.lock().unwrap();
        let Some(handle) = handle_guard.take() else {
            return;
        };
        *self.inner.stop.lock().unwrap() = true;
        self.inner.cvar.notify_all();
        let _ = handle.join();
    }
}
