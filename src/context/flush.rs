//! # Background Flush
//!
//! A worker thread that commits every open data file at a fixed interval.
//! It holds only a weak reference to the schema context, so it never keeps a
//! dropped database alive, and it wakes early when asked to stop.

use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use eyre::{Result, WrapErr};
use parking_lot::{Condvar, Mutex, MutexGuard};
use tracing::{debug, warn};

use super::SchemaContext;

#[derive(Debug, Default)]
struct Signal {
    stopped: Mutex<bool>,
    wake: Condvar,
}

#[derive(Debug)]
pub struct FlushWorker {
    signal: Arc<Signal>,
    thread: Option<JoinHandle<()>>,
}

impl FlushWorker {
    pub fn spawn(context: Weak<SchemaContext>, interval: Duration) -> Result<Self> {
        let signal = Arc::new(Signal::default());
        let worker_signal = Arc::clone(&signal);

        let thread = thread::Builder::new()
            .name("quarry-flush".into())
            .spawn(move || Self::run(context, &worker_signal, interval))
            .wrap_err("failed to spawn background flush thread")?;

        Ok(Self {
            signal,
            thread: Some(thread),
        })
    }

    fn run(context: Weak<SchemaContext>, signal: &Signal, interval: Duration) {
        let mut stopped = signal.stopped.lock();
        loop {
            if *stopped {
                break;
            }
            signal.wake.wait_for(&mut stopped, interval);
            if *stopped {
                break;
            }

            let Some(context) = context.upgrade() else {
                break;
            };
            MutexGuard::unlocked(&mut stopped, || {
                if let Err(err) = context.commit() {
                    warn!(error = %err, "background flush failed");
                }
                drop(context);
            });
        }
        debug!("background flush stopped");
    }

    /// Signals the worker and waits for it to exit. When called from the
    /// worker itself (last handle dropped during a flush) it only signals.
    pub fn stop(mut self) {
        *self.signal.stopped.lock() = true;
        self.signal.wake.notify_all();

        if let Some(thread) = self.thread.take() {
            if thread.thread().id() != thread::current().id() {
                let _ = thread.join();
            }
        }
    }
}
