//! Deferred, debounced task execution for hub re-evaluation.
//!
//! One worker thread per hub consumes scheduling messages from a channel.
//! Scheduling while a run is already pending is coalesced; shutting the
//! worker down drops a queued-but-unstarted run (including its settle
//! delay), waits for an in-flight one to finish, and joins the thread, so
//! no task starts after `shutdown` is called.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};

enum Msg {
    Run { delay: Duration },
    Shutdown,
}

pub struct UpdateWorker {
    tx: Sender<Msg>,
    pending: Arc<AtomicBool>,
    stopping: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl UpdateWorker {
    pub fn spawn<F>(task: F) -> UpdateWorker
    where
        F: Fn() + Send + 'static,
    {
        let (tx, rx) = unbounded();
        let pending = Arc::new(AtomicBool::new(false));
        let stopping = Arc::new(AtomicBool::new(false));

        let worker_pending = pending.clone();
        let worker_stopping = stopping.clone();
        let handle = thread::spawn(move || loop {
            match rx.recv() {
                Ok(Msg::Run { delay }) => {
                    if worker_stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    if !delay.is_zero() {
                        // The settle delay doubles as a window for the
                        // shutdown message, so teardown never waits it out.
                        match rx.recv_timeout(delay) {
                            Ok(Msg::Shutdown) | Err(RecvTimeoutError::Disconnected) => break,
                            // Coalescing admits at most one queued run.
                            Ok(Msg::Run { .. }) => unreachable!("second run queued"),
                            Err(RecvTimeoutError::Timeout) => {}
                        }
                    }
                    if worker_stopping.load(Ordering::SeqCst) {
                        break;
                    }
                    worker_pending.store(false, Ordering::SeqCst);
                    task();
                }
                Ok(Msg::Shutdown) | Err(_) => break,
            }
        });

        UpdateWorker {
            tx,
            pending,
            stopping,
            handle: Mutex::new(Some(handle)),
        }
    }

    /// Schedules one task run after `delay`. A no-op while a run is already
    /// pending, so at most one run is queued at any time.
    pub fn schedule(&self, delay: Duration) {
        if self.pending.swap(true, Ordering::SeqCst) {
            return;
        }
        let _ = self.tx.send(Msg::Run { delay });
    }

    /// Cancels any queued run, waits for an in-flight one to finish, then
    /// stops the thread.
    pub fn shutdown(&self) {
        self.stopping.store(true, Ordering::SeqCst);
        let _ = self.tx.send(Msg::Shutdown);

        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
    }
}
