// SPDX-License-Identifier: MPL-2.0

//! Single-threaded serial workers
//!
//! A [`Worker`] owns one OS thread and one piece of state that only ever lives on
//! that thread. The state is constructed on the thread itself, so it does not need to
//! be `Send`; this is what keeps the rendering context thread-affine. Everything else
//! talks to the state by posting closures, which run in FIFO order.
//!
//! Shutdown stops intake, lets already queued tasks finish, then drops the state on
//! the worker thread. Waiting for that is bounded: a worker that does not finish in
//! time is detached rather than blocking its owner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, warn};

type Task<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

/// How a worker thread ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerExit {
    /// All queued tasks ran and the state was dropped
    Completed,
    /// A task panicked; the remaining queue was discarded
    Panicked,
    /// The thread did not finish within the wait bound
    TimedOut,
}

/// Serial executor bound to a dedicated thread
pub struct Worker<S: 'static> {
    name: String,
    sender: Mutex<Option<mpsc::Sender<Task<S>>>>,
    shutdown: Arc<AtomicBool>,
    done: Mutex<Option<mpsc::Receiver<()>>>,
    handle: Mutex<Option<JoinHandle<()>>>,
    exit: Mutex<Option<WorkerExit>>,
}

/// Signals the owner when the thread body ends, including by unwinding
struct DoneGuard(mpsc::SyncSender<()>);

impl Drop for DoneGuard {
    fn drop(&mut self) {
        let _ = self.0.try_send(());
    }
}

impl<S: 'static> Worker<S> {
    /// Spawn a worker whose state is built on the new thread.
    ///
    /// Blocks until `init` has run. An `Err` from `init` is returned here and the
    /// thread exits.
    pub fn spawn<F, E>(name: &str, init: F) -> Result<Self, E>
    where
        F: FnOnce() -> Result<S, E> + Send + 'static,
        E: Send + 'static + From<String>,
    {
        let (task_tx, task_rx) = mpsc::channel::<Task<S>>();
        let (init_tx, init_rx) = mpsc::sync_channel::<Result<(), E>>(1);
        let (done_tx, done_rx) = mpsc::sync_channel::<()>(1);
        let shutdown = Arc::new(AtomicBool::new(false));

        let thread_shutdown = Arc::clone(&shutdown);
        let thread_name = name.to_string();
        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let _done = DoneGuard(done_tx);
                let mut state = match init() {
                    Ok(state) => {
                        let _ = init_tx.send(Ok(()));
                        state
                    }
                    Err(e) => {
                        thread_shutdown.store(true, Ordering::Release);
                        let _ = init_tx.send(Err(e));
                        return;
                    }
                };

                debug!(worker = %thread_name, "Worker started");
                while let Ok(task) = task_rx.recv() {
                    task(&mut state);
                }
                drop(state);
                debug!(worker = %thread_name, "Worker finished");
            })
            .map_err(|e| E::from(format!("Failed to spawn worker {}: {}", name, e)))?;

        match init_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = handle.join();
                return Err(e);
            }
            Err(_) => {
                let _ = handle.join();
                return Err(E::from(format!("Worker {} died during initialization", name)));
            }
        }

        Ok(Self {
            name: name.to_string(),
            sender: Mutex::new(Some(task_tx)),
            shutdown,
            done: Mutex::new(Some(done_rx)),
            handle: Mutex::new(Some(handle)),
            exit: Mutex::new(None),
        })
    }

    /// Queue a task. Returns `false` when the worker no longer accepts work.
    pub fn execute<F>(&self, task: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        if self.is_shutdown() {
            return false;
        }
        let Ok(guard) = self.sender.lock() else {
            return false;
        };
        match guard.as_ref() {
            Some(sender) => sender.send(Box::new(task)).is_ok(),
            None => false,
        }
    }

    /// Whether the worker stopped accepting work
    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting work. Already queued tasks still run.
    pub fn shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        if let Ok(mut guard) = self.sender.lock() {
            guard.take();
        }
    }

    /// Wait up to `timeout` for the thread to finish after [`shutdown`](Self::shutdown).
    ///
    /// Calling this again after the worker ended returns the recorded exit.
    pub fn await_termination(&self, timeout: Duration) -> WorkerExit {
        if let Ok(exit) = self.exit.lock()
            && let Some(exit) = *exit
        {
            return exit;
        }

        let finished = match self.done.lock() {
            Ok(guard) => match guard.as_ref() {
                Some(done) => !matches!(
                    done.recv_timeout(timeout),
                    Err(mpsc::RecvTimeoutError::Timeout)
                ),
                None => true,
            },
            Err(_) => true,
        };

        if !finished {
            warn!(worker = %self.name, ?timeout, "Worker did not finish in time, detaching");
            return WorkerExit::TimedOut;
        }

        let handle = self.handle.lock().ok().and_then(|mut guard| guard.take());
        let exit = match handle.map(JoinHandle::join) {
            Some(Err(_)) => {
                error!(worker = %self.name, "Worker panicked");
                WorkerExit::Panicked
            }
            _ => WorkerExit::Completed,
        };

        if let Ok(mut guard) = self.exit.lock() {
            *guard = Some(exit);
        }
        exit
    }

    /// Block until every task queued before this call has run.
    ///
    /// Returns `false` on timeout or when the worker is gone.
    pub fn flush(&self, timeout: Duration) -> bool {
        let (tx, rx) = mpsc::sync_channel::<()>(1);
        if !self.execute(move |_| {
            let _ = tx.send(());
        }) {
            return false;
        }
        rx.recv_timeout(timeout).is_ok()
    }
}

impl<S: 'static> Drop for Worker<S> {
    fn drop(&mut self) {
        // Detach: the thread drains its queue and drops its state on its own.
        self.shutdown();
    }
}
