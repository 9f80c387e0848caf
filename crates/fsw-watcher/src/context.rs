//! Per-watcher serial execution context.
//!
//! A [`SerialContext`] owns a piece of state `S` on a dedicated thread and
//! runs jobs against it one at a time, in the order they were posted. The
//! watcher uses it to make stream control calls and batch delivery mutually
//! exclusive without exposing a lock.
//!
//! ```text
//!  caller thread ──run_sync──┐
//!                            ▼
//!  source thread ──post──▶ [ mpsc queue ] ──▶ fsw-serial-N thread (owns S)
//!                            ▲                     │
//!                            └── oneshot ack ◀─────┘
//! ```

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::{self, JoinHandle, ThreadId};

use tokio::sync::{mpsc, oneshot};

use crate::error::{Operation, WatchError};

static NEXT_CONTEXT: AtomicU64 = AtomicU64::new(0);

type Job<S> = Box<dyn FnOnce(&mut S) + Send + 'static>;

enum Message<S> {
    Run(Job<S>),
    Shutdown,
}

/// A single-threaded job queue that owns `S`.
pub(crate) struct SerialContext<S: Send + 'static> {
    tx: mpsc::UnboundedSender<Message<S>>,
    worker: Option<JoinHandle<()>>,
    worker_id: ThreadId,
}

impl<S: Send + 'static> SerialContext<S> {
    /// Spawns the worker thread and moves `state` onto it.
    pub(crate) fn spawn(state: S) -> Result<Self, WatchError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let name = format!("fsw-serial-{}", NEXT_CONTEXT.fetch_add(1, Ordering::Relaxed));
        let worker = thread::Builder::new()
            .name(name)
            .spawn(move || run_worker(state, rx))
            .map_err(WatchError::Spawn)?;
        let worker_id = worker.thread().id();
        Ok(Self {
            tx,
            worker: Some(worker),
            worker_id,
        })
    }

    /// Returns `true` when called from the worker thread.
    pub(crate) fn is_current(&self) -> bool {
        thread::current().id() == self.worker_id
    }

    /// Returns a cloneable handle for posting jobs from other threads.
    pub(crate) fn handle(&self) -> ContextHandle<S> {
        ContextHandle {
            tx: self.tx.clone(),
        }
    }

    /// Runs `job` on the worker and blocks until it has finished.
    ///
    /// Jobs queued earlier run first.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::Reentrant`] when called from the worker itself
    /// and [`WatchError::ContextLost`] if the worker exited or the job
    /// panicked.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context; use
    /// `tokio::task::spawn_blocking` there.
    pub(crate) fn run_sync<R, F>(&self, operation: Operation, job: F) -> Result<R, WatchError>
    where
        R: Send + 'static,
        F: FnOnce(&mut S) -> R + Send + 'static,
    {
        if self.is_current() {
            return Err(WatchError::Reentrant(operation));
        }
        let (ack_tx, ack_rx) = oneshot::channel();
        let message = Message::Run(Box::new(move |state: &mut S| {
            let _ = ack_tx.send(job(state));
        }));
        self.tx
            .send(message)
            .map_err(|_| WatchError::ContextLost)?;
        ack_rx.blocking_recv().map_err(|_| WatchError::ContextLost)
    }

    /// Stops the worker after every job queued so far and waits for it to
    /// exit.
    pub(crate) fn shutdown(mut self) {
        let _ = self.tx.send(Message::Shutdown);
        if let Some(worker) = self.worker.take() {
            if self.is_current() {
                return;
            }
            if worker.join().is_err() {
                tracing::warn!("Serial context thread panicked");
            }
        }
    }
}

impl<S: Send + 'static> Drop for SerialContext<S> {
    fn drop(&mut self) {
        // Detaches the worker; it exits once the queue drains.
        if self.worker.take().is_some() {
            let _ = self.tx.send(Message::Shutdown);
        }
    }
}

/// Posts jobs to a [`SerialContext`] without waiting for them.
pub(crate) struct ContextHandle<S> {
    tx: mpsc::UnboundedSender<Message<S>>,
}

impl<S> Clone for ContextHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S: Send + 'static> ContextHandle<S> {
    /// Queues `job`. Returns `false` if the worker has exited.
    pub(crate) fn post<F>(&self, job: F) -> bool
    where
        F: FnOnce(&mut S) + Send + 'static,
    {
        self.tx.send(Message::Run(Box::new(job))).is_ok()
    }
}

fn run_worker<S>(mut state: S, mut rx: mpsc::UnboundedReceiver<Message<S>>) {
    while let Some(message) = rx.blocking_recv() {
        match message {
            Message::Run(job) => {
                if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| job(&mut state))) {
                    tracing::error!(panic = panic_message(payload.as_ref()), "Job panicked on serial context");
                }
            }
            Message::Shutdown => break,
        }
    }
    tracing::trace!("Serial context exiting");
}

/// Extracts the message of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("non-string panic payload")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use parking_lot::Mutex;

    use super::*;

    #[test]
    fn test_run_sync_returns_value() {
        let context = SerialContext::spawn(41_u32).unwrap();
        let value = context
            .run_sync(Operation::Start, |n: &mut u32| {
                *n += 1;
                *n
            })
            .unwrap();
        assert_eq!(value, 42);
        context.shutdown();
    }

    #[test]
    fn test_jobs_run_in_post_order() {
        let context = SerialContext::spawn(Vec::<u32>::new()).unwrap();
        let handle = context.handle();
        for i in 0..100 {
            assert!(handle.post(move |v: &mut Vec<u32>| v.push(i)));
        }
        let seen = context.run_sync(Operation::Stop, |v: &mut Vec<u32>| v.clone()).unwrap();
        assert_eq!(seen, (0..100).collect::<Vec<_>>());
        context.shutdown();
    }

    #[test]
    fn test_jobs_run_on_named_worker() {
        let context = SerialContext::spawn(()).unwrap();
        let name = context
            .run_sync(Operation::Start, |(): &mut ()| {
                thread::current().name().map(str::to_owned)
            })
            .unwrap();
        assert!(name.unwrap().starts_with("fsw-serial-"));
        assert!(!context.is_current());
        context.shutdown();
    }

    #[test]
    fn test_panicking_job_keeps_worker_alive() {
        let context = SerialContext::spawn(0_u32).unwrap();
        let handle = context.handle();
        handle.post(|_: &mut u32| panic!("boom"));

        let lost = context.run_sync(Operation::Start, |_: &mut u32| -> u32 { panic!("again") });
        assert!(matches!(lost, Err(WatchError::ContextLost)));

        let value = context.run_sync(Operation::Stop, |n: &mut u32| *n + 7).unwrap();
        assert_eq!(value, 7);
        context.shutdown();
    }

    #[test]
    fn test_reentrant_run_sync_is_rejected() {
        let context = Arc::new(Mutex::new(None::<SerialContext<()>>));
        let spawned = SerialContext::spawn(()).unwrap();
        let handle = spawned.handle();
        *context.lock() = Some(spawned);

        let (tx, rx) = std::sync::mpsc::channel();
        let inner = Arc::clone(&context);
        handle.post(move |(): &mut ()| {
            let guard = inner.lock();
            let result = guard
                .as_ref()
                .map(|ctx| ctx.run_sync(Operation::Stop, |(): &mut ()| ()));
            let _ = tx.send(matches!(result, Some(Err(WatchError::Reentrant(Operation::Stop)))));
        });
        assert!(rx.recv_timeout(Duration::from_secs(5)).unwrap());

        if let Some(ctx) = context.lock().take() {
            ctx.shutdown();
        }
    }

    #[test]
    fn test_shutdown_drains_earlier_jobs() {
        let counter = Arc::new(AtomicUsize::new(0));
        let context = SerialContext::spawn(()).unwrap();
        let handle = context.handle();
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            handle.post(move |(): &mut ()| {
                thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }
        context.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 10);
        assert!(!handle.post(|(): &mut ()| ()));
    }

    #[test]
    fn test_panic_message() {
        let payload: Box<dyn Any + Send> = Box::new("static str");
        assert_eq!(panic_message(payload.as_ref()), "static str");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(5_u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
