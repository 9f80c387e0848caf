//! The notification-source boundary.
//!
//! A [`NotificationSource`] turns a [`StreamRequest`] into a
//! [`SourceStream`]. The watcher binds a [`BatchDispatcher`] to the stream,
//! activates it, and later deactivates and releases it. Every one of these
//! calls is made from the watcher's serial context.
//!
//! Sources deliver on their own threads by calling
//! [`BatchDispatcher::dispatch`] (or [`BatchDispatcher::dispatch_parallel`]
//! with the raw parallel arrays). Dispatching only enqueues the batch; it
//! never blocks on the handler.
//!
//! Two sources ship with the crate:
//!
//! - [`MemorySource`] - an in-process journal with replay and fault injection
//! - [`NotifySource`] - the platform backend of the `notify` crate

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use camino::Utf8PathBuf;
use fsw_core::EventId;

use crate::events::{BatchError, RawBatch};

mod memory;
mod notify_backend;

pub use memory::{ControlCall, FaultPoint, MemorySource};
pub use notify_backend::NotifySource;

/// Options passed to [`NotificationSource::create`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Request per-item notifications instead of per-directory ones.
    pub file_events: bool,
}

impl StreamOptions {
    /// Subscriptions are always recursive.
    #[inline]
    #[must_use]
    pub const fn recursive(self) -> bool {
        true
    }
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self { file_events: true }
    }
}

/// A subscription request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    /// Roots to watch. Existence is not checked.
    pub paths: Vec<Utf8PathBuf>,
    /// Replay everything from this id (inclusive). `None` means "from now".
    pub since: Option<EventId>,
    /// Upper bound on source-side coalescing.
    pub latency: Duration,
    /// Stream options.
    pub options: StreamOptions,
}

/// Errors raised while unmarshalling or enqueueing a delivered batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DispatchError {
    /// The watcher's serial context is gone.
    #[error("watcher is no longer accepting batches")]
    Closed,

    /// The delivered arrays could not be turned into a batch.
    #[error(transparent)]
    Malformed(#[from] BatchError),
}

type DispatchFn = dyn Fn(RawBatch) -> Result<(), DispatchError> + Send + Sync;

/// A cloneable handle sources use to hand batches to a watcher.
#[derive(Clone)]
pub struct BatchDispatcher {
    inner: Arc<DispatchFn>,
}

impl BatchDispatcher {
    /// Wraps a delivery function.
    pub fn new<F>(deliver: F) -> Self
    where
        F: Fn(RawBatch) -> Result<(), DispatchError> + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(deliver),
        }
    }

    /// Enqueues a batch. Empty batches are dropped.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Closed`] once the watcher has stopped.
    pub fn dispatch(&self, batch: RawBatch) -> Result<(), DispatchError> {
        if batch.is_empty() {
            return Ok(());
        }
        (self.inner)(batch)
    }

    /// Unmarshals parallel arrays and enqueues the resulting batch.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::Malformed`] if the arrays differ in length
    /// and [`DispatchError::Closed`] once the watcher has stopped.
    pub fn dispatch_parallel(
        &self,
        paths: Vec<PathBuf>,
        flags: &[u32],
        ids: &[u64],
    ) -> Result<(), DispatchError> {
        self.dispatch(RawBatch::from_parallel(paths, flags, ids)?)
    }
}

impl fmt::Debug for BatchDispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchDispatcher").finish_non_exhaustive()
    }
}

/// Errors reported by a notification source.
#[derive(Debug, thiserror::Error)]
pub enum SourceError {
    /// The platform backend failed.
    #[error("platform watcher error: {0}")]
    Notify(#[from] notify::Error),

    /// `activate` was called before a dispatcher was bound.
    #[error("stream has no dispatcher bound")]
    NotBound,

    /// `activate` was called on an active stream.
    #[error("stream is already active")]
    AlreadyActive,

    /// The stream was already invalidated.
    #[error("stream has been invalidated")]
    Invalidated,

    /// The journal no longer holds history from the requested id.
    #[error("history since event {0} is no longer available")]
    HistoryUnavailable(EventId),

    /// The source cannot replay history at all.
    #[error("source cannot replay past events")]
    ReplayUnsupported,

    /// The source refused the request.
    #[error("{0}")]
    Rejected(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A provider of raw change notifications.
pub trait NotificationSource: Send + 'static {
    /// Creates an inactive stream for `request`.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::HistoryUnavailable`] if `request.since` can no
    /// longer be replayed, or any other error if the subscription is refused.
    fn create(&mut self, request: &StreamRequest) -> Result<Box<dyn SourceStream>, SourceError>;

    /// Resolves a wall-clock time to the first id recorded at or after it.
    ///
    /// Sources without a persistent journal return `None`.
    fn event_id_for_time(&self, _time: SystemTime) -> Option<EventId> {
        None
    }

    /// Short name used in logs.
    fn name(&self) -> &'static str;
}

/// A stream created by a [`NotificationSource`].
///
/// Control calls arrive in the order `bind`, `activate`,
/// `deactivate_and_invalidate`, `release`, all from the same thread.
pub trait SourceStream: Send {
    /// Attaches the dispatcher batches must be delivered to.
    fn bind(&mut self, dispatcher: BatchDispatcher);

    /// Starts delivery, replaying history first when `since` was given.
    ///
    /// # Errors
    ///
    /// Returns [`SourceError::NotBound`] without a dispatcher and any
    /// backend error that prevents delivery from starting.
    fn activate(&mut self) -> Result<(), SourceError>;

    /// Stops delivery. No batch is dispatched after this returns.
    ///
    /// # Errors
    ///
    /// Returns the backend error if delivery could not be halted cleanly.
    fn deactivate_and_invalidate(&mut self) -> Result<(), SourceError>;

    /// Releases the stream.
    ///
    /// # Errors
    ///
    /// Returns the backend error if resources could not be released.
    fn release(self: Box<Self>) -> Result<(), SourceError>;
}
