//! Watcher lifecycle controller.
//!
//! A [`Watcher`] owns one notification-source stream and one serial
//! execution context. Every stream control call and every batch delivery
//! runs on that context, so they never overlap and at most one batch is in
//! flight at a time.
//!
//! # Lifecycle
//!
//! ```text
//!  WatcherBuilder::build ──▶ Created ──start──▶ Running ──stop──▶ Stopped
//!                               │                  │
//!                               └──start fails──▶ Failed ◀──stop fails
//! ```
//!
//! `start` spawns the context, then (on the context) creates the stream,
//! binds a dispatcher to it and activates it. `stop` deactivates and
//! releases the stream on the context, waits for the context to drain, and
//! only then returns. No handler call begins after `stop` returns.
//!
//! # Usage
//!
//! ```
//! use fsw_core::{EventFlags, EventKind};
//! use fsw_watcher::{ClassifiedEvent, MemorySource, WatcherBuilder};
//! use std::sync::mpsc;
//!
//! # fn main() -> Result<(), fsw_watcher::WatchError> {
//! let source = MemorySource::new();
//! let (tx, rx) = mpsc::channel();
//!
//! let mut watcher = WatcherBuilder::new(["/w"])
//!     .start(source.clone(), move |event: ClassifiedEvent| {
//!         let _ = tx.send(event);
//!     })?;
//!
//! source.emit("/w/report.txt", EventFlags::ITEM_CREATED | EventFlags::IS_FILE);
//! let event = rx.recv().unwrap();
//! assert_eq!(event.kind, EventKind::Created);
//!
//! watcher.stop()?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use camino::{Utf8Path, Utf8PathBuf};
use fsw_core::{ConfigError, EventId, WatchConfig};

use crate::context::{ContextHandle, SerialContext, panic_message};
use crate::error::{ControlOp, Operation, WatchError};
use crate::events::RawBatch;
use crate::handler::EventHandler;
use crate::source::{
    BatchDispatcher, DispatchError, NotificationSource, SourceStream, StreamOptions, StreamRequest,
};
use crate::stats::{DeliverySnapshot, DeliveryStats};

/// The lifecycle state of a [`Watcher`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatcherState {
    /// Built but not started. No resources are held.
    Created,
    /// Subscribed and delivering events.
    Running,
    /// Stopped. Terminal.
    Stopped,
    /// A start or stop failed. Terminal; the watcher must be dropped.
    Failed,
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        })
    }
}

/// Where a watcher resumes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ResumePoint {
    Id(EventId),
    Time(SystemTime),
}

/// Configures and creates a [`Watcher`].
///
/// The path set is fixed once the builder is consumed.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use fsw_core::EventId;
/// use fsw_watcher::{ClassifiedEvent, MemorySource, WatcherBuilder, WatcherState};
///
/// let watcher = WatcherBuilder::new(["/projects/a", "/projects/b"])
///     .latency(Duration::from_millis(250))
///     .resume_from(EventId::new(1200))
///     .build(MemorySource::new(), |_event: ClassifiedEvent| {})
///     .unwrap();
/// assert_eq!(watcher.state(), WatcherState::Created);
/// assert_eq!(watcher.paths().len(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct WatcherBuilder {
    config: WatchConfig,
    resume: Option<ResumePoint>,
}

impl WatcherBuilder {
    /// Starts a builder for the given absolute paths.
    pub fn new<I, P>(paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Utf8PathBuf>,
    {
        Self {
            config: WatchConfig {
                paths: paths.into_iter().map(Into::into).collect(),
                ..WatchConfig::default()
            },
            resume: None,
        }
    }

    /// Starts a builder from a loaded configuration.
    #[must_use]
    pub fn from_config(config: &WatchConfig) -> Self {
        Self {
            config: config.clone(),
            resume: config.resume_from().map(ResumePoint::Id),
        }
    }

    /// Replays every event with an id at or above `id` before live events.
    ///
    /// [`EventId::SINCE_NOW`] clears any resume point.
    #[must_use]
    pub fn resume_from(mut self, id: EventId) -> Self {
        self.config.since = Some(id);
        self.resume = (!id.is_since_now()).then_some(ResumePoint::Id(id));
        self
    }

    /// Replays every event recorded at or after `time`.
    ///
    /// The time is resolved to an id by the source when the watcher starts.
    #[must_use]
    pub fn resume_from_time(mut self, time: SystemTime) -> Self {
        self.config.since = None;
        self.resume = Some(ResumePoint::Time(time));
        self
    }

    /// Bounds how long the source may coalesce changes. Zero means
    /// immediate delivery.
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.config.latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Requests per-item (`true`, the default) or per-directory events.
    #[must_use]
    pub fn file_events(mut self, enabled: bool) -> Self {
        self.config.file_events = enabled;
        self
    }

    /// Validates the configuration and creates a watcher in the
    /// [`WatcherState::Created`] state. Nothing is subscribed yet.
    ///
    /// # Errors
    ///
    /// Returns [`WatchError::InvalidConfiguration`] for an empty path set,
    /// a relative path, or an out-of-range latency.
    pub fn build<S, H>(self, source: S, handler: H) -> Result<Watcher, WatchError>
    where
        S: NotificationSource,
        H: EventHandler,
    {
        self.config.validate()?;
        Ok(Watcher {
            paths: self.config.paths.clone(),
            config: self.config,
            resume: self.resume,
            state: WatcherState::Created,
            pending: Some(Pending {
                source: Box::new(source),
                handler: Box::new(handler),
            }),
            context: None,
            stats: Arc::new(DeliveryStats::new()),
        })
    }

    /// Builds the watcher and starts it.
    ///
    /// # Errors
    ///
    /// Returns any error from [`WatcherBuilder::build`] or [`Watcher::start`].
    pub fn start<S, H>(self, source: S, handler: H) -> Result<Watcher, WatchError>
    where
        S: NotificationSource,
        H: EventHandler,
    {
        let mut watcher = self.build(source, handler)?;
        watcher.start()?;
        Ok(watcher)
    }
}

struct Pending {
    source: Box<dyn NotificationSource>,
    handler: Box<dyn EventHandler>,
}

/// State owned by the serial context.
struct Delivery {
    source: Box<dyn NotificationSource>,
    handler: Box<dyn EventHandler>,
    stream: Option<Box<dyn SourceStream>>,
    resume_floor: Option<EventId>,
    stats: Arc<DeliveryStats>,
}

impl Delivery {
    /// Creates, binds and activates the stream.
    fn open(
        &mut self,
        mut request: StreamRequest,
        resume: Option<ResumePoint>,
        dispatcher: BatchDispatcher,
    ) -> Result<(), WatchError> {
        request.since = match resume {
            None => None,
            Some(ResumePoint::Id(id)) => Some(id),
            Some(ResumePoint::Time(time)) => {
                let id = self.source.event_id_for_time(time).ok_or_else(|| {
                    ConfigError::InvalidOption {
                        option: "resume_from_time".to_owned(),
                        reason: format!("the {} source cannot resolve timestamps", self.source.name()),
                    }
                })?;
                tracing::debug!(event_id = %id, "Resolved resume time");
                Some(id)
            }
        };

        tracing::debug!(source = self.source.name(), since = ?request.since, "Creating stream");
        let mut stream = self.source.create(&request).map_err(WatchError::from_creation)?;
        stream.bind(dispatcher);

        self.resume_floor = request.since;
        if let Err(err) = stream.activate() {
            self.resume_floor = None;
            if let Err(release_err) = stream.release() {
                tracing::warn!(error = %release_err, "Failed to release stream after activation failure");
            }
            return Err(WatchError::control(ControlOp::Activate, err));
        }
        tracing::debug!("Stream activated");
        self.stream = Some(stream);
        Ok(())
    }

    /// Classifies a batch and hands each event to the handler in order.
    fn deliver(&mut self, batch: RawBatch) {
        if self.stream.is_none() {
            tracing::trace!(events = batch.len(), "Dropping batch delivered after teardown");
            return;
        }
        self.stats.record_batch();
        tracing::debug!(events = batch.len(), "Delivering batch");

        let Self {
            handler,
            resume_floor,
            stats,
            ..
        } = self;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            for raw in batch {
                if let Some(floor) = *resume_floor {
                    if raw.flags.is_history_done() || raw.flags.ids_wrapped() {
                        *resume_floor = None;
                    } else if raw.event_id < floor {
                        stats.record_dropped_below_resume();
                        tracing::trace!(event_id = %raw.event_id, floor = %floor, "Dropping replayed event below resume point");
                        continue;
                    }
                }
                if raw.flags.ids_wrapped() {
                    tracing::warn!(path = %raw.path, "Event ids wrapped; history before this point is invalid");
                }
                let event = raw.classify();
                tracing::trace!(path = %event.path, kind = %event.kind, event_id = %event.event_id, "Delivering event");
                stats.record_event(event.event_id);
                handler.handle_event(event);
            }
        }));

        if let Err(payload) = outcome {
            self.stats.record_handler_panic();
            tracing::warn!(
                panic = panic_message(payload.as_ref()),
                "Event handler panicked; dropping the rest of the batch"
            );
        }
    }

    /// Deactivates and releases the stream. Release is attempted even when
    /// deactivation fails.
    fn close(&mut self) -> Result<(), WatchError> {
        let Some(mut stream) = self.stream.take() else {
            return Ok(());
        };
        let deactivated = stream.deactivate_and_invalidate();
        let released = stream.release();
        tracing::debug!("Stream released");
        deactivated.map_err(|err| WatchError::control(ControlOp::Deactivate, err))?;
        released.map_err(|err| WatchError::control(ControlOp::Release, err))
    }
}

/// Watches a fixed set of paths and delivers classified events to a handler.
///
/// Create one with [`WatcherBuilder`]. Dropping a running watcher tears it
/// down without waiting; call [`Watcher::stop`] to get the delivery barrier.
pub struct Watcher {
    paths: Vec<Utf8PathBuf>,
    config: WatchConfig,
    resume: Option<ResumePoint>,
    state: WatcherState,
    pending: Option<Pending>,
    context: Option<SerialContext<Delivery>>,
    stats: Arc<DeliveryStats>,
}

impl fmt::Debug for Watcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Watcher")
            .field("paths", &self.paths)
            .field("state", &self.state)
            .field("last_event_id", &self.last_event_id())
            .finish_non_exhaustive()
    }
}

impl Watcher {
    /// Subscribes to the source and starts delivery.
    ///
    /// Returns once the subscription is registered. When a resume point was
    /// configured, replayed events may arrive before live ones.
    ///
    /// # Errors
    ///
    /// - [`WatchError::InvalidState`] unless the watcher is `Created`
    /// - [`WatchError::SourceCreationFailed`] or
    ///   [`WatchError::HistoryInvalidated`] if the source refused the stream
    /// - [`WatchError::SourceControlFailed`] if activation failed
    ///
    /// On error the watcher is `Failed` and holds no resources.
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context; use
    /// `tokio::task::spawn_blocking` there.
    pub fn start(&mut self) -> Result<(), WatchError> {
        if self.state != WatcherState::Created {
            return Err(WatchError::InvalidState {
                operation: Operation::Start,
                state: self.state,
            });
        }
        let Some(Pending { source, handler }) = self.pending.take() else {
            return Err(WatchError::ContextLost);
        };

        let context = match SerialContext::spawn(Delivery {
            source,
            handler,
            stream: None,
            resume_floor: None,
            stats: Arc::clone(&self.stats),
        }) {
            Ok(context) => context,
            Err(err) => {
                self.state = WatcherState::Failed;
                return Err(err);
            }
        };

        let dispatcher = dispatcher_for(context.handle());
        let request = StreamRequest {
            paths: self.paths.clone(),
            since: None,
            latency: self.config.latency(),
            options: StreamOptions {
                file_events: self.config.file_events,
            },
        };
        let resume = self.resume;

        match context
            .run_sync(Operation::Start, move |delivery: &mut Delivery| {
                delivery.open(request, resume, dispatcher)
            })
            .and_then(|opened| opened)
        {
            Ok(()) => {
                self.context = Some(context);
                self.state = WatcherState::Running;
                tracing::info!(paths = ?self.paths, latency_ms = self.config.latency_ms, "Watcher started");
                Ok(())
            }
            Err(err) => {
                context.shutdown();
                self.state = WatcherState::Failed;
                tracing::warn!(error = %err, "Watcher failed to start");
                Err(err)
            }
        }
    }

    /// Halts delivery and releases the stream.
    ///
    /// Blocks until any in-flight batch has finished. No handler call starts
    /// after this returns. Not idempotent.
    ///
    /// # Errors
    ///
    /// - [`WatchError::InvalidState`] unless the watcher is `Running`
    /// - [`WatchError::Reentrant`] when called from inside the handler
    /// - [`WatchError::SourceControlFailed`] if the source failed to
    ///   deactivate or release; the watcher is `Failed` but delivery has
    ///   still ceased
    ///
    /// # Panics
    ///
    /// Panics if called from within an asynchronous execution context; use
    /// `tokio::task::spawn_blocking` there.
    pub fn stop(&mut self) -> Result<(), WatchError> {
        if self.state != WatcherState::Running {
            return Err(WatchError::InvalidState {
                operation: Operation::Stop,
                state: self.state,
            });
        }
        let Some(context) = self.context.take() else {
            self.state = WatcherState::Failed;
            return Err(WatchError::ContextLost);
        };

        let closed = context
            .run_sync(Operation::Stop, Delivery::close)
            .and_then(|closed| closed);
        if matches!(closed, Err(WatchError::Reentrant(_))) {
            self.context = Some(context);
            return closed;
        }
        context.shutdown();

        match closed {
            Ok(()) => {
                self.state = WatcherState::Stopped;
                tracing::info!(paths = ?self.paths, last_event_id = ?self.last_event_id(), "Watcher stopped");
                Ok(())
            }
            Err(err) => {
                self.state = WatcherState::Failed;
                tracing::warn!(error = %err, "Watcher failed to stop cleanly");
                Err(err)
            }
        }
    }

    /// Returns the current lifecycle state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> WatcherState {
        self.state
    }

    /// Returns `true` while the watcher is delivering events.
    #[inline]
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.state == WatcherState::Running
    }

    /// Returns the watched paths.
    #[must_use]
    pub fn paths(&self) -> &[Utf8PathBuf] {
        &self.paths
    }

    /// Returns `true` if `path` lies under one of the watched roots.
    #[must_use]
    pub fn covers(&self, path: &Utf8Path) -> bool {
        self.paths.iter().any(|root| path.starts_with(root))
    }

    /// Returns the id of the most recently delivered event.
    ///
    /// Persist it and pass it to [`WatcherBuilder::resume_from`] to pick up
    /// where this watcher left off.
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        self.stats.last_event_id()
    }

    /// Returns a snapshot of the delivery counters.
    #[must_use]
    pub fn stats(&self) -> DeliverySnapshot {
        self.stats.snapshot()
    }
}

impl Drop for Watcher {
    fn drop(&mut self) {
        let Some(context) = self.context.take() else {
            return;
        };
        tracing::debug!(paths = ?self.paths, "Dropping running watcher without stop");
        context.handle().post(|delivery: &mut Delivery| {
            if let Err(err) = delivery.close() {
                tracing::warn!(error = %err, "Failed to close stream of dropped watcher");
            }
        });
    }
}

fn dispatcher_for(handle: ContextHandle<Delivery>) -> BatchDispatcher {
    BatchDispatcher::new(move |batch| {
        if handle.post(move |delivery: &mut Delivery| delivery.deliver(batch)) {
            Ok(())
        } else {
            Err(DispatchError::Closed)
        }
    })
}
