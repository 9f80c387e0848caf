//! In-process notification source.
//!
//! [`MemorySource`] keeps a journal of emitted notifications with
//! monotonically increasing ids, replays it to streams created with a
//! `since` id, and forwards new notifications to every active stream whose
//! roots contain the path. Latency is ignored; every emit is delivered
//! immediately as its own batch.
//!
//! It also records every control call together with the name of the thread
//! that made it, and can be told to fail the next call at a given point.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use camino::{Utf8Path, Utf8PathBuf};
use fsw_core::{EventFlags, EventId};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use super::{BatchDispatcher, NotificationSource, SourceError, SourceStream, StreamRequest};
use crate::events::{RawBatch, RawNotification};

/// A control call on which a failure can be injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultPoint {
    /// [`NotificationSource::create`].
    Create,
    /// [`SourceStream::activate`].
    Activate,
    /// [`SourceStream::deactivate_and_invalidate`].
    Deactivate,
    /// [`SourceStream::release`].
    Release,
}

impl FaultPoint {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Activate => "activate",
            Self::Deactivate => "deactivate",
            Self::Release => "release",
        }
    }
}

impl fmt::Display for FaultPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A control call recorded by [`MemorySource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlCall {
    /// `create`, `bind`, `activate`, `deactivate`, or `release`.
    pub op: &'static str,
    /// Name of the calling thread.
    pub thread: Option<String>,
}

struct Entry {
    notification: RawNotification,
    recorded_at: SystemTime,
}

struct ActiveStream {
    key: u64,
    roots: Vec<Utf8PathBuf>,
    file_events: bool,
    dispatcher: BatchDispatcher,
}

impl ActiveStream {
    fn covers(&self, path: &Utf8Path) -> bool {
        self.roots.iter().any(|root| path.starts_with(root))
    }

    /// Rewrites a journal entry the way this stream would observe it.
    fn view(&self, notification: &RawNotification) -> RawNotification {
        if self.file_events {
            return notification.clone();
        }
        let dir = notification
            .path
            .parent()
            .filter(|parent| self.covers(parent))
            .unwrap_or(&notification.path);
        RawNotification::new(dir, EventFlags::empty(), notification.event_id)
    }

    fn send(&self, batch: RawBatch) {
        if let Err(err) = self.dispatcher.dispatch(batch) {
            tracing::debug!(stream = self.key, error = %err, "Dropping batch for closed stream");
        }
    }
}

struct Journal {
    entries: Vec<Entry>,
    next_id: EventId,
    history_floor: EventId,
    streams: Vec<ActiveStream>,
    next_key: u64,
    faults: FxHashMap<FaultPoint, String>,
    calls: Vec<ControlCall>,
}

impl Journal {
    fn record_call(&mut self, op: &'static str) {
        let thread = std::thread::current().name().map(str::to_owned);
        self.calls.push(ControlCall { op, thread });
    }

    fn take_fault(&mut self, point: FaultPoint) -> Result<(), SourceError> {
        match self.faults.remove(&point) {
            Some(reason) => Err(SourceError::Rejected(reason)),
            None => Ok(()),
        }
    }

    fn allocate_id(&mut self) -> EventId {
        let id = self.next_id;
        self.next_id = id.next();
        id
    }

    fn latest_id(&self) -> Option<EventId> {
        self.entries.last().map(|entry| entry.notification.event_id)
    }

    fn broadcast(&self, notifications: &[RawNotification]) {
        for stream in &self.streams {
            let batch: RawBatch = notifications
                .iter()
                .filter(|n| stream.covers(&n.path))
                .map(|n| stream.view(n))
                .collect();
            stream.send(batch);
        }
    }
}

/// An in-process notification source backed by a journal.
///
/// Clones share the same journal, so a test can keep one handle to emit
/// notifications while a watcher owns another.
///
/// Batches are dispatched while the journal lock is held, which keeps the
/// delivery order of concurrent emits identical to their id order.
///
/// # Examples
///
/// ```
/// use fsw_core::{EventFlags, EventId};
/// use fsw_watcher::MemorySource;
///
/// let source = MemorySource::new();
/// let first = source.emit("/w/a", EventFlags::ITEM_CREATED);
/// let second = source.emit("/w/a", EventFlags::ITEM_MODIFIED);
/// assert_eq!(first, EventId::new(1));
/// assert!(second > first);
/// ```
#[derive(Clone)]
pub struct MemorySource {
    journal: Arc<Mutex<Journal>>,
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::starting_at(EventId::new(1))
    }
}

impl fmt::Debug for MemorySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let journal = self.journal.lock();
        f.debug_struct("MemorySource")
            .field("entries", &journal.entries.len())
            .field("next_id", &journal.next_id)
            .field("active_streams", &journal.streams.len())
            .finish_non_exhaustive()
    }
}

impl MemorySource {
    /// Creates an empty journal whose first id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty journal whose first id is `first`.
    #[must_use]
    pub fn starting_at(first: EventId) -> Self {
        Self {
            journal: Arc::new(Mutex::new(Journal {
                entries: Vec::new(),
                next_id: first,
                history_floor: first,
                streams: Vec::new(),
                next_key: 0,
                faults: FxHashMap::default(),
                calls: Vec::new(),
            })),
        }
    }

    /// Records one notification and delivers it to every covering stream.
    pub fn emit(&self, path: impl Into<Utf8PathBuf>, flags: EventFlags) -> EventId {
        self.emit_batch([(path.into(), flags)])
            .first()
            .copied()
            .unwrap_or(EventId::SINCE_NOW)
    }

    /// Records several notifications and delivers them as one batch per
    /// stream. Returns the assigned ids in order.
    pub fn emit_batch<P>(&self, items: impl IntoIterator<Item = (P, EventFlags)>) -> Vec<EventId>
    where
        P: Into<Utf8PathBuf>,
    {
        let mut journal = self.journal.lock();
        let now = SystemTime::now();
        let notifications: Vec<RawNotification> = items
            .into_iter()
            .map(|(path, flags)| RawNotification::new(path, flags, journal.allocate_id()))
            .collect();
        journal.entries.extend(notifications.iter().map(|n| Entry {
            notification: n.clone(),
            recorded_at: now,
        }));
        journal.broadcast(&notifications);
        notifications.into_iter().map(|n| n.event_id).collect()
    }

    /// Delivers raw parallel arrays to every active stream without touching
    /// the journal. Used to simulate out-of-order or malformed deliveries.
    ///
    /// # Errors
    ///
    /// Returns the first dispatch error.
    pub fn deliver_raw(
        &self,
        paths: &[&str],
        flags: &[u32],
        ids: &[u64],
    ) -> Result<(), super::DispatchError> {
        let journal = self.journal.lock();
        for stream in &journal.streams {
            let owned = paths.iter().map(std::path::PathBuf::from).collect();
            stream.dispatcher.dispatch_parallel(owned, flags, ids)?;
        }
        Ok(())
    }

    /// Simulates the journal's ids wrapping around.
    ///
    /// Every active stream receives an `EVENT_IDS_WRAPPED` notification for
    /// each of its roots, recorded history is discarded, and numbering
    /// restarts at 1.
    pub fn wrap_ids(&self) {
        let mut journal = self.journal.lock();
        let id = journal.allocate_id();
        for stream in &journal.streams {
            let batch: RawBatch = stream
                .roots
                .iter()
                .map(|root| {
                    RawNotification::new(
                        root.clone(),
                        EventFlags::EVENT_IDS_WRAPPED | EventFlags::MUST_SCAN_SUBDIRS,
                        id,
                    )
                })
                .collect();
            stream.send(batch);
        }
        journal.entries.clear();
        journal.next_id = EventId::new(1);
        journal.history_floor = EventId::new(1);
    }

    /// Discards history below `floor`. Streams created with an older `since`
    /// fail with [`SourceError::HistoryUnavailable`].
    pub fn truncate_history(&self, floor: EventId) {
        let mut journal = self.journal.lock();
        journal.entries.retain(|entry| entry.notification.event_id >= floor);
        journal.history_floor = journal.history_floor.max(floor);
    }

    /// Makes the next call at `point` fail with [`SourceError::Rejected`].
    pub fn fail_next(&self, point: FaultPoint, reason: impl Into<String>) {
        self.journal.lock().faults.insert(point, reason.into());
    }

    /// Returns every control call made so far, in order.
    #[must_use]
    pub fn control_calls(&self) -> Vec<ControlCall> {
        self.journal.lock().calls.clone()
    }

    /// Returns the number of active streams.
    #[must_use]
    pub fn active_streams(&self) -> usize {
        self.journal.lock().streams.len()
    }

    /// Returns the id the next notification will get.
    #[must_use]
    pub fn next_id(&self) -> EventId {
        self.journal.lock().next_id
    }
}

impl NotificationSource for MemorySource {
    fn create(&mut self, request: &StreamRequest) -> Result<Box<dyn SourceStream>, SourceError> {
        let mut journal = self.journal.lock();
        journal.record_call("create");
        journal.take_fault(FaultPoint::Create)?;
        if let Some(since) = request.since {
            if since < journal.history_floor {
                return Err(SourceError::HistoryUnavailable(since));
            }
        }
        let key = journal.next_key;
        journal.next_key += 1;
        Ok(Box::new(MemoryStream {
            journal: Arc::clone(&self.journal),
            key,
            request: request.clone(),
            dispatcher: None,
            active: false,
            invalidated: false,
        }))
    }

    fn event_id_for_time(&self, time: SystemTime) -> Option<EventId> {
        let journal = self.journal.lock();
        let id = journal
            .entries
            .iter()
            .find(|entry| entry.recorded_at >= time)
            .map_or(journal.next_id, |entry| entry.notification.event_id);
        Some(id)
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}

struct MemoryStream {
    journal: Arc<Mutex<Journal>>,
    key: u64,
    request: StreamRequest,
    dispatcher: Option<BatchDispatcher>,
    active: bool,
    invalidated: bool,
}

impl MemoryStream {
    fn detach(&self, journal: &mut Journal) {
        journal.streams.retain(|stream| stream.key != self.key);
    }
}

impl SourceStream for MemoryStream {
    fn bind(&mut self, dispatcher: BatchDispatcher) {
        self.journal.lock().record_call("bind");
        self.dispatcher = Some(dispatcher);
    }

    fn activate(&mut self) -> Result<(), SourceError> {
        let mut journal = self.journal.lock();
        journal.record_call("activate");
        journal.take_fault(FaultPoint::Activate)?;
        if self.invalidated {
            return Err(SourceError::Invalidated);
        }
        if self.active {
            return Err(SourceError::AlreadyActive);
        }
        let dispatcher = self.dispatcher.clone().ok_or(SourceError::NotBound)?;

        let stream = ActiveStream {
            key: self.key,
            roots: self.request.paths.clone(),
            file_events: self.request.options.file_events,
            dispatcher,
        };

        if let Some(since) = self.request.since {
            let mut replay: RawBatch = journal
                .entries
                .iter()
                .map(|entry| &entry.notification)
                .filter(|n| n.event_id >= since && stream.covers(&n.path))
                .map(|n| stream.view(n))
                .collect();
            if let Some(root) = stream.roots.first() {
                let done_id = journal.latest_id().unwrap_or(since);
                replay.push(RawNotification::new(
                    root.clone(),
                    EventFlags::HISTORY_DONE,
                    done_id,
                ));
            }
            tracing::debug!(stream = self.key, since = %since, events = replay.len(), "Replaying history");
            stream.send(replay);
        }

        journal.streams.push(stream);
        self.active = true;
        Ok(())
    }

    fn deactivate_and_invalidate(&mut self) -> Result<(), SourceError> {
        let mut journal = self.journal.lock();
        journal.record_call("deactivate");
        journal.take_fault(FaultPoint::Deactivate)?;
        if self.invalidated {
            return Err(SourceError::Invalidated);
        }
        self.detach(&mut journal);
        self.active = false;
        self.invalidated = true;
        Ok(())
    }

    fn release(self: Box<Self>) -> Result<(), SourceError> {
        let mut journal = self.journal.lock();
        journal.record_call("release");
        self.detach(&mut journal);
        journal.take_fault(FaultPoint::Release)
    }
}
