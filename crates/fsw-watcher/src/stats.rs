//! Delivery statistics with atomic counters.
//!
//! [`DeliveryStats`] is written by the serial context while batches are
//! delivered and read from any thread through [`DeliveryStats::snapshot`].
//! All counters use [`Relaxed`](std::sync::atomic::Ordering::Relaxed)
//! ordering; they are informational and impose no ordering on delivery.

use std::sync::atomic::{AtomicU64, Ordering};

use fsw_core::EventId;
use serde::{Deserialize, Serialize};

/// Marker for "no event delivered yet" in [`DeliveryStats::last_event_id`].
const NO_EVENT: u64 = u64::MAX;

/// Atomic delivery counters for one watcher.
///
/// # Examples
///
/// ```
/// use fsw_core::EventId;
/// use fsw_watcher::DeliveryStats;
///
/// let stats = DeliveryStats::new();
/// stats.record_batch();
/// stats.record_event(EventId::new(12));
///
/// let snap = stats.snapshot();
/// assert_eq!(snap.batches, 1);
/// assert_eq!(snap.last_event_id, Some(EventId::new(12)));
/// ```
#[derive(Debug)]
pub struct DeliveryStats {
    batches: AtomicU64,
    events: AtomicU64,
    handler_panics: AtomicU64,
    dropped_below_resume: AtomicU64,
    last_event_id: AtomicU64,
}

impl Default for DeliveryStats {
    fn default() -> Self {
        Self {
            batches: AtomicU64::new(0),
            events: AtomicU64::new(0),
            handler_panics: AtomicU64::new(0),
            dropped_below_resume: AtomicU64::new(0),
            last_event_id: AtomicU64::new(NO_EVENT),
        }
    }
}

impl DeliveryStats {
    /// Creates a new [`DeliveryStats`] with all counters at zero.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a batch taken off the serial context's queue.
    #[inline]
    pub fn record_batch(&self) {
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts an event handed to the handler and remembers its id.
    #[inline]
    pub fn record_event(&self, id: EventId) {
        self.events.fetch_add(1, Ordering::Relaxed);
        if !id.is_since_now() {
            self.last_event_id.store(id.as_u64(), Ordering::Relaxed);
        }
    }

    /// Counts a handler panic.
    #[inline]
    pub fn record_handler_panic(&self) {
        self.handler_panics.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a replayed notification older than the resume point.
    #[inline]
    pub fn record_dropped_below_resume(&self) {
        self.dropped_below_resume.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the id of the most recently delivered event.
    #[inline]
    #[must_use]
    pub fn last_event_id(&self) -> Option<EventId> {
        match self.last_event_id.load(Ordering::Relaxed) {
            NO_EVENT => None,
            id => Some(EventId::new(id)),
        }
    }

    /// Returns a point-in-time copy of the counters.
    #[must_use]
    pub fn snapshot(&self) -> DeliverySnapshot {
        DeliverySnapshot {
            batches: self.batches.load(Ordering::Relaxed),
            events: self.events.load(Ordering::Relaxed),
            handler_panics: self.handler_panics.load(Ordering::Relaxed),
            dropped_below_resume: self.dropped_below_resume.load(Ordering::Relaxed),
            last_event_id: self.last_event_id(),
        }
    }
}

/// A point-in-time view of [`DeliveryStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliverySnapshot {
    /// Batches processed.
    pub batches: u64,
    /// Events handed to the handler.
    pub events: u64,
    /// Batches cut short by a panicking handler.
    pub handler_panics: u64,
    /// Replayed notifications dropped for being older than the resume point.
    pub dropped_below_resume: u64,
    /// Id of the most recently delivered event.
    pub last_event_id: Option<EventId>,
}
