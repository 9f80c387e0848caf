//! Raw and classified event types.
//!
//! # Event Flow
//!
//! ```text
//! Notification source thread
//!        │  (paths[], flags[], ids[])
//!        ▼
//!   RawBatch::from_parallel
//!        │
//!        ▼
//!   serial context: classify each RawNotification
//!        │
//!        ▼
//!   ClassifiedEvent handed to the EventHandler, in batch order
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use camino::Utf8PathBuf;
use fsw_core::{EventFlags, EventId, EventKind};
use rustc_hash::FxHashSet;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::classify::classify;

/// One unclassified notification as reported by a source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawNotification {
    /// The affected path.
    pub path: Utf8PathBuf,
    /// The raw flag word.
    pub flags: EventFlags,
    /// The journal sequence id.
    pub event_id: EventId,
}

impl RawNotification {
    /// Creates a raw notification.
    #[inline]
    #[must_use]
    pub fn new(path: impl Into<Utf8PathBuf>, flags: EventFlags, event_id: EventId) -> Self {
        Self {
            path: path.into(),
            flags,
            event_id,
        }
    }

    /// Classifies this notification, consuming it.
    #[inline]
    #[must_use]
    pub fn classify(self) -> ClassifiedEvent {
        ClassifiedEvent {
            kind: classify(self.flags),
            path: self.path,
            event_id: self.event_id,
            flags: self.flags,
        }
    }
}

/// A notification after classification, as delivered to the handler.
///
/// # Examples
///
/// ```
/// use fsw_core::{EventFlags, EventId, EventKind};
/// use fsw_watcher::RawNotification;
///
/// let event = RawNotification::new("/tmp/a", EventFlags::ITEM_REMOVED, EventId::new(100)).classify();
/// assert_eq!(event.kind, EventKind::Removed);
/// assert_eq!(event.event_id, EventId::new(100));
/// assert_eq!(event.file_name(), Some("a"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifiedEvent {
    /// The affected path.
    pub path: Utf8PathBuf,
    /// The classified kind.
    pub kind: EventKind,
    /// The journal sequence id, passed through unchanged.
    pub event_id: EventId,
    /// The flag word the kind was derived from.
    pub flags: EventFlags,
}

impl ClassifiedEvent {
    /// Returns the file name of the affected path.
    #[inline]
    #[must_use]
    pub fn file_name(&self) -> Option<&str> {
        self.path.file_name()
    }

    /// Returns `true` if the source flagged the item as a directory.
    #[inline]
    #[must_use]
    pub const fn is_dir(&self) -> bool {
        self.flags.is_dir()
    }

    /// Returns `true` if this is the sentinel that ends replayed history.
    #[inline]
    #[must_use]
    pub const fn is_history_done(&self) -> bool {
        self.flags.is_history_done()
    }
}

/// Errors raised while unmarshalling a delivered batch.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BatchError {
    /// The parallel arrays had different lengths.
    #[error("batch arrays differ in length: {paths} paths, {flags} flag words, {ids} ids")]
    LengthMismatch {
        /// Number of paths.
        paths: usize,
        /// Number of flag words.
        flags: usize,
        /// Number of ids.
        ids: usize,
    },
}

/// A batch of raw notifications delivered together, in source order.
///
/// Uses [`SmallVec`] with inline storage for up to 8 notifications.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawBatch {
    /// The notifications in delivery order.
    pub notifications: SmallVec<[RawNotification; 8]>,
}

impl RawBatch {
    /// Creates an empty batch.
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Unmarshals the parallel arrays a source delivers.
    ///
    /// Paths that are not valid UTF-8 are skipped with a warning; the rest of
    /// the batch keeps its order.
    ///
    /// # Errors
    ///
    /// Returns [`BatchError::LengthMismatch`] if the arrays differ in length.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::path::PathBuf;
    /// use fsw_watcher::RawBatch;
    ///
    /// let batch = RawBatch::from_parallel(
    ///     vec![PathBuf::from("/w/p1"), PathBuf::from("/w/p2")],
    ///     &[0x200, 0x100],
    ///     &[100, 101],
    /// )
    /// .unwrap();
    /// assert_eq!(batch.len(), 2);
    /// ```
    pub fn from_parallel(
        paths: Vec<PathBuf>,
        flags: &[u32],
        ids: &[u64],
    ) -> Result<Self, BatchError> {
        if paths.len() != flags.len() || paths.len() != ids.len() {
            return Err(BatchError::LengthMismatch {
                paths: paths.len(),
                flags: flags.len(),
                ids: ids.len(),
            });
        }

        let mut batch = Self::new();
        for ((path, &bits), &id) in paths.into_iter().zip(flags).zip(ids) {
            match Utf8PathBuf::from_path_buf(path) {
                Ok(path) => batch.push(RawNotification::new(
                    path,
                    EventFlags::from_bits_retain(bits),
                    EventId::new(id),
                )),
                Err(path) => {
                    tracing::warn!(path = %path.display(), event_id = id, "Skipping non-UTF-8 path");
                }
            }
        }
        Ok(batch)
    }

    /// Adds a notification to the end of the batch.
    #[inline]
    pub fn push(&mut self, notification: RawNotification) {
        self.notifications.push(notification);
    }

    /// Returns the number of notifications in this batch.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.notifications.len()
    }

    /// Returns `true` if the batch contains no notifications.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.notifications.is_empty()
    }

    /// Returns an iterator over the notifications.
    #[inline]
    pub fn iter(&self) -> impl Iterator<Item = &RawNotification> {
        self.notifications.iter()
    }

    /// Returns the highest id in the batch.
    #[must_use]
    pub fn max_event_id(&self) -> Option<EventId> {
        self.notifications.iter().map(|n| n.event_id).max()
    }
}

impl IntoIterator for RawBatch {
    type Item = RawNotification;
    type IntoIter = smallvec::IntoIter<[RawNotification; 8]>;

    fn into_iter(self) -> Self::IntoIter {
        self.notifications.into_iter()
    }
}

impl<'a> IntoIterator for &'a RawBatch {
    type Item = &'a RawNotification;
    type IntoIter = std::slice::Iter<'a, RawNotification>;

    fn into_iter(self) -> Self::IntoIter {
        self.notifications.iter()
    }
}

impl FromIterator<RawNotification> for RawBatch {
    fn from_iter<T: IntoIterator<Item = RawNotification>>(iter: T) -> Self {
        Self {
            notifications: iter.into_iter().collect(),
        }
    }
}

/// Summary statistics for a set of classified events.
///
/// # Examples
///
/// ```
/// use fsw_core::{EventFlags, EventId, EventKind};
/// use fsw_watcher::{EventBatchStats, RawNotification};
///
/// let events = [
///     RawNotification::new("/w/a", EventFlags::ITEM_CREATED, EventId::new(1)).classify(),
///     RawNotification::new("/w/a", EventFlags::ITEM_MODIFIED, EventId::new(2)).classify(),
/// ];
/// let stats = EventBatchStats::from_events(&events);
/// assert_eq!(stats.total_events, 2);
/// assert_eq!(stats.unique_paths, 1);
/// assert_eq!(stats.count(EventKind::Created), 1);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatchStats {
    /// Total number of events recorded.
    pub total_events: usize,

    /// Number of distinct paths among them.
    pub unique_paths: usize,

    /// Event count per kind. Kinds that never occurred are absent.
    pub by_kind: BTreeMap<EventKind, usize>,

    #[serde(skip)]
    seen: FxHashSet<Utf8PathBuf>,
}

impl EventBatchStats {
    /// Computes statistics for a slice of events.
    #[must_use]
    pub fn from_events(events: &[ClassifiedEvent]) -> Self {
        let mut stats = Self::default();
        for event in events {
            stats.record(event);
        }
        stats
    }

    /// Adds one event to the statistics.
    pub fn record(&mut self, event: &ClassifiedEvent) {
        self.total_events += 1;
        *self.by_kind.entry(event.kind).or_insert(0) += 1;
        if !self.seen.contains(&event.path) {
            self.seen.insert(event.path.clone());
            self.unique_paths += 1;
        }
    }

    /// Returns the number of events of the given kind.
    #[inline]
    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.by_kind.get(&kind).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(path: &str, flags: EventFlags, id: u64) -> RawNotification {
        RawNotification::new(path, flags, EventId::new(id))
    }

    #[test]
    fn test_classify_keeps_path_id_and_flags() {
        let flags = EventFlags::ITEM_CREATED | EventFlags::IS_DIR;
        let event = raw("/w/dir", flags, 7).classify();
        assert_eq!(event.path, "/w/dir");
        assert_eq!(event.kind, EventKind::Created);
        assert_eq!(event.event_id, EventId::new(7));
        assert_eq!(event.flags, flags);
        assert!(event.is_dir());
    }

    #[test]
    fn test_from_parallel_preserves_order() {
        let batch = RawBatch::from_parallel(
            vec![PathBuf::from("/w/p1"), PathBuf::from("/w/p2")],
            &[EventFlags::ITEM_REMOVED.bits(), EventFlags::ITEM_CREATED.bits()],
            &[100, 101],
        )
        .unwrap();

        let events: Vec<_> = batch.into_iter().map(RawNotification::classify).collect();
        assert_eq!(events[0].path, "/w/p1");
        assert_eq!(events[0].kind, EventKind::Removed);
        assert_eq!(events[0].event_id, EventId::new(100));
        assert_eq!(events[1].path, "/w/p2");
        assert_eq!(events[1].kind, EventKind::Created);
        assert_eq!(events[1].event_id, EventId::new(101));
    }

    #[test]
    fn test_from_parallel_rejects_length_mismatch() {
        let err = RawBatch::from_parallel(vec![PathBuf::from("/w/a")], &[1, 2], &[1]).unwrap_err();
        assert_eq!(
            err,
            BatchError::LengthMismatch {
                paths: 1,
                flags: 2,
                ids: 1
            }
        );
    }

    #[test]
    fn test_from_parallel_retains_unknown_bits() {
        let batch = RawBatch::from_parallel(vec![PathBuf::from("/w/a")], &[0x8000_0100], &[3]).unwrap();
        let first = batch.iter().next().unwrap();
        assert_eq!(first.flags.unknown_bits(), 0x8000_0000);
    }

    #[cfg(unix)]
    #[test]
    fn test_from_parallel_skips_non_utf8() {
        use std::ffi::OsString;
        use std::os::unix::ffi::OsStringExt;

        let bad = PathBuf::from(OsString::from_vec(vec![b'/', 0xff, 0xfe]));
        let batch = RawBatch::from_parallel(
            vec![PathBuf::from("/w/a"), bad, PathBuf::from("/w/b")],
            &[0x100, 0x100, 0x200],
            &[1, 2, 3],
        )
        .unwrap();
        let ids: Vec<_> = batch.iter().map(|n| n.event_id.as_u64()).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn test_batch_helpers() {
        let mut batch = RawBatch::new();
        assert!(batch.is_empty());
        assert_eq!(batch.max_event_id(), None);

        batch.push(raw("/w/a", EventFlags::ITEM_CREATED, 5));
        batch.push(raw("/w/b", EventFlags::ITEM_CREATED, 9));
        assert_eq!(batch.len(), 2);
        assert_eq!(batch.max_event_id(), Some(EventId::new(9)));

        let collected: RawBatch = batch.iter().cloned().collect();
        assert_eq!(collected, batch);
    }

    #[test]
    fn test_event_batch_stats() {
        let events = vec![
            raw("/w/a", EventFlags::ITEM_CREATED, 1).classify(),
            raw("/w/a", EventFlags::ITEM_MODIFIED, 2).classify(),
            raw("/w/b", EventFlags::ITEM_REMOVED, 3).classify(),
            raw("/w", EventFlags::empty(), 4).classify(),
        ];
        let stats = EventBatchStats::from_events(&events);
        assert_eq!(stats.total_events, 4);
        assert_eq!(stats.unique_paths, 3);
        assert_eq!(stats.count(EventKind::Created), 1);
        assert_eq!(stats.count(EventKind::RescanRequired), 1);
        assert_eq!(stats.count(EventKind::Renamed), 0);
    }

    #[test]
    fn test_event_batch_stats_serialization() {
        let events = vec![
            raw("/w/a", EventFlags::ITEM_CREATED, 1).classify(),
            raw("/w/b", EventFlags::ITEM_CREATED, 2).classify(),
            raw("/w/b", EventFlags::ITEM_RENAMED, 3).classify(),
        ];
        let stats = EventBatchStats::from_events(&events);
        insta::assert_snapshot!(
            serde_json::to_string(&stats).unwrap(),
            @r#"{"total_events":3,"unique_paths":2,"by_kind":{"created":2,"renamed":1}}"#
        );
    }

    #[test]
    fn test_classified_event_serialization() {
        let event = raw("/w/file.txt", EventFlags::ITEM_MODIFIED | EventFlags::IS_FILE, 42).classify();
        insta::assert_snapshot!(
            serde_json::to_string(&event).unwrap(),
            @r#"{"path":"/w/file.txt","kind":"modified","event_id":42,"flags":69632}"#
        );
    }
}
