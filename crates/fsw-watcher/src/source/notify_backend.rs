//! Notification source backed by the `notify` crate.
//!
//! The platform watcher reports events on its own thread into a std channel.
//! A forwarding thread translates them into [`EventFlags`], stamps each with
//! a synthetic id, coalesces them for up to the requested latency, and hands
//! the batch to the dispatcher.
//!
//! ```text
//! RecommendedWatcher ──std mpsc──▶ fsw-notify thread ──BatchDispatcher──▶ serial context
//!                                   (translate, coalesce)
//! ```
//!
//! The backend keeps no journal, so requests with a `since` id are refused.

use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use camino::Utf8PathBuf;
use fsw_core::{EventFlags, EventId};
use notify::event::{CreateKind, MetadataKind, ModifyKind, RemoveKind};
use notify::{RecommendedWatcher, RecursiveMode, Watcher as _};

use super::{BatchDispatcher, NotificationSource, SourceError, SourceStream, StreamRequest};
use crate::events::{RawBatch, RawNotification};

/// Longest the forwarding thread blocks before rechecking its stop flag.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

type NotifyReceiver = Receiver<notify::Result<notify::Event>>;

/// A notification source using the platform's recommended `notify` backend.
///
/// Ids are synthetic: they start at 1 and increase by one per notification
/// across every stream created from the same source.
///
/// Roots that do not exist when the stream is activated are skipped and stay
/// unwatched for the life of the stream, even if they are created later.
/// Restart the watcher to pick them up.
///
/// # Examples
///
/// ```no_run
/// use fsw_watcher::{ClassifiedEvent, NotifySource, WatcherBuilder};
///
/// # fn main() -> Result<(), fsw_watcher::WatchError> {
/// let mut watcher = WatcherBuilder::new(["/tmp"])
///     .start(NotifySource::new(), |event: ClassifiedEvent| println!("{event:?}"))?;
/// watcher.stop()?;
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct NotifySource {
    next_id: Arc<AtomicU64>,
}

impl Default for NotifySource {
    fn default() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
        }
    }
}

impl NotifySource {
    /// Creates a source whose first id is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl NotificationSource for NotifySource {
    fn create(&mut self, request: &StreamRequest) -> Result<Box<dyn SourceStream>, SourceError> {
        if request.since.is_some() {
            return Err(SourceError::ReplayUnsupported);
        }
        let (tx, rx) = mpsc::channel();
        let watcher = notify::recommended_watcher(tx)?;
        tracing::debug!(paths = request.paths.len(), "Created notify stream");
        Ok(Box::new(NotifyStream {
            request: request.clone(),
            next_id: Arc::clone(&self.next_id),
            watcher: Some(watcher),
            events: Some(rx),
            dispatcher: None,
            watched: Vec::new(),
            stopping: Arc::new(AtomicBool::new(false)),
            forwarder: None,
        }))
    }

    fn name(&self) -> &'static str {
        "notify"
    }
}

struct NotifyStream {
    request: StreamRequest,
    next_id: Arc<AtomicU64>,
    watcher: Option<RecommendedWatcher>,
    events: Option<NotifyReceiver>,
    dispatcher: Option<BatchDispatcher>,
    watched: Vec<Utf8PathBuf>,
    stopping: Arc<AtomicBool>,
    forwarder: Option<JoinHandle<()>>,
}

impl SourceStream for NotifyStream {
    fn bind(&mut self, dispatcher: BatchDispatcher) {
        self.dispatcher = Some(dispatcher);
    }

    fn activate(&mut self) -> Result<(), SourceError> {
        if self.forwarder.is_some() {
            return Err(SourceError::AlreadyActive);
        }
        let dispatcher = self.dispatcher.clone().ok_or(SourceError::NotBound)?;
        let watcher = self.watcher.as_mut().ok_or(SourceError::Invalidated)?;

        for path in &self.request.paths {
            if !path.exists() {
                tracing::debug!(path = %path, "Skipping missing watch root");
                continue;
            }
            watcher.watch(path.as_std_path(), RecursiveMode::Recursive)?;
            self.watched.push(path.clone());
        }

        let events = self.events.take().ok_or(SourceError::Invalidated)?;
        let forwarder = Forwarder {
            events,
            dispatcher,
            stopping: Arc::clone(&self.stopping),
            latency: self.request.latency,
            file_events: self.request.options.file_events,
            next_id: Arc::clone(&self.next_id),
        };
        let handle = thread::Builder::new()
            .name("fsw-notify".to_owned())
            .spawn(move || forwarder.run())?;
        self.forwarder = Some(handle);

        tracing::debug!(watched = self.watched.len(), "Activated notify stream");
        Ok(())
    }

    fn deactivate_and_invalidate(&mut self) -> Result<(), SourceError> {
        let mut first_error = None;
        if let Some(mut watcher) = self.watcher.take() {
            for path in self.watched.drain(..) {
                match watcher.unwatch(path.as_std_path()) {
                    Ok(()) => {}
                    // The backend drops the watch itself when a root is deleted.
                    Err(err) if matches!(err.kind, notify::ErrorKind::WatchNotFound) => {
                        tracing::debug!(path = %path, "Watch root already gone");
                    }
                    Err(err) => {
                        tracing::debug!(path = %path, error = %err, "Failed to unwatch path");
                        first_error.get_or_insert(SourceError::Notify(err));
                    }
                }
            }
        }
        self.stopping.store(true, Ordering::Release);
        if let Some(handle) = self.forwarder.take() {
            if handle.join().is_err() {
                tracing::warn!("Notify forwarding thread panicked");
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    fn release(mut self: Box<Self>) -> Result<(), SourceError> {
        if self.forwarder.is_some() || self.watcher.is_some() {
            self.deactivate_and_invalidate()?;
        }
        Ok(())
    }
}

struct Forwarder {
    events: NotifyReceiver,
    dispatcher: BatchDispatcher,
    stopping: Arc<AtomicBool>,
    latency: Duration,
    file_events: bool,
    next_id: Arc<AtomicU64>,
}

impl Forwarder {
    fn run(self) {
        let mut pending = RawBatch::new();
        let mut window_opened: Option<Instant> = None;

        while !self.stopping.load(Ordering::Acquire) {
            let timeout = window_opened.map_or(POLL_INTERVAL, |opened| {
                self.latency.saturating_sub(opened.elapsed()).min(POLL_INTERVAL)
            });

            match self.events.recv_timeout(timeout) {
                Ok(Ok(event)) => {
                    self.translate(event, &mut pending);
                    if window_opened.is_none() && !pending.is_empty() {
                        window_opened = Some(Instant::now());
                    }
                }
                Ok(Err(err)) => tracing::warn!(error = %err, "Platform watcher error"),
                Err(RecvTimeoutError::Timeout) => {}
                Err(RecvTimeoutError::Disconnected) => break,
            }

            if window_opened.is_some_and(|opened| opened.elapsed() >= self.latency) {
                window_opened = None;
                if let Err(err) = self.dispatcher.dispatch(mem::take(&mut pending)) {
                    tracing::debug!(error = %err, "Dispatcher closed, stopping forwarder");
                    break;
                }
            }
        }
    }

    fn translate(&self, event: notify::Event, pending: &mut RawBatch) {
        let Some(mut flags) = flags_for(event.kind) else {
            return;
        };
        if event.need_rescan() {
            flags |= EventFlags::MUST_SCAN_SUBDIRS;
        }
        for path in event.paths {
            let path = match Utf8PathBuf::from_path_buf(path) {
                Ok(path) => path,
                Err(path) => {
                    tracing::warn!(path = %path.display(), "Skipping non-UTF-8 path");
                    continue;
                }
            };
            let id = EventId::new(self.next_id.fetch_add(1, Ordering::Relaxed));
            if self.file_events {
                pending.push(RawNotification::new(path, flags, id));
            } else {
                let dir = path.parent().map_or_else(|| path.clone(), ToOwned::to_owned);
                pending.push(RawNotification::new(dir, EventFlags::empty(), id));
            }
        }
    }
}

/// Maps a `notify` event kind onto FSEvents-style flags.
///
/// Access events carry no change and map to `None`.
fn flags_for(kind: notify::EventKind) -> Option<EventFlags> {
    use notify::EventKind as K;

    let flags = match kind {
        K::Access(_) => return None,
        K::Create(CreateKind::File) => EventFlags::ITEM_CREATED | EventFlags::IS_FILE,
        K::Create(CreateKind::Folder) => EventFlags::ITEM_CREATED | EventFlags::IS_DIR,
        K::Create(_) => EventFlags::ITEM_CREATED,
        K::Modify(ModifyKind::Metadata(MetadataKind::Ownership)) => EventFlags::ITEM_CHANGE_OWNER,
        // XATTR_MOD alone is not an attribute change, so this classifies as `Other`.
        K::Modify(ModifyKind::Metadata(MetadataKind::Extended)) => EventFlags::ITEM_XATTR_MOD,
        K::Modify(ModifyKind::Metadata(_)) => EventFlags::ITEM_INODE_META_MOD,
        K::Modify(ModifyKind::Name(_)) => EventFlags::ITEM_RENAMED,
        K::Modify(_) => EventFlags::ITEM_MODIFIED,
        K::Remove(RemoveKind::File) => EventFlags::ITEM_REMOVED | EventFlags::IS_FILE,
        K::Remove(RemoveKind::Folder) => EventFlags::ITEM_REMOVED | EventFlags::IS_DIR,
        K::Remove(_) => EventFlags::ITEM_REMOVED,
        K::Any | K::Other => EventFlags::empty(),
    };
    Some(flags)
}

#[cfg(test)]
mod tests {
    use notify::event::{AccessKind, DataChange, RenameMode};
    use parking_lot::Mutex;

    use super::*;
    use crate::classify::classify;
    use crate::source::StreamOptions;
    use fsw_core::EventKind;

    fn request(paths: Vec<Utf8PathBuf>) -> StreamRequest {
        StreamRequest {
            paths,
            since: None,
            latency: Duration::ZERO,
            options: StreamOptions::default(),
        }
    }

    #[test]
    fn test_flag_translation() {
        use notify::EventKind as K;

        let kind_of = |kind| flags_for(kind).map(classify);
        assert_eq!(kind_of(K::Create(CreateKind::File)), Some(EventKind::Created));
        assert_eq!(
            kind_of(K::Modify(ModifyKind::Data(DataChange::Content))),
            Some(EventKind::Modified)
        );
        assert_eq!(
            kind_of(K::Modify(ModifyKind::Metadata(MetadataKind::Permissions))),
            Some(EventKind::AttributeModified)
        );
        assert_eq!(
            kind_of(K::Modify(ModifyKind::Name(RenameMode::From))),
            Some(EventKind::Renamed)
        );
        assert_eq!(kind_of(K::Remove(RemoveKind::Any)), Some(EventKind::Removed));
        assert_eq!(kind_of(K::Any), Some(EventKind::RescanRequired));
        assert_eq!(kind_of(K::Access(AccessKind::Any)), None);
        assert_eq!(
            kind_of(K::Modify(ModifyKind::Metadata(MetadataKind::Extended))),
            Some(EventKind::Other)
        );
        assert_eq!(
            flags_for(K::Create(CreateKind::Folder)),
            Some(EventFlags::ITEM_CREATED | EventFlags::IS_DIR)
        );
    }

    #[test]
    fn test_since_is_refused() {
        let mut source = NotifySource::new();
        let mut req = request(vec![Utf8PathBuf::from("/tmp")]);
        req.since = Some(EventId::new(1));
        assert!(matches!(
            source.create(&req),
            Err(SourceError::ReplayUnsupported)
        ));
    }

    #[test]
    fn test_activate_requires_bind() {
        let mut source = NotifySource::new();
        let mut stream = source.create(&request(vec![])).unwrap();
        assert!(matches!(stream.activate(), Err(SourceError::NotBound)));
        stream.release().unwrap();
    }

    #[test]
    fn test_missing_roots_are_skipped() {
        let mut source = NotifySource::new();
        let mut stream = source
            .create(&request(vec![Utf8PathBuf::from("/definitely/not/here/fsw")]))
            .unwrap();
        stream.bind(BatchDispatcher::new(|_| Ok(())));
        stream.activate().unwrap();
        stream.deactivate_and_invalidate().unwrap();
        stream.release().unwrap();
    }

    #[test]
    fn test_delivers_real_changes() {
        let temp_dir = tempfile::TempDir::new().expect("Failed to create temp directory");
        let root = Utf8PathBuf::from_path_buf(temp_dir.path().canonicalize().unwrap()).unwrap();

        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let mut source = NotifySource::new();
        let mut stream = source.create(&request(vec![root.clone()])).unwrap();
        stream.bind(BatchDispatcher::new(move |batch| {
            sink.lock().extend(batch);
            Ok(())
        }));
        stream.activate().unwrap();

        let file = root.join("new.txt");
        std::fs::write(&file, "hello").unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while Instant::now() < deadline && !received.lock().iter().any(|n| n.path == file) {
            thread::sleep(Duration::from_millis(20));
        }
        stream.deactivate_and_invalidate().unwrap();
        stream.release().unwrap();

        let received = received.lock();
        // Platform backends differ in which kinds they report; the path and
        // increasing ids are what every backend guarantees.
        assert!(received.iter().any(|n| n.path == file), "no event for {file}");
        assert!(received.windows(2).all(|w| w[0].event_id < w[1].event_id));
    }
}
