//! Event handler trait and adapters.

use tokio::sync::mpsc::UnboundedSender;

use crate::events::ClassifiedEvent;

/// Receives classified events from a watcher.
///
/// The handler runs on the watcher's serial context, one event at a time and
/// in delivery order. Blocking inside `handle_event` holds up classification
/// of later batches and makes [`Watcher::stop`](crate::Watcher::stop) wait.
///
/// Implemented for closures and for
/// [`tokio::sync::mpsc::UnboundedSender<ClassifiedEvent>`].
///
/// # Examples
///
/// ```
/// use fsw_watcher::{ClassifiedEvent, EventHandler};
///
/// fn assert_handler(_: impl EventHandler) {}
///
/// assert_handler(|event: ClassifiedEvent| println!("{} {}", event.kind, event.path));
/// ```
pub trait EventHandler: Send + 'static {
    /// Handles one classified event.
    fn handle_event(&mut self, event: ClassifiedEvent);
}

impl<F> EventHandler for F
where
    F: FnMut(ClassifiedEvent) + Send + 'static,
{
    fn handle_event(&mut self, event: ClassifiedEvent) {
        (self)(event);
    }
}

impl EventHandler for UnboundedSender<ClassifiedEvent> {
    fn handle_event(&mut self, event: ClassifiedEvent) {
        if let Err(err) = self.send(event) {
            tracing::trace!(path = %err.0.path, "Event receiver dropped, discarding event");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use fsw_core::{EventFlags, EventId};
    use parking_lot::Mutex;

    use super::*;
    use crate::events::RawNotification;

    fn event(path: &str) -> ClassifiedEvent {
        RawNotification::new(path, EventFlags::ITEM_CREATED, EventId::new(1)).classify()
    }

    fn deliver(handler: &mut impl EventHandler, event: ClassifiedEvent) {
        handler.handle_event(event);
    }

    #[test]
    fn test_closure_handler() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let mut handler = move |event: ClassifiedEvent| sink.lock().push(event.path);

        deliver(&mut handler, event("/w/a"));
        deliver(&mut handler, event("/w/b"));
        assert_eq!(*seen.lock(), vec!["/w/a", "/w/b"]);
    }

    #[tokio::test]
    async fn test_unbounded_sender_handler() {
        let (mut tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        deliver(&mut tx, event("/w/a"));
        let received = rx.recv().await.unwrap();
        assert_eq!(received.path, "/w/a");
    }

    #[test]
    fn test_unbounded_sender_tolerates_closed_receiver() {
        let (mut tx, rx) = tokio::sync::mpsc::unbounded_channel();
        drop(rx);
        deliver(&mut tx, event("/w/a"));
    }
}
