//! Recursive filesystem watching with deterministic event classification.
//!
//! This crate turns raw, multi-bit change notifications into exactly one
//! [`EventKind`](fsw_core::EventKind) each and delivers them to a handler,
//! with a start/stop lifecycle that never races the thread the notification
//! source delivers on.
//!
//! # Overview
//!
//! - [`classify`] - pure flag-word classifier driven by [`CLASSIFICATION_RULES`]
//! - [`Watcher`] / [`WatcherBuilder`] - lifecycle controller
//! - [`NotificationSource`] / [`SourceStream`] - the source boundary, with
//!   [`MemorySource`] and [`NotifySource`] implementations
//! - [`EventHandler`] - the delivery callback, implemented for closures and
//!   tokio unbounded senders
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────┐   dispatch(RawBatch)   ┌──────────────────────────────┐
//! │ Notification source  │ ─────────────────────► │ Serial context (fsw-serial-N) │
//! │ (own thread)         │                        │  - stream control calls       │
//! └──────────────────────┘                        │  - classify each notification │
//!            ▲                                    │  - EventHandler::handle_event │
//!            │ create/bind/activate/              └──────────────┬───────────────┘
//!            │ deactivate/release                                │ run_sync + ack
//!            └───────────────────────────────────────────────────┤
//!                                                 ┌──────────────┴───────────────┐
//!                                                 │ Watcher::start / stop         │
//!                                                 │ (caller thread, blocking)     │
//!                                                 └──────────────────────────────┘
//! ```
//!
//! # Crate Dependencies
//!
//! ```text
//! fsw-cli ──► fsw-watcher ──► fsw-core
//! ```
//!
//! # Usage
//!
//! ## Streaming into async code
//!
//! ```no_run
//! use fsw_watcher::{NotifySource, WatcherBuilder};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
//!
//!     // start and stop block, so keep them off the async workers
//!     let mut watcher = tokio::task::spawn_blocking(move || {
//!         WatcherBuilder::new(["/path/to/project"]).start(NotifySource::new(), tx)
//!     })
//!     .await??;
//!
//!     while let Some(event) = rx.recv().await {
//!         println!("[{}] {}", event.kind, event.path);
//!     }
//!
//!     tokio::task::spawn_blocking(move || watcher.stop()).await??;
//!     Ok(())
//! }
//! ```
//!
//! # Error Handling
//!
//! ```
//! use fsw_watcher::WatchError;
//!
//! fn report(err: &WatchError) {
//!     if err.is_history_invalidated() {
//!         eprintln!("resume point lost, rescanning: {err}");
//!     } else if err.requires_disposal() {
//!         eprintln!("watcher unusable: {err}");
//!     } else {
//!         eprintln!("{err}");
//!     }
//! }
//! ```

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod classify;
mod context;
pub mod error;
pub mod events;
pub mod handler;
pub mod source;
pub mod stats;
pub mod watcher;

// Re-export classifier
pub use classify::{
    CLASSIFICATION_RULES, ClassificationRule, Explanation, FlagMatch, classify, explain,
    matching_rule,
};

// Re-export error types
pub use error::{ControlOp, Operation, WatchError};

// Re-export event types
pub use events::{BatchError, ClassifiedEvent, EventBatchStats, RawBatch, RawNotification};

// Re-export handler trait
pub use handler::EventHandler;

// Re-export source boundary
pub use source::{
    BatchDispatcher, ControlCall, DispatchError, FaultPoint, MemorySource, NotificationSource,
    NotifySource, SourceError, SourceStream, StreamOptions, StreamRequest,
};

// Re-export statistics
pub use stats::{DeliverySnapshot, DeliveryStats};

// Re-export watcher types
pub use watcher::{Watcher, WatcherBuilder, WatcherState};
