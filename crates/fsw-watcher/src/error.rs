//! Error types for the fsw-watcher crate.
//!
//! This module provides the [`WatchError`] type for everything that can go
//! wrong while starting or stopping a watcher.

use std::fmt;

use fsw_core::{ConfigError, EventId};

use crate::source::SourceError;
use crate::watcher::WatcherState;

/// A lifecycle operation on a [`Watcher`](crate::Watcher).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    /// [`Watcher::start`](crate::Watcher::start).
    Start,
    /// [`Watcher::stop`](crate::Watcher::stop).
    Stop,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Start => "start",
            Self::Stop => "stop",
        })
    }
}

/// A control call made on a notification-source stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControlOp {
    /// Starting delivery.
    Activate,
    /// Halting delivery and invalidating the stream.
    Deactivate,
    /// Releasing the stream handle.
    Release,
}

impl fmt::Display for ControlOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Activate => "activate the stream",
            Self::Deactivate => "deactivate the stream",
            Self::Release => "release the stream",
        })
    }
}

/// Errors that can occur while starting or stopping a watcher.
///
/// Classification itself never fails; every error here comes from
/// configuration, lifecycle misuse, or the notification source.
///
/// # Error Recovery Strategy
///
/// - **Configuration and misuse** ([`WatchError::InvalidConfiguration`],
///   [`WatchError::InvalidState`], [`WatchError::Reentrant`]): nothing was
///   allocated; fix the call site
/// - **Creation failures** ([`WatchError::SourceCreationFailed`],
///   [`WatchError::HistoryInvalidated`]): nothing was retained; a fresh
///   watcher may be built
/// - **Control failures** ([`WatchError::SourceControlFailed`],
///   [`WatchError::ContextLost`]): the watcher is unusable and must be dropped
///
/// # Examples
///
/// ```
/// use fsw_watcher::{Operation, WatchError, WatcherState};
///
/// let err = WatchError::InvalidState {
///     operation: Operation::Stop,
///     state: WatcherState::Created,
/// };
/// assert!(err.is_invalid_configuration());
/// assert_eq!(err.to_string(), "cannot stop a watcher that is created");
/// ```
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    /// The watcher configuration was rejected before anything was allocated.
    #[error("invalid watcher configuration: {0}")]
    InvalidConfiguration(#[from] ConfigError),

    /// The operation is not valid in the watcher's current state.
    #[error("cannot {operation} a watcher that is {state}")]
    InvalidState {
        /// The operation that was attempted.
        operation: Operation,
        /// The state the watcher was in.
        state: WatcherState,
    },

    /// A blocking lifecycle call was made from inside the event handler,
    /// which runs on the serial context it would wait for.
    #[error("cannot {0} a watcher from inside its own event handler")]
    Reentrant(Operation),

    /// The notification source rejected the subscription.
    #[error("notification source rejected the subscription: {0}")]
    SourceCreationFailed(#[source] SourceError),

    /// A control call on the source failed.
    #[error("notification source failed to {operation}: {source}")]
    SourceControlFailed {
        /// The control call that failed.
        operation: ControlOp,
        /// The underlying source error.
        #[source]
        source: SourceError,
    },

    /// The source can no longer replay history starting at the requested id.
    ///
    /// The journal wrapped or was truncated past the resume point. Callers
    /// should rescan and start again from "now".
    #[error("event history since {since} is no longer available")]
    HistoryInvalidated {
        /// The id the watcher was asked to resume from.
        since: EventId,
    },

    /// The serial execution context went away before acknowledging a request.
    #[error("serial execution context terminated unexpectedly")]
    ContextLost,

    /// The serial execution context's thread could not be spawned.
    #[error("failed to spawn serial execution context: {0}")]
    Spawn(#[source] std::io::Error),
}

impl WatchError {
    /// Returns `true` for configuration errors and lifecycle misuse.
    #[inline]
    #[must_use]
    pub const fn is_invalid_configuration(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfiguration(_) | Self::InvalidState { .. } | Self::Reentrant(_)
        )
    }

    /// Returns `true` if the watcher that produced this error must be
    /// disposed of rather than used again.
    #[inline]
    #[must_use]
    pub const fn requires_disposal(&self) -> bool {
        matches!(self, Self::SourceControlFailed { .. } | Self::ContextLost)
    }

    /// Returns `true` if the requested resume point is gone.
    #[inline]
    #[must_use]
    pub const fn is_history_invalidated(&self) -> bool {
        matches!(self, Self::HistoryInvalidated { .. })
    }

    /// Wraps a source error raised while creating the stream.
    ///
    /// Missing history gets its own variant so callers can fall back to a
    /// full rescan.
    #[must_use]
    pub fn from_creation(error: SourceError) -> Self {
        match error {
            SourceError::HistoryUnavailable(since) => Self::HistoryInvalidated { since },
            other => Self::SourceCreationFailed(other),
        }
    }

    /// Wraps a source error raised by a control call.
    #[inline]
    #[must_use]
    pub const fn control(operation: ControlOp, source: SourceError) -> Self {
        Self::SourceControlFailed { operation, source }
    }
}
