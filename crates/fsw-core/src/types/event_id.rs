//! Journal sequence identifiers.
//!
//! This module provides [`EventId`], the opaque, monotonically non-decreasing
//! sequence number a notification source attaches to every change it reports.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A sequence id from the notification source's journal.
///
/// Ids are non-decreasing for the lifetime of the journal (not per watcher,
/// not per process). They may wrap, which the source signals with the
/// `EVENT_IDS_WRAPPED` flag. Apart from ordering, an id is only useful as a
/// resume token: hand it back to a new watcher to replay everything after it.
///
/// # Examples
///
/// ```
/// use fsw_core::EventId;
///
/// let a = EventId::new(100);
/// let b = EventId::new(101);
/// assert!(a < b);
/// assert_eq!(b.as_u64(), 101);
/// assert_eq!("101".parse::<EventId>().unwrap(), b);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl EventId {
    /// Sentinel meaning "start tracking from now" (no replay).
    ///
    /// Never attached to a delivered notification.
    pub const SINCE_NOW: Self = Self(u64::MAX);

    /// Creates an id from its raw value.
    #[inline]
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw value.
    #[inline]
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns `true` for the [`EventId::SINCE_NOW`] sentinel.
    #[inline]
    #[must_use]
    pub const fn is_since_now(self) -> bool {
        self.0 == u64::MAX
    }

    /// Returns the id immediately after this one, wrapping at the top of the
    /// range and skipping the sentinel.
    #[inline]
    #[must_use]
    pub const fn next(self) -> Self {
        let next = self.0.wrapping_add(1);
        if next == u64::MAX { Self(0) } else { Self(next) }
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_since_now() {
            f.write_str("now")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

impl From<u64> for EventId {
    #[inline]
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Error returned when parsing an [`EventId`] from text fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid event id '{input}': expected 'now', a decimal, or a 0x-prefixed hex number")]
pub struct ParseEventIdError {
    input: String,
}

impl FromStr for EventId {
    type Err = ParseEventIdError;

    /// Accepts `now`, decimal, or `0x`-prefixed hexadecimal.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("now") {
            return Ok(Self::SINCE_NOW);
        }
        let parsed = match trimmed
            .strip_prefix("0x")
            .or_else(|| trimmed.strip_prefix("0X"))
        {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => trimmed.parse::<u64>(),
        };
        parsed.map(Self).map_err(|_| ParseEventIdError {
            input: s.to_owned(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(EventId::new(1) < EventId::new(2));
        assert!(EventId::new(u64::MAX - 1) < EventId::SINCE_NOW);
    }

    #[test]
    fn test_next_skips_sentinel() {
        assert_eq!(EventId::new(7).next(), EventId::new(8));
        assert_eq!(EventId::new(u64::MAX - 1).next(), EventId::new(0));
    }

    #[test]
    fn test_parse() {
        assert_eq!("42".parse::<EventId>(), Ok(EventId::new(42)));
        assert_eq!("0x2a".parse::<EventId>(), Ok(EventId::new(42)));
        assert_eq!(" now ".parse::<EventId>(), Ok(EventId::SINCE_NOW));
        assert!("forty-two".parse::<EventId>().is_err());
        assert!("".parse::<EventId>().is_err());
    }

    #[test]
    fn test_display() {
        assert_eq!(EventId::new(42).to_string(), "42");
        assert_eq!(EventId::SINCE_NOW.to_string(), "now");
    }

    #[test]
    fn test_serde_transparent() {
        let json = serde_json::to_string(&EventId::new(100)).unwrap();
        assert_eq!(json, "100");
        let parsed: EventId = serde_json::from_str("101").unwrap();
        assert_eq!(parsed, EventId::new(101));
    }
}
