//! Semantic event kinds.
//!
//! This module provides the [`EventKind`] enum, the closed set of meanings a
//! raw change notification can be classified into.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The semantic kind of a filesystem change.
///
/// Every raw notification maps to exactly one kind. The mapping itself lives
/// in the classifier of `fsw-watcher`; this type only names the outcomes.
///
/// # Examples
///
/// ```
/// use fsw_core::EventKind;
///
/// assert!(EventKind::RescanRequired.needs_rescan());
/// assert!(!EventKind::Created.needs_rescan());
/// assert_eq!(EventKind::AttributeModified.label(), "attribute");
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// An item appeared at the path.
    ///
    /// A recursive copy or move of a directory tree reports the root only.
    Created,

    /// The contents of the item changed.
    Modified,

    /// The item was renamed or moved, including moves to the trash.
    ///
    /// A move between two watched directories is reported once per side.
    Renamed,

    /// The item was removed. Reported for every affected path.
    Removed,

    /// Ownership, inode metadata, or Finder info changed.
    AttributeModified,

    /// The source could not describe the change precisely; the subtree at
    /// the path has to be rescanned.
    RescanRequired,

    /// Flags were present but none of them name a known change.
    Other,
}

impl EventKind {
    /// All kinds, in declaration order.
    pub const ALL: [Self; 7] = [
        Self::Created,
        Self::Modified,
        Self::Renamed,
        Self::Removed,
        Self::AttributeModified,
        Self::RescanRequired,
        Self::Other,
    ];

    /// Returns `true` if the caller must rescan the subtree rooted at the
    /// event path instead of trusting the event.
    #[inline]
    #[must_use]
    pub const fn needs_rescan(self) -> bool {
        matches!(self, Self::RescanRequired)
    }

    /// Returns `true` if the event means the path may no longer exist.
    ///
    /// # Examples
    ///
    /// ```
    /// use fsw_core::EventKind;
    ///
    /// assert!(EventKind::Removed.may_be_gone());
    /// assert!(EventKind::Renamed.may_be_gone());
    /// assert!(!EventKind::Modified.may_be_gone());
    /// ```
    #[inline]
    #[must_use]
    pub const fn may_be_gone(self) -> bool {
        matches!(self, Self::Removed | Self::Renamed)
    }

    /// Returns a short lowercase label for this kind.
    #[inline]
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Modified => "modified",
            Self::Renamed => "renamed",
            Self::Removed => "removed",
            Self::AttributeModified => "attribute",
            Self::RescanRequired => "rescan",
            Self::Other => "other",
        }
    }

    /// Returns the position of this kind in [`EventKind::ALL`].
    #[inline]
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
