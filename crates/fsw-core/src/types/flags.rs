//! Raw notification flags.
//!
//! [`EventFlags`] mirrors the per-event flag word of the macOS FSEvents
//! journal bit for bit. Other backends translate their native events into
//! these bits so that one classifier serves every source.
//!
//! Flags are not mutually exclusive. A single notification routinely carries
//! several item bits (`ITEM_CREATED | ITEM_INODE_META_MOD | IS_FILE` after a
//! create followed by `chmod`), which is why classification needs a fixed
//! priority order.

use std::fmt;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

bitflags::bitflags! {
    /// The flag word attached to one raw notification.
    ///
    /// The empty set is meaningful: sources emit it when per-item detail was
    /// not requested or was suppressed.
    ///
    /// # Examples
    ///
    /// ```
    /// use fsw_core::EventFlags;
    ///
    /// let flags = EventFlags::ITEM_CREATED | EventFlags::IS_FILE;
    /// assert!(flags.contains(EventFlags::ITEM_CREATED));
    /// assert!(flags.is_file());
    /// assert_eq!(flags.bits(), 0x0001_0100);
    /// ```
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
    pub struct EventFlags: u32 {
        /// The source could not enumerate the affected children precisely.
        const MUST_SCAN_SUBDIRS = 0x0000_0001;
        /// Events were dropped in user space (set with `MUST_SCAN_SUBDIRS`).
        const USER_DROPPED = 0x0000_0002;
        /// Events were dropped in the kernel (set with `MUST_SCAN_SUBDIRS`).
        const KERNEL_DROPPED = 0x0000_0004;
        /// The journal's sequence ids wrapped around.
        const EVENT_IDS_WRAPPED = 0x0000_0008;
        /// Sentinel marking the end of replayed history.
        const HISTORY_DONE = 0x0000_0010;
        /// A watched root itself changed.
        const ROOT_CHANGED = 0x0000_0020;
        /// A volume was mounted under a watched path.
        const MOUNT = 0x0000_0040;
        /// A volume was unmounted under a watched path.
        const UNMOUNT = 0x0000_0080;
        /// The item was created.
        const ITEM_CREATED = 0x0000_0100;
        /// The item was removed.
        const ITEM_REMOVED = 0x0000_0200;
        /// Inode metadata (permissions, timestamps) changed.
        const ITEM_INODE_META_MOD = 0x0000_0400;
        /// The item was renamed.
        const ITEM_RENAMED = 0x0000_0800;
        /// The item's contents were modified.
        const ITEM_MODIFIED = 0x0000_1000;
        /// Finder info, stored as an extended attribute, changed.
        const ITEM_FINDER_INFO_MOD = 0x0000_2000;
        /// The item's owner changed.
        const ITEM_CHANGE_OWNER = 0x0000_4000;
        /// An extended attribute changed.
        const ITEM_XATTR_MOD = 0x0000_8000;
        /// The item is a regular file.
        const IS_FILE = 0x0001_0000;
        /// The item is a directory.
        const IS_DIR = 0x0002_0000;
        /// The item is a symbolic link.
        const IS_SYMLINK = 0x0004_0000;
        /// The change was made by the watching process.
        const OWN_EVENT = 0x0008_0000;
        /// The item is a hard link.
        const IS_HARDLINK = 0x0010_0000;
        /// The item was the last hard link to its inode.
        const IS_LAST_HARDLINK = 0x0020_0000;
        /// The item is a clone of another item.
        const ITEM_CLONED = 0x0040_0000;
    }
}

impl EventFlags {
    /// Bits that describe an attribute change.
    pub const ATTRIBUTE_CHANGES: Self = Self::ITEM_CHANGE_OWNER
        .union(Self::ITEM_INODE_META_MOD)
        .union(Self::ITEM_FINDER_INFO_MOD);

    /// Bits that describe the type of the item rather than a change.
    pub const ITEM_TYPES: Self = Self::IS_FILE
        .union(Self::IS_DIR)
        .union(Self::IS_SYMLINK)
        .union(Self::IS_HARDLINK)
        .union(Self::IS_LAST_HARDLINK);

    /// Returns `true` if the item is a regular file.
    #[inline]
    #[must_use]
    pub const fn is_file(self) -> bool {
        self.contains(Self::IS_FILE)
    }

    /// Returns `true` if the item is a directory.
    #[inline]
    #[must_use]
    pub const fn is_dir(self) -> bool {
        self.contains(Self::IS_DIR)
    }

    /// Returns `true` if this notification ends the replayed history.
    #[inline]
    #[must_use]
    pub const fn is_history_done(self) -> bool {
        self.contains(Self::HISTORY_DONE)
    }

    /// Returns `true` if the source reported a sequence id wrap.
    #[inline]
    #[must_use]
    pub const fn ids_wrapped(self) -> bool {
        self.contains(Self::EVENT_IDS_WRAPPED)
    }

    /// Returns the bits no named flag covers.
    #[inline]
    #[must_use]
    pub const fn unknown_bits(self) -> u32 {
        self.bits() & !Self::all().bits()
    }

    /// Returns the names of the set flags in bit order.
    #[must_use]
    pub fn names(self) -> Vec<&'static str> {
        self.iter_names().map(|(name, _)| name).collect()
    }
}

impl fmt::Display for EventFlags {
    /// Formats as `A | B`, `(empty)`, with unknown bits appended in hex.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(empty)");
        }
        let mut first = true;
        for (name, _) in self.iter_names() {
            if !first {
                f.write_str(" | ")?;
            }
            f.write_str(name)?;
            first = false;
        }
        let unknown = self.unknown_bits();
        if unknown != 0 {
            if !first {
                f.write_str(" | ")?;
            }
            write!(f, "{unknown:#x}")?;
        }
        Ok(())
    }
}

impl Serialize for EventFlags {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u32(self.bits())
    }
}

impl<'de> Deserialize<'de> for EventFlags {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u32::deserialize(deserializer).map(Self::from_bits_retain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_values_match_fsevents() {
        assert_eq!(EventFlags::MUST_SCAN_SUBDIRS.bits(), 0x1);
        assert_eq!(EventFlags::HISTORY_DONE.bits(), 0x10);
        assert_eq!(EventFlags::ITEM_CREATED.bits(), 0x100);
        assert_eq!(EventFlags::ITEM_REMOVED.bits(), 0x200);
        assert_eq!(EventFlags::ITEM_INODE_META_MOD.bits(), 0x400);
        assert_eq!(EventFlags::ITEM_RENAMED.bits(), 0x800);
        assert_eq!(EventFlags::ITEM_MODIFIED.bits(), 0x1000);
        assert_eq!(EventFlags::ITEM_CHANGE_OWNER.bits(), 0x4000);
        assert_eq!(EventFlags::ITEM_CLONED.bits(), 0x40_0000);
    }

    #[test]
    fn test_unknown_bits_are_retained() {
        let flags = EventFlags::from_bits_retain(0x8000_0100);
        assert!(flags.contains(EventFlags::ITEM_CREATED));
        assert_eq!(flags.unknown_bits(), 0x8000_0000);
    }

    #[test]
    fn test_display() {
        assert_eq!(EventFlags::empty().to_string(), "(empty)");
        assert_eq!(
            (EventFlags::ITEM_CREATED | EventFlags::IS_FILE).to_string(),
            "ITEM_CREATED | IS_FILE"
        );
        assert_eq!(
            EventFlags::from_bits_retain(0x8000_0000).to_string(),
            "0x80000000"
        );
    }

    #[test]
    fn test_names() {
        let flags = EventFlags::ITEM_RENAMED | EventFlags::IS_DIR;
        assert_eq!(flags.names(), vec!["ITEM_RENAMED", "IS_DIR"]);
    }

    #[test]
    fn test_serde_as_bits() {
        let flags = EventFlags::ITEM_MODIFIED | EventFlags::IS_FILE;
        let json = serde_json::to_string(&flags).unwrap();
        assert_eq!(json, "69632");
        let parsed: EventFlags = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, flags);
    }

    #[test]
    fn test_helpers() {
        assert!(EventFlags::HISTORY_DONE.is_history_done());
        assert!(EventFlags::EVENT_IDS_WRAPPED.ids_wrapped());
        assert!(EventFlags::IS_DIR.is_dir());
        assert!(!EventFlags::IS_DIR.is_file());
    }
}
