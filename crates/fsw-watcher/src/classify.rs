//! Flag-word classification.
//!
//! A raw notification carries an unordered set of flags, and a single change
//! routinely sets several item bits at once. [`classify`] maps every flag
//! word to exactly one [`EventKind`] by walking [`CLASSIFICATION_RULES`] in
//! order and returning the kind of the first rule that matches.
//!
//! # Priority
//!
//! | # | Matches                                                          | Kind                  |
//! |---|------------------------------------------------------------------|-----------------------|
//! | 0 | empty flag word                                                  | `RescanRequired`      |
//! | 1 | `MUST_SCAN_SUBDIRS`                                              | `RescanRequired`      |
//! | 2 | `ITEM_CHANGE_OWNER`, `ITEM_INODE_META_MOD`, `ITEM_FINDER_INFO_MOD` | `AttributeModified` |
//! | 3 | `ITEM_CREATED`                                                   | `Created`             |
//! | 4 | `ITEM_MODIFIED`                                                  | `Modified`            |
//! | 5 | `ITEM_RENAMED`                                                   | `Renamed`             |
//! | 6 | `ITEM_REMOVED`                                                   | `Removed`             |
//! | - | anything else                                                    | `Other`               |
//!
//! # Platform behaviour that is passed through
//!
//! The classifier never correlates notifications. Copying or moving a tree
//! into a watched directory yields one `Created` for the root only. Deleting
//! a tree yields one `Removed` per path. Moving to the trash is a `Renamed`.
//! A move produces one or two `Renamed` notifications depending on whether
//! both sides are under a watched root.

use fsw_core::{EventFlags, EventKind};

/// How a [`ClassificationRule`] tests a flag word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagMatch {
    /// Matches only the empty flag word.
    Empty,
    /// Matches when any of the given bits is set.
    Any(EventFlags),
}

impl FlagMatch {
    /// Returns `true` if `flags` satisfies this matcher.
    #[inline]
    #[must_use]
    pub const fn matches(self, flags: EventFlags) -> bool {
        match self {
            Self::Empty => flags.is_empty(),
            Self::Any(bits) => flags.intersects(bits),
        }
    }
}

/// One row of the classification table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassificationRule {
    /// Condition on the flag word.
    pub matcher: FlagMatch,
    /// Kind produced when the condition holds.
    pub kind: EventKind,
    /// Short human-readable name of the rule.
    pub name: &'static str,
}

/// The classification table, highest priority first.
pub static CLASSIFICATION_RULES: [ClassificationRule; 7] = [
    ClassificationRule {
        matcher: FlagMatch::Empty,
        kind: EventKind::RescanRequired,
        name: "no flags",
    },
    ClassificationRule {
        matcher: FlagMatch::Any(EventFlags::MUST_SCAN_SUBDIRS),
        kind: EventKind::RescanRequired,
        name: "must scan subdirs",
    },
    ClassificationRule {
        matcher: FlagMatch::Any(EventFlags::ATTRIBUTE_CHANGES),
        kind: EventKind::AttributeModified,
        name: "attribute change",
    },
    ClassificationRule {
        matcher: FlagMatch::Any(EventFlags::ITEM_CREATED),
        kind: EventKind::Created,
        name: "item created",
    },
    ClassificationRule {
        matcher: FlagMatch::Any(EventFlags::ITEM_MODIFIED),
        kind: EventKind::Modified,
        name: "item modified",
    },
    ClassificationRule {
        matcher: FlagMatch::Any(EventFlags::ITEM_RENAMED),
        kind: EventKind::Renamed,
        name: "item renamed",
    },
    ClassificationRule {
        matcher: FlagMatch::Any(EventFlags::ITEM_REMOVED),
        kind: EventKind::Removed,
        name: "item removed",
    },
];

/// Classifies a flag word.
///
/// Total and deterministic; bits outside the table (item types, history
/// markers, unknown bits) never change the result on their own.
///
/// # Examples
///
/// ```
/// use fsw_core::{EventFlags, EventKind};
/// use fsw_watcher::classify;
///
/// assert_eq!(classify(EventFlags::ITEM_CREATED), EventKind::Created);
/// assert_eq!(classify(EventFlags::empty()), EventKind::RescanRequired);
/// assert_eq!(
///     classify(EventFlags::ITEM_CREATED | EventFlags::ITEM_INODE_META_MOD),
///     EventKind::AttributeModified,
/// );
/// ```
#[must_use]
pub fn classify(flags: EventFlags) -> EventKind {
    matching_rule(flags).map_or(EventKind::Other, |(_, rule)| rule.kind)
}

/// Returns the first rule matching `flags` together with its position in
/// [`CLASSIFICATION_RULES`].
#[must_use]
pub fn matching_rule(flags: EventFlags) -> Option<(usize, &'static ClassificationRule)> {
    CLASSIFICATION_RULES
        .iter()
        .enumerate()
        .find(|(_, rule)| rule.matcher.matches(flags))
}

/// The outcome of classifying one flag word, with the reasoning attached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Explanation {
    /// The classified flag word.
    pub flags: EventFlags,
    /// Position of the winning rule, or `None` for the `Other` fallback.
    pub rule: Option<usize>,
    /// The resulting kind.
    pub kind: EventKind,
}

impl Explanation {
    /// Returns the name of the winning rule.
    #[must_use]
    pub fn rule_name(&self) -> &'static str {
        self.rule
            .and_then(|index| CLASSIFICATION_RULES.get(index))
            .map_or("fallback", |rule| rule.name)
    }
}

/// Classifies `flags` and reports which rule decided the outcome.
#[must_use]
pub fn explain(flags: EventFlags) -> Explanation {
    match matching_rule(flags) {
        Some((index, rule)) => Explanation {
            flags,
            rule: Some(index),
            kind: rule.kind,
        },
        None => Explanation {
            flags,
            rule: None,
            kind: EventKind::Other,
        },
    }
}
