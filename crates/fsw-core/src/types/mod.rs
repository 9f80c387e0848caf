//! Domain types shared by every fsw crate.
//!
//! # Module Organization
//!
//! - [`event_id`] - Journal sequence ids and resume tokens
//! - [`flags`] - Raw notification flag words
//! - [`kind`] - Semantic event kinds
//!
//! All public types are re-exported here and at the crate root:
//!
//! ```
//! use fsw_core::{EventFlags, EventId, EventKind};
//! ```

pub mod event_id;
pub mod flags;
pub mod kind;

pub use event_id::{EventId, ParseEventIdError};
pub use flags::EventFlags;
pub use kind::EventKind;
