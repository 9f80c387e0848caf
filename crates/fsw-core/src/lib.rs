//! Core types, configuration, and errors for the fsw filesystem watcher.
//!
//! This crate provides the foundational types used across the workspace:
//!
//! - [`EventFlags`] - raw per-notification flag words
//! - [`EventKind`] - the closed set of classified event kinds
//! - [`EventId`] - journal sequence ids, usable as resume tokens
//! - [`Config`] / [`WatchConfig`] - serde-backed configuration
//! - [`ConfigError`] - configuration loading and validation failures

#![deny(clippy::all)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, OutputConfig, OutputFormat, WatchConfig};
pub use error::ConfigError;
pub use types::{EventFlags, EventId, EventKind, ParseEventIdError};
