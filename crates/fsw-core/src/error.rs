//! Error types for the fsw-core crate.
//!
//! This module provides the [`ConfigError`] type for configuration-related errors
//! that can occur across the workspace.

use camino::Utf8PathBuf;

/// Errors that can occur during configuration loading and validation.
///
/// # Examples
///
/// ```
/// use fsw_core::ConfigError;
/// use camino::Utf8PathBuf;
///
/// let error = ConfigError::RelativePath(Utf8PathBuf::from("some/path"));
/// assert!(error.to_string().contains("some/path"));
/// ```
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// No paths were configured for watching.
    #[error("at least one path must be watched")]
    NoPaths,

    /// A watch path is not absolute.
    #[error("watch path must be absolute: {0}")]
    RelativePath(Utf8PathBuf),

    /// A configuration option has an invalid value.
    #[error("invalid configuration option '{option}': {reason}")]
    InvalidOption {
        /// The name of the invalid option.
        option: String,
        /// Explanation of why the option is invalid.
        reason: String,
    },

    /// An I/O error occurred while reading configuration.
    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse the configuration file.
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}
