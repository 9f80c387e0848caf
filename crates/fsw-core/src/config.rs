//! Configuration structures for the fsw watcher.
//!
//! This module provides configuration types for the components of the tool:
//!
//! - [`WatchConfig`] - Watched paths, coalescing latency, resume point
//! - [`OutputConfig`] - How the CLI renders delivered events
//! - [`Config`] - Root configuration combining all settings
//!
//! All configuration types implement [`Default`] and deserialize with
//! missing fields filled from those defaults, so a config file only needs to
//! name what it changes.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::types::EventId;

/// Upper bound accepted for [`WatchConfig::latency_ms`].
pub const MAX_LATENCY_MS: u64 = 60_000;

/// Configuration for a watcher.
///
/// # Examples
///
/// ```
/// use fsw_core::WatchConfig;
///
/// let config = WatchConfig::default();
/// assert_eq!(config.latency_ms, 0);
/// assert!(config.file_events);
/// assert!(config.resume_from().is_none());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Absolute paths to watch recursively. Existence is not checked.
    pub paths: Vec<Utf8PathBuf>,

    /// How long the source may coalesce changes before delivering a batch.
    ///
    /// `0` requests immediate, uncoalesced delivery.
    pub latency_ms: u64,

    /// Event id to resume from. `None` tracks changes from now on.
    pub since: Option<EventId>,

    /// Whether to request per-item notifications.
    ///
    /// Without them most notifications arrive with an empty flag word and
    /// are classified as rescan requests for the containing directory.
    pub file_events: bool,
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            paths: Vec::new(),
            latency_ms: 0,
            since: None,
            file_events: true,
        }
    }
}

impl WatchConfig {
    /// Returns the coalescing latency as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn latency(&self) -> Duration {
        Duration::from_millis(self.latency_ms)
    }

    /// Returns the id to resume from, treating the "now" sentinel as absent.
    #[inline]
    #[must_use]
    pub fn resume_from(&self) -> Option<EventId> {
        self.since.filter(|id| !id.is_since_now())
    }

    /// Checks that the configuration can be handed to a watcher.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NoPaths`] for an empty path list,
    /// [`ConfigError::RelativePath`] for the first relative path, and
    /// [`ConfigError::InvalidOption`] for an out-of-range latency.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.paths.is_empty() {
            return Err(ConfigError::NoPaths);
        }
        if let Some(path) = self.paths.iter().find(|p| !p.is_absolute()) {
            return Err(ConfigError::RelativePath(path.clone()));
        }
        if self.latency_ms > MAX_LATENCY_MS {
            return Err(ConfigError::InvalidOption {
                option: "latency_ms".to_owned(),
                reason: format!("must not exceed {MAX_LATENCY_MS}"),
            });
        }
        Ok(())
    }
}

/// How delivered events are rendered by the CLI.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[non_exhaustive]
pub enum OutputFormat {
    /// One aligned `[ kind ] - path` line per event.
    #[default]
    Text,
    /// One JSON object per line.
    Json,
}

/// Configuration for event output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Output format.
    pub format: OutputFormat,

    /// Whether to print the raw flag word next to each event.
    pub show_flags: bool,
}

/// Root configuration for the fsw tool.
///
/// # Examples
///
/// ```
/// use fsw_core::Config;
///
/// let config: Config = serde_json::from_str(r#"{"watch": {"latency_ms": 50}}"#).unwrap();
/// assert_eq!(config.watch.latency_ms, 50);
/// assert!(config.watch.file_events);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Watcher configuration.
    pub watch: WatchConfig,

    /// Output configuration.
    pub output: OutputConfig,
}

impl Config {
    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read and
    /// [`ConfigError::Parse`] if it is not valid configuration JSON.
    pub fn from_json_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn watch_config(paths: &[&str]) -> WatchConfig {
        WatchConfig {
            paths: paths.iter().map(|p| Utf8PathBuf::from(*p)).collect(),
            ..WatchConfig::default()
        }
    }

    #[test]
    fn test_watch_config_defaults() {
        let config = WatchConfig::default();
        assert!(config.paths.is_empty());
        assert_eq!(config.latency(), Duration::ZERO);
        assert!(config.file_events);
        assert_eq!(config.since, None);
    }

    #[test]
    fn test_validate_rejects_empty_paths() {
        assert!(matches!(
            WatchConfig::default().validate(),
            Err(ConfigError::NoPaths)
        ));
    }

    #[test]
    fn test_validate_rejects_relative_paths() {
        let config = watch_config(&["/abs", "./dir1"]);
        match config.validate() {
            Err(ConfigError::RelativePath(path)) => assert_eq!(path, "./dir1"),
            other => panic!("expected RelativePath, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_rejects_huge_latency() {
        let mut config = watch_config(&["/abs"]);
        config.latency_ms = MAX_LATENCY_MS + 1;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidOption { .. })
        ));
    }

    #[test]
    fn test_validate_accepts_missing_paths() {
        // Existence is the source's concern, not the config's.
        let config = watch_config(&["/definitely/not/there"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_resume_from_ignores_sentinel() {
        let mut config = watch_config(&["/abs"]);
        config.since = Some(EventId::SINCE_NOW);
        assert_eq!(config.resume_from(), None);
        config.since = Some(EventId::new(12));
        assert_eq!(config.resume_from(), Some(EventId::new(12)));
    }

    #[test]
    fn test_config_serialization() {
        let mut config = Config::default();
        config.watch.paths.push(Utf8PathBuf::from("/tmp/watched"));
        config.watch.since = Some(EventId::new(9));
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_config_deserialize_with_missing_fields() {
        let json = r#"{"output": {"format": "json"}}"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.output.format, OutputFormat::Json);
        assert!(!config.output.show_flags);
        assert!(config.watch.file_events);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("fsw.json")).unwrap();
        std::fs::write(&path, r#"{"watch": {"paths": ["/a", "/b"], "since": 77}}"#).unwrap();

        let config = Config::from_json_file(&path).unwrap();
        assert_eq!(config.watch.paths.len(), 2);
        assert_eq!(config.watch.resume_from(), Some(EventId::new(77)));
    }

    #[test]
    fn test_from_json_file_reports_parse_errors() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("bad.json")).unwrap();
        std::fs::write(&path, "{ not json").unwrap();

        assert!(matches!(
            Config::from_json_file(&path),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_output_format_serialization() {
        insta::assert_snapshot!(serde_json::to_string(&OutputFormat::Json).unwrap(), @r#""json""#);
        insta::assert_snapshot!(serde_json::to_string(&OutputFormat::Text).unwrap(), @r#""text""#);
    }
}
