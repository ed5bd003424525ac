// SPDX-License-Identifier: Apache-2.0

//! Source identity and per-source configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::provider::ProviderKind;

/// Identifier of a configured log source (one server instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for SourceId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identity of one tailed file: the owning source plus the file path.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FileKey {
    pub source_id: SourceId,
    pub path: PathBuf,
}

impl FileKey {
    pub fn new(source_id: SourceId, path: impl Into<PathBuf>) -> Self {
        Self {
            source_id,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl fmt::Display for FileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.source_id, self.path.display())
    }
}

/// Where to start reading a file that has no persisted state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StartAt {
    /// Backfill from byte 0
    #[default]
    Beginning,
    /// Only ingest content appended from now on
    End,
}

impl StartAt {
    pub fn is_end(&self) -> bool {
        matches!(self, StartAt::End)
    }
}

/// Configuration of a single log source
#[derive(Debug, Clone, Deserialize)]
pub struct SourceConfig {
    /// Unique source identifier
    pub id: SourceId,

    /// Log grammar used for this source
    pub provider: ProviderKind,

    /// Regex with named groups (when provider is `regex`)
    #[serde(default)]
    pub pattern: Option<String>,

    /// Chrono format of the `timestamp` group (when provider is `regex`)
    #[serde(default)]
    pub timestamp_format: Option<String>,

    /// Directories (or files) to search; empty means the provider defaults
    #[serde(default)]
    pub log_paths: Vec<PathBuf>,

    /// Glob patterns overriding the provider's file patterns
    #[serde(default)]
    pub file_patterns: Vec<String>,

    /// Glob patterns for files to exclude
    #[serde(default)]
    pub exclude: Vec<String>,

    /// Where to start reading files seen for the first time
    #[serde(default)]
    pub start_at: StartAt,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

impl SourceConfig {
    pub fn new(id: impl Into<SourceId>, provider: ProviderKind) -> Self {
        Self {
            id: id.into(),
            provider,
            pattern: None,
            timestamp_format: None,
            log_paths: Vec::new(),
            file_patterns: Vec::new(),
            exclude: Vec::new(),
            start_at: StartAt::default(),
            enabled: true,
        }
    }

    pub fn with_log_paths(mut self, paths: impl IntoIterator<Item = impl Into<PathBuf>>) -> Self {
        self.log_paths = paths.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_file_patterns(mut self, patterns: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.file_patterns = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn with_start_at(mut self, start_at: StartAt) -> Self {
        self.start_at = start_at;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), String> {
        if self.id.as_str().trim().is_empty() {
            return Err("source id cannot be empty".to_string());
        }

        if self.provider == ProviderKind::Regex && self.pattern.is_none() {
            return Err(format!(
                "source '{}': pattern must be specified when provider is 'regex'",
                self.id
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_key_display() {
        let key = FileKey::new(SourceId::new("jf"), "/var/log/a.log");
        assert_eq!(key.to_string(), "jf:/var/log/a.log");
    }

    #[test]
    fn test_source_config_validation() {
        let config = SourceConfig::new("arr", ProviderKind::Arr);
        assert!(config.validate().is_ok());

        let config = SourceConfig::new("custom", ProviderKind::Regex);
        assert!(config.validate().is_err());

        let config = config.with_pattern(r"^(?P<message>.*)$");
        assert!(config.validate().is_ok());

        let config = SourceConfig::new("  ", ProviderKind::Plex);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_source_config_deserialize_defaults() {
        let config: SourceConfig =
            serde_json::from_str(r#"{"id":"jf","provider":"jellyfin"}"#).unwrap();
        assert_eq!(config.id.as_str(), "jf");
        assert_eq!(config.provider, ProviderKind::Jellyfin);
        assert_eq!(config.start_at, StartAt::Beginning);
        assert!(config.enabled);
        assert!(config.log_paths.is_empty());
    }
}
