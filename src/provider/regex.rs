// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, NaiveDateTime, Utc};
use regex::Regex;
use std::path::PathBuf;

use super::traits::LogProvider;
use crate::entry::{ParsedLogEntry, Severity};
use crate::error::{Error, Result};

/// Lines indented, `at ...` frames, `--- End of ...` markers and
/// `Some.Exception: ...` headers are continuations by default
pub const DEFAULT_CONTINUATION_PATTERN: &str =
    r"^(?:\s|at\s|---|Caused by|[\w.$`]+(?:Exception|Error)\b)";

/// Capture groups mapped to entry fields; every other named group lands in metadata
const KNOWN_GROUPS: &[&str] = &[
    "timestamp",
    "level",
    "message",
    "source",
    "thread",
    "session",
    "user",
    "item",
];

/// Timestamp formats tried when no format is configured or it does not match
const FALLBACK_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
    "%b %d, %Y %H:%M:%S%.f",
];

/// A provider driven by a regular expression with named capture groups.
///
/// The `timestamp` and `message` groups are required; `level`, `source`,
/// `thread`, `session`, `user` and `item` are optional.
pub struct RegexProvider {
    name: String,
    regex: Regex,
    /// Names of the capture groups (excluding the full match)
    group_names: Vec<String>,
    /// Chrono format of the `timestamp` group
    timestamp_format: Option<String>,
    continuation: Regex,
    file_patterns: Vec<String>,
    default_paths: Vec<PathBuf>,
}

impl RegexProvider {
    pub fn new(name: impl Into<String>, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| Error::Regex(format!("invalid header pattern: {}", e)))?;

        let group_names: Vec<String> = regex
            .capture_names()
            .skip(1)
            .filter_map(|name| name.map(|s| s.to_string()))
            .collect();

        for required in ["timestamp", "message"] {
            if !group_names.iter().any(|g| g == required) {
                return Err(Error::Regex(format!(
                    "header pattern must contain a (?P<{}>...) group",
                    required
                )));
            }
        }

        let continuation = Regex::new(DEFAULT_CONTINUATION_PATTERN)
            .map_err(|e| Error::Regex(e.to_string()))?;

        Ok(Self {
            name: name.into(),
            regex,
            group_names,
            timestamp_format: None,
            continuation,
            file_patterns: vec!["*.log".to_string()],
            default_paths: Vec::new(),
        })
    }

    /// Parse the `timestamp` group with this chrono format
    pub fn with_timestamp_format(mut self, format: impl Into<String>) -> Self {
        self.timestamp_format = Some(format.into());
        self
    }

    /// Replace the continuation line pattern
    pub fn with_continuation(mut self, pattern: &str) -> Result<Self> {
        self.continuation = Regex::new(pattern)
            .map_err(|e| Error::Regex(format!("invalid continuation pattern: {}", e)))?;
        Ok(self)
    }

    pub fn with_file_patterns(mut self, patterns: Vec<String>) -> Self {
        self.file_patterns = patterns;
        self
    }

    pub fn with_default_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.default_paths = paths;
        self
    }

    pub fn group_names(&self) -> &[String] {
        &self.group_names
    }

    fn parse_timestamp(&self, value: &str) -> Option<DateTime<Utc>> {
        if let Some(format) = &self.timestamp_format {
            if let Ok(dt) = DateTime::parse_from_str(value, format) {
                return Some(dt.with_timezone(&Utc));
            }
            if let Ok(dt) = NaiveDateTime::parse_from_str(value, format) {
                return Some(dt.and_utc());
            }
        }

        if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
            return Some(dt.with_timezone(&Utc));
        }

        // no timezone information, assume UTC
        FALLBACK_TIMESTAMP_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
            .map(|dt| dt.and_utc())
    }
}

impl LogProvider for RegexProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn parse_header(&self, line: &str) -> Option<ParsedLogEntry> {
        let captures = self.regex.captures(line)?;

        let timestamp = self.parse_timestamp(captures.name("timestamp")?.as_str().trim())?;
        let level = captures
            .name("level")
            .map(|m| Severity::from_level(m.as_str()))
            .unwrap_or_default();
        let message = captures.name("message")?.as_str().trim_end();

        let mut entry = ParsedLogEntry::new(timestamp, level, message).with_raw(line);
        let text = |group: &str| {
            captures
                .name(group)
                .map(|m| m.as_str().trim())
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        entry.source = text("source");
        entry.thread = text("thread");
        entry.session_id = text("session");
        entry.user_id = text("user");
        entry.item_id = text("item");

        for name in &self.group_names {
            if KNOWN_GROUPS.contains(&name.as_str()) {
                continue;
            }
            if let Some(m) = captures.name(name) {
                entry.add_metadata(name.clone(), m.as_str());
            }
        }

        Some(entry)
    }

    fn is_continuation(&self, line: &str) -> bool {
        self.continuation.is_match(line)
    }

    fn file_patterns(&self) -> Vec<String> {
        self.file_patterns.clone()
    }

    fn default_paths(&self) -> Vec<PathBuf> {
        self.default_paths.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SIMPLE: &str =
        r"^(?P<timestamp>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}) (?P<level>\w+) (?P<message>.*)$";

    #[test]
    fn test_requires_timestamp_and_message_groups() {
        assert!(RegexProvider::new("x", r"^(?P<message>.*)$").is_err());
        assert!(RegexProvider::new("x", r"^(?P<timestamp>\S+)$").is_err());
        assert!(RegexProvider::new("x", r"^(?P<timestamp>\S+ (?P<message>.*)$").is_err());
        assert!(RegexProvider::new("x", SIMPLE).is_ok());
    }

    #[test]
    fn test_parse_header() {
        let provider = RegexProvider::new("simple", SIMPLE).unwrap();
        let entry = provider
            .parse_header("2024-01-15 10:30:45 WARN disk almost full")
            .unwrap();

        assert_eq!(
            entry.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 45).unwrap()
        );
        assert_eq!(entry.level, Severity::Warning);
        assert_eq!(entry.message, "disk almost full");
        assert_eq!(entry.raw, "2024-01-15 10:30:45 WARN disk almost full");
    }

    #[test]
    fn test_unparseable_timestamp_is_not_a_header() {
        let provider = RegexProvider::new(
            "simple",
            r"^(?P<timestamp>\S+) (?P<message>.*)$",
        )
        .unwrap();
        assert!(provider.parse_header("yesterday something happened").is_none());
    }

    #[test]
    fn test_configured_format_with_offset() {
        let provider = RegexProvider::new(
            "tz",
            r"^\[(?P<timestamp>[^\]]+)\] (?P<message>.*)$",
        )
        .unwrap()
        .with_timestamp_format("%Y-%m-%d %H:%M:%S%.3f %:z");

        let entry = provider
            .parse_header("[2024-01-15 12:00:00.500 +02:00] hello")
            .unwrap();
        assert_eq!(
            entry.timestamp,
            Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap()
                + chrono::Duration::milliseconds(500)
        );
    }

    #[test]
    fn test_extra_groups_become_metadata() {
        let provider = RegexProvider::new(
            "meta",
            r"^(?P<timestamp>\S+T\S+) (?P<request_id>\w+) (?P<user>\w+) (?P<message>.*)$",
        )
        .unwrap();
        let entry = provider
            .parse_header("2024-01-15T10:30:45Z abc123 alice logged in")
            .unwrap();

        assert_eq!(entry.user_id.as_deref(), Some("alice"));
        assert_eq!(entry.metadata.get("request_id").unwrap(), "abc123");
        assert!(!entry.metadata.contains_key("user"));
        assert_eq!(entry.level, Severity::Unknown);
    }

    #[test]
    fn test_default_continuation() {
        let provider = RegexProvider::new("simple", SIMPLE).unwrap();
        assert!(provider.is_continuation("   at Foo.Bar() in Foo.cs:line 10"));
        assert!(provider.is_continuation("\tmore text"));
        assert!(provider.is_continuation("System.InvalidOperationException: nope"));
        assert!(provider.is_continuation("--- End of inner exception stack trace ---"));
        assert!(!provider.is_continuation("random garbage"));
    }

    #[test]
    fn test_custom_continuation() {
        let provider = RegexProvider::new("simple", SIMPLE)
            .unwrap()
            .with_continuation(r"^\+")
            .unwrap();
        assert!(provider.is_continuation("+ more"));
        assert!(!provider.is_continuation("   indented"));
        assert!(RegexProvider::new("simple", SIMPLE)
            .unwrap()
            .with_continuation("(")
            .is_err());
    }
}
