// SPDX-License-Identifier: Apache-2.0

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

use super::dedup::DeduplicationKey;
use super::severity::Severity;

/// One logical log event, possibly assembled from several physical lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParsedLogEntry {
    /// When the event occurred
    pub timestamp: DateTime<Utc>,

    #[serde(default)]
    pub level: Severity,

    pub message: String,

    /// Component or category that logged the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_id: Option<String>,

    /// Original text of every merged line, newline separated
    pub raw: String,

    /// Extra named captures of the grammar
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, Value>,

    /// Exception line found among the continuation lines
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exception: Option<String>,

    /// Continuation lines (stack frames, wrapped text)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stack_trace: Option<String>,

    /// 1-based line number of the header line
    pub line_number: u64,

    /// Physical lines merged into this entry
    pub line_count: u32,
}

impl ParsedLogEntry {
    pub fn new(timestamp: DateTime<Utc>, level: Severity, message: impl Into<String>) -> Self {
        let message = message.into();
        Self {
            timestamp,
            level,
            raw: message.clone(),
            message,
            source: None,
            thread: None,
            session_id: None,
            user_id: None,
            item_id: None,
            metadata: HashMap::new(),
            exception: None,
            stack_trace: None,
            line_number: 0,
            line_count: 1,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn with_raw(mut self, raw: impl Into<String>) -> Self {
        self.raw = raw.into();
        self
    }

    pub fn add_metadata(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.metadata.insert(key.into(), value.into());
    }

    /// Merge a continuation line into this entry.
    pub fn append_continuation(&mut self, line: &str) {
        self.raw.push('\n');
        self.raw.push_str(line);

        match &mut self.stack_trace {
            Some(trace) => {
                trace.push('\n');
                trace.push_str(line);
            }
            None => self.stack_trace = Some(line.to_string()),
        }

        if self.exception.is_none() && looks_like_exception(line) {
            self.exception = Some(line.trim().to_string());
        }
        self.line_count += 1;
    }

    pub fn dedup_key(&self) -> DeduplicationKey {
        DeduplicationKey::from_entry(self)
    }
}

/// `System.IO.IOException: ...`, `java.lang.NullPointerException`, `Error: ...`
fn looks_like_exception(line: &str) -> bool {
    let head = line
        .trim_start()
        .split(|c: char| c == ':' || c.is_whitespace())
        .next()
        .unwrap_or_default();
    head.ends_with("Exception") || head.ends_with("Error")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry() -> ParsedLogEntry {
        ParsedLogEntry::new(Utc::now(), Severity::Error, "Playback failed")
    }

    #[test]
    fn test_new_entry() {
        let e = entry();
        assert_eq!(e.raw, "Playback failed");
        assert_eq!(e.line_count, 1);
        assert!(e.stack_trace.is_none());
    }

    #[test]
    fn test_append_continuation() {
        let mut e = entry();
        e.append_continuation("System.IO.IOException: disk gone");
        e.append_continuation("   at Foo.Bar()");

        assert_eq!(e.line_count, 3);
        assert_eq!(
            e.raw,
            "Playback failed\nSystem.IO.IOException: disk gone\n   at Foo.Bar()"
        );
        assert_eq!(
            e.stack_trace.as_deref(),
            Some("System.IO.IOException: disk gone\n   at Foo.Bar()")
        );
        assert_eq!(
            e.exception.as_deref(),
            Some("System.IO.IOException: disk gone")
        );
    }

    #[test]
    fn test_continuation_without_exception() {
        let mut e = entry();
        e.append_continuation("  wrapped text");
        assert!(e.exception.is_none());
    }

    #[test]
    fn test_serialize_skips_empty_fields() {
        let json = serde_json::to_value(entry()).unwrap();
        assert_eq!(json["level"], "error");
        assert!(json.get("source").is_none());
        assert!(json.get("metadata").is_none());
    }

    #[test]
    fn test_dedup_key_ignores_raw_text() {
        let a = entry();
        let b = a.clone().with_raw("different raw text");
        assert_eq!(a.dedup_key(), b.dedup_key());
    }
}
