// SPDX-License-Identifier: Apache-2.0

//! Content fingerprint used to discard entries that were already ingested.
//!
//! The key is derived from what the entry says rather than where it was read,
//! so re-reading a file after a reset yields the same keys.

use chrono::{DateTime, Utc};
use cityhash_rs::cityhash_102_128;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ParsedLogEntry, Severity};

/// Bytes of the message that take part in the key
pub const MESSAGE_PREFIX_BYTES: usize = 256;

const FIELD_SEPARATOR: u8 = 0x1f;

/// 128-bit content hash rendered as 32 lowercase hex characters
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeduplicationKey(String);

impl DeduplicationKey {
    /// Hash (second-precision timestamp, level, source, message prefix)
    pub fn compute(
        timestamp: &DateTime<Utc>,
        level: Severity,
        source: Option<&str>,
        message: &str,
    ) -> Self {
        let mut buf = Vec::with_capacity(64 + MESSAGE_PREFIX_BYTES);
        buf.extend_from_slice(timestamp.timestamp().to_string().as_bytes());
        buf.push(FIELD_SEPARATOR);
        buf.extend_from_slice(level.as_str().as_bytes());
        buf.push(FIELD_SEPARATOR);
        buf.extend_from_slice(source.unwrap_or_default().as_bytes());
        buf.push(FIELD_SEPARATOR);
        buf.extend_from_slice(message_prefix(message).as_bytes());

        Self(format!("{:032x}", cityhash_102_128(&buf)))
    }

    pub fn from_entry(entry: &ParsedLogEntry) -> Self {
        Self::compute(
            &entry.timestamp,
            entry.level,
            entry.source.as_deref(),
            &entry.message,
        )
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeduplicationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// First `MESSAGE_PREFIX_BYTES` of the message, cut on a char boundary
fn message_prefix(message: &str) -> &str {
    if message.len() <= MESSAGE_PREFIX_BYTES {
        return message;
    }
    let mut cut = MESSAGE_PREFIX_BYTES;
    while !message.is_char_boundary(cut) {
        cut -= 1;
    }
    &message[..cut]
}
