// SPDX-License-Identifier: Apache-2.0

//! Where ingested entries and progress go.
//!
//! - [`EntrySink`] persists entries with insert-or-ignore semantics keyed by
//!   (source, deduplication key)
//! - [`EventSink`] receives progress and newly inserted entries; publishing
//!   never blocks

mod events;
mod jsonl;
mod memory;

pub use events::{BroadcastEventSink, EventSink, IngestEvent, NoopEventSink};
pub use jsonl::JsonLinesEntrySink;
pub use memory::MemoryEntrySink;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::entry::{DeduplicationKey, ParsedLogEntry};
use crate::error::Result;
use crate::source::SourceId;

/// An entry ready for persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryRecord {
    pub source_id: SourceId,
    pub file_path: PathBuf,
    pub dedup_key: DeduplicationKey,
    pub entry: ParsedLogEntry,
}

impl EntryRecord {
    pub fn new(source_id: SourceId, file_path: PathBuf, entry: ParsedLogEntry) -> Self {
        Self {
            dedup_key: entry.dedup_key(),
            source_id,
            file_path,
            entry,
        }
    }

    /// Uniqueness key in the store
    pub fn unique_key(&self) -> (SourceId, DeduplicationKey) {
        (self.source_id.clone(), self.dedup_key.clone())
    }
}

#[async_trait]
pub trait EntrySink: Send + Sync {
    /// Insert the records that are not stored yet and return them. Records
    /// whose (source, key) already exists, in the store or earlier in the same
    /// batch, are ignored.
    async fn insert_batch(&self, records: &[EntryRecord]) -> Result<Vec<EntryRecord>>;
}
