// SPDX-License-Identifier: Apache-2.0

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Mutex;

use super::{EntryRecord, EntrySink};
use crate::entry::DeduplicationKey;
use crate::error::{Error, Result};
use crate::source::SourceId;

#[derive(Default)]
struct Inner {
    keys: HashSet<(SourceId, DeduplicationKey)>,
    records: Vec<EntryRecord>,
}

/// Keeps every inserted record in memory
#[derive(Default)]
pub struct MemoryEntrySink {
    inner: Mutex<Inner>,
}

impl MemoryEntrySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<EntryRecord> {
        self.inner
            .lock()
            .map(|inner| inner.records.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn count_for(&self, source: &SourceId) -> usize {
        self.inner
            .lock()
            .map(|i| i.records.iter().filter(|r| &r.source_id == source).count())
            .unwrap_or(0)
    }
}

#[async_trait]
impl EntrySink for MemoryEntrySink {
    async fn insert_batch(&self, records: &[EntryRecord]) -> Result<Vec<EntryRecord>> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|e| Error::Sink(e.to_string()))?;

        let mut inserted = Vec::new();
        for record in records {
            if inner.keys.insert(record.unique_key()) {
                inner.records.push(record.clone());
                inserted.push(record.clone());
            }
        }
        Ok(inserted)
    }
}
