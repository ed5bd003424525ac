// SPDX-License-Identifier: Apache-2.0

//! Durable per-file read positions.
//!
//! The state store is the only durable record of how far each file has been
//! ingested. Mutations happen in memory; `snapshot` + `persist` write them out,
//! which lets the checkpoint path order the write after the entries it covers
//! have reached the sink.

mod json_file;
pub mod schema;

pub use json_file::JsonFileStateStore;
pub use schema::{PersistedState, STATE_VERSION};

use std::fs::File;
use std::io::{self, BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::source::{FileKey, SourceId};

/// Last known read position of one file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReadState {
    pub source_id: SourceId,
    pub file_path: PathBuf,
    /// Bytes consumed so far
    pub byte_offset: u64,
    /// Lines consumed so far
    pub line_number: u64,
    /// File size observed at the last read
    pub file_size: u64,
    /// Platform file identity ("dev:ino"), if known
    pub file_inode: Option<String>,
    pub last_read_at: Option<DateTime<Utc>>,
    pub is_active: bool,
    pub last_error: Option<String>,
}

impl FileReadState {
    pub fn new(key: &FileKey) -> Self {
        Self {
            source_id: key.source_id.clone(),
            file_path: key.path.clone(),
            byte_offset: 0,
            line_number: 0,
            file_size: 0,
            file_inode: None,
            last_read_at: None,
            is_active: true,
            last_error: None,
        }
    }

    pub fn key(&self) -> FileKey {
        FileKey::new(self.source_id.clone(), self.file_path.clone())
    }

    /// Apply a patch. Returns an error message when the patch would move the
    /// offset backwards on an unchanged file.
    fn apply(&mut self, patch: FileStatePatch) -> std::result::Result<(), String> {
        let inode_changed = match (&patch.file_inode, &self.file_inode) {
            (Some(new), Some(old)) => new != old,
            _ => false,
        };

        if let Some(offset) = patch.byte_offset {
            if offset < self.byte_offset && !inode_changed {
                return Err(format!(
                    "offset regression for {} ({} < {}) without an identity change",
                    self.file_path.display(),
                    offset,
                    self.byte_offset
                ));
            }
            if offset > self.byte_offset {
                self.last_error = None;
            }
            self.byte_offset = offset;
        }
        if let Some(line) = patch.line_number {
            self.line_number = line;
        }
        if let Some(size) = patch.file_size {
            self.file_size = size;
        }
        if let Some(inode) = patch.file_inode {
            self.file_inode = Some(inode);
        }
        if let Some(active) = patch.is_active {
            self.is_active = active;
        }
        self.last_read_at = Some(Utc::now());
        Ok(())
    }
}

/// Partial update of a [`FileReadState`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileStatePatch {
    pub byte_offset: Option<u64>,
    pub line_number: Option<u64>,
    pub file_size: Option<u64>,
    pub file_inode: Option<String>,
    pub is_active: Option<bool>,
}

impl FileStatePatch {
    pub fn position(offset: u64, line: u64) -> Self {
        Self {
            byte_offset: Some(offset),
            line_number: Some(line),
            ..Default::default()
        }
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.file_size = Some(size);
        self
    }

    pub fn with_inode(mut self, inode: impl Into<String>) -> Self {
        self.file_inode = Some(inode.into());
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.is_active = Some(active);
        self
    }
}

/// Point-in-time copy of the whole table, ready to be persisted
#[derive(Debug, Clone, PartialEq)]
pub struct StateSnapshot {
    /// Monotonic; a snapshot older than the last persisted one is discarded
    pub generation: u64,
    pub document: PersistedState,
}

impl StateSnapshot {
    pub fn len(&self) -> usize {
        self.document.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.document.files.is_empty()
    }
}

/// Storage of per-file read positions.
///
/// Operations on different keys are independent and may be called from
/// concurrent tasks.
pub trait FileStateStore: Send + Sync {
    fn get(&self, key: &FileKey) -> Result<Option<FileReadState>>;

    /// Create the state for a file seen for the first time. With
    /// `start_at_end` the position is the current end of the file, otherwise
    /// byte 0. An existing state is returned unchanged.
    fn create(&self, key: &FileKey, start_at_end: bool) -> Result<FileReadState>;

    /// Update (or insert) the state of a file.
    fn update(&self, key: &FileKey, patch: FileStatePatch) -> Result<()>;

    /// Rewind to the start of the file and forget its identity.
    fn reset(&self, key: &FileKey) -> Result<()>;

    fn record_error(&self, key: &FileKey, message: &str) -> Result<()>;

    fn list_for_source(&self, source: &SourceId) -> Result<Vec<FileReadState>>;

    fn list_all(&self) -> Result<Vec<FileReadState>>;

    /// Remove every state of a source, returning how many were removed.
    fn delete_for_source(&self, source: &SourceId) -> Result<usize>;

    fn snapshot(&self) -> Result<StateSnapshot>;

    /// Write a snapshot to durable storage.
    fn persist(&self, snapshot: &StateSnapshot) -> Result<()>;
}

/// Count newline terminated lines in the first `limit` bytes of a file.
pub(crate) fn count_lines(path: &Path, limit: u64) -> io::Result<u64> {
    let file = File::open(path)?;
    let mut reader = BufReader::new(file.take(limit));
    let mut lines = 0;
    loop {
        let buf = reader.fill_buf()?;
        if buf.is_empty() {
            break;
        }
        lines += buf.iter().filter(|b| **b == b'\n').count() as u64;
        let len = buf.len();
        reader.consume(len);
    }
    Ok(lines)
}
