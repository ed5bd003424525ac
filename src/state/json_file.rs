// SPDX-License-Identifier: Apache-2.0

//! JSON file backed state store with atomic writes.
//!
//! The whole table lives in memory behind a lock; `persist` serializes a
//! snapshot to a temp file and renames it over the state file.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};

use portable_atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use super::schema::PersistedState;
use super::{FileReadState, FileStatePatch, FileStateStore, StateSnapshot, count_lines};
use crate::error::{Error, Result};
use crate::file_id::FileStat;
use crate::source::{FileKey, SourceId};

pub struct JsonFileStateStore {
    /// None for an in-memory store
    path: Option<PathBuf>,
    files: RwLock<HashMap<FileKey, FileReadState>>,
    generation: AtomicU64,
    /// Generation of the last snapshot written to disk
    persisted: Mutex<u64>,
}

impl JsonFileStateStore {
    /// Open or create a store at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        let document = if path.exists() {
            let bytes = fs::read(&path)
                .map_err(|e| Error::Persistence(format!("failed to open state file: {}", e)))?;
            PersistedState::from_slice(&bytes).map_err(|e| {
                Error::Persistence(format!(
                    "failed to parse state file {}: {}; delete it to start fresh",
                    path.display(),
                    e
                ))
            })?
        } else {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent).map_err(|e| {
                        Error::Persistence(format!("failed to create state directory: {}", e))
                    })?;
                }
            }
            PersistedState::default()
        };

        let files: HashMap<_, _> = document
            .files
            .into_values()
            .map(|state| (state.key(), state))
            .collect();
        debug!(path = ?path, files = files.len(), "Opened file state store");

        Ok(Self {
            path: Some(path),
            files: RwLock::new(files),
            generation: AtomicU64::new(0),
            persisted: Mutex::new(0),
        })
    }

    /// Create a store that never touches disk (useful for testing)
    pub fn open_memory() -> Self {
        Self {
            path: None,
            files: RwLock::new(HashMap::new()),
            generation: AtomicU64::new(0),
            persisted: Mutex::new(0),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn read_files(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<FileKey, FileReadState>>> {
        self.files
            .read()
            .map_err(|e| Error::Persistence(e.to_string()))
    }

    fn write_files(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<FileKey, FileReadState>>> {
        self.files
            .write()
            .map_err(|e| Error::Persistence(e.to_string()))
    }
}

impl FileStateStore for JsonFileStateStore {
    fn get(&self, key: &FileKey) -> Result<Option<FileReadState>> {
        Ok(self.read_files()?.get(key).cloned())
    }

    fn create(&self, key: &FileKey, start_at_end: bool) -> Result<FileReadState> {
        if let Some(existing) = self.get(key)? {
            return Ok(existing);
        }

        let mut state = FileReadState::new(key);
        match FileStat::read(&key.path) {
            Ok(stat) => {
                state.file_inode = Some(stat.inode());
                if start_at_end {
                    state.byte_offset = stat.size;
                    state.file_size = stat.size;
                    state.line_number = count_lines(&key.path, stat.size)?;
                }
            }
            Err(e) => {
                // the tailer reports missing files; the state simply starts empty
                debug!(file = %key, error = %e, "Creating state for unreadable file");
            }
        }

        let mut files = self.write_files()?;
        // another task may have raced us between the read and write locks
        let state = files.entry(key.clone()).or_insert(state).clone();
        Ok(state)
    }

    fn update(&self, key: &FileKey, patch: FileStatePatch) -> Result<()> {
        let mut files = self.write_files()?;
        let state = files
            .entry(key.clone())
            .or_insert_with(|| FileReadState::new(key));
        state.apply(patch).map_err(Error::Persistence)
    }

    fn reset(&self, key: &FileKey) -> Result<()> {
        let mut files = self.write_files()?;
        if let Some(state) = files.get_mut(key) {
            state.byte_offset = 0;
            state.line_number = 0;
            state.file_size = 0;
            state.file_inode = None;
            state.last_error = None;
        }
        Ok(())
    }

    fn record_error(&self, key: &FileKey, message: &str) -> Result<()> {
        let mut files = self.write_files()?;
        let state = files
            .entry(key.clone())
            .or_insert_with(|| FileReadState::new(key));
        state.last_error = Some(message.to_string());
        Ok(())
    }

    fn list_for_source(&self, source: &SourceId) -> Result<Vec<FileReadState>> {
        let files = self.read_files()?;
        let mut states: Vec<_> = files
            .values()
            .filter(|s| &s.source_id == source)
            .cloned()
            .collect();
        states.sort_by(|a, b| a.file_path.cmp(&b.file_path));
        Ok(states)
    }

    fn list_all(&self) -> Result<Vec<FileReadState>> {
        let files = self.read_files()?;
        let mut states: Vec<_> = files.values().cloned().collect();
        states.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(states)
    }

    fn delete_for_source(&self, source: &SourceId) -> Result<usize> {
        let mut files = self.write_files()?;
        let before = files.len();
        files.retain(|key, _| &key.source_id != source);
        Ok(before - files.len())
    }

    fn snapshot(&self) -> Result<StateSnapshot> {
        let files = self.read_files()?;
        // taken under the lock so generations order the same way as contents
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(StateSnapshot {
            generation,
            document: PersistedState::from_states(files.values()),
        })
    }

    fn persist(&self, snapshot: &StateSnapshot) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };

        let mut persisted = self
            .persisted
            .lock()
            .map_err(|e| Error::Persistence(e.to_string()))?;
        if snapshot.generation < *persisted {
            warn!(
                generation = snapshot.generation,
                persisted = *persisted,
                "Discarding stale state snapshot"
            );
            return Ok(());
        }

        atomic_write(path, &snapshot.document)?;
        *persisted = snapshot.generation;
        Ok(())
    }
}

/// Write state to file atomically (write to temp, then rename)
fn atomic_write(path: &Path, document: &PersistedState) -> Result<()> {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            fs::create_dir_all(parent).map_err(|e| {
                Error::Persistence(format!("failed to create parent directory: {}", e))
            })?;
        }
    }

    let unique_id = COUNTER.fetch_add(1, Ordering::SeqCst);
    let temp_path = path.with_extension(format!("tmp.{}.{}", std::process::id(), unique_id));

    let file = File::create(&temp_path)
        .map_err(|e| Error::Persistence(format!("failed to create temp file: {}", e)))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, document)
        .map_err(|e| Error::Persistence(format!("failed to write state: {}", e)))?;
    writer
        .flush()
        .map_err(|e| Error::Persistence(format!("failed to flush state: {}", e)))?;
    writer
        .get_ref()
        .sync_all()
        .map_err(|e| Error::Persistence(format!("failed to sync state: {}", e)))?;
    drop(writer);

    fs::rename(&temp_path, path)
        .map_err(|e| Error::Persistence(format!("failed to rename state file: {}", e)))?;

    Ok(())
}
