// SPDX-License-Identifier: Apache-2.0

//! Append-only JSON lines entry store.
//!
//! Every inserted record is one line. The dedup index is rebuilt from the file
//! on open, so insert-or-ignore holds across restarts.

use async_trait::async_trait;
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::{EntryRecord, EntrySink};
use crate::entry::DeduplicationKey;
use crate::error::{Error, Result};
use crate::source::SourceId;

struct Inner {
    file: File,
    keys: HashSet<(SourceId, DeduplicationKey)>,
    /// The file may end in a partial line
    torn: bool,
}

impl Inner {
    fn append(&mut self, records: &[EntryRecord]) -> Result<()> {
        let mut writer = BufWriter::new(&self.file);
        if self.torn {
            writer.write_all(b"\n")?;
        }
        for record in records {
            serde_json::to_writer(&mut writer, record)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
        Ok(())
    }
}

fn ends_with_newline(file: &mut File) -> io::Result<bool> {
    if file.metadata()?.len() == 0 {
        return Ok(true);
    }
    file.seek(SeekFrom::End(-1))?;
    let mut last = [0u8; 1];
    file.read_exact(&mut last)?;
    Ok(last[0] == b'\n')
}

pub struct JsonLinesEntrySink {
    path: PathBuf,
    inner: Arc<Mutex<Inner>>,
}

impl JsonLinesEntrySink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut keys = HashSet::new();
        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for (n, line) in reader.lines().enumerate() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<EntryRecord>(&line) {
                    Ok(record) => {
                        keys.insert(record.unique_key());
                    }
                    Err(e) => {
                        // a torn final line from a crash mid-write
                        warn!(path = ?path, line = n + 1, error = %e, "Skipping unreadable entry line");
                    }
                }
            }
        }
        debug!(path = ?path, entries = keys.len(), "Opened entry store");

        let mut file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;
        let torn = !ends_with_newline(&mut file)?;
        if torn {
            // terminate the partial line so the next record starts on its own
            file.write_all(b"\n")?;
        }
        Ok(Self {
            path,
            inner: Arc::new(Mutex::new(Inner {
                file,
                keys,
                torn: false,
            })),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.keys.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EntrySink for JsonLinesEntrySink {
    async fn insert_batch(&self, records: &[EntryRecord]) -> Result<Vec<EntryRecord>> {
        let inner = self.inner.clone();
        let records = records.to_vec();

        tokio::task::spawn_blocking(move || -> Result<Vec<EntryRecord>> {
            let mut inner = inner.lock().map_err(|e| Error::Sink(e.to_string()))?;

            let mut fresh = Vec::new();
            let mut batch_keys = HashSet::new();
            for record in records {
                let key = record.unique_key();
                if !inner.keys.contains(&key) && batch_keys.insert(key) {
                    fresh.push(record);
                }
            }
            if fresh.is_empty() {
                return Ok(fresh);
            }

            if let Err(e) = inner.append(&fresh) {
                inner.torn = true;
                return Err(e);
            }
            inner.torn = false;

            // only index what made it to the file
            for record in &fresh {
                inner.keys.insert(record.unique_key());
            }
            Ok(fresh)
        })
        .await
        .map_err(|e| Error::Sink(format!("insert task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::{ParsedLogEntry, Severity};
    use chrono::{TimeZone, Utc};
    use tempfile::TempDir;

    fn record(message: &str) -> EntryRecord {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        EntryRecord::new(
            SourceId::new("jf"),
            "/logs/a.log".into(),
            ParsedLogEntry::new(ts, Severity::Warning, message),
        )
    }

    #[tokio::test]
    async fn test_dedup_survives_reopen() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("entries.jsonl");

        {
            let sink = JsonLinesEntrySink::open(&path).unwrap();
            let inserted = sink
                .insert_batch(&[record("one"), record("two"), record("two")])
                .await
                .unwrap();
            assert_eq!(inserted.len(), 2);
        }

        let sink = JsonLinesEntrySink::open(&path).unwrap();
        assert_eq!(sink.len(), 2);
        let inserted = sink
            .insert_batch(&[record("two"), record("three")])
            .await
            .unwrap();
        assert_eq!(inserted.len(), 1);
        assert_eq!(inserted[0].entry.message, "three");

        let lines = fs::read_to_string(&path).unwrap();
        assert_eq!(lines.lines().count(), 3);
    }

    #[tokio::test]
    async fn test_torn_line_is_skipped_on_open() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("entries.jsonl");

        {
            let sink = JsonLinesEntrySink::open(&path).unwrap();
            sink.insert_batch(&[record("one")]).await.unwrap();
        }
        let mut f = OpenOptions::new().append(true).open(&path).unwrap();
        f.write_all(b"{\"source_id\":\"jf\",\"fi").unwrap();

        let sink = JsonLinesEntrySink::open(&path).unwrap();
        assert_eq!(sink.len(), 1);
        sink.insert_batch(&[record("two")]).await.unwrap();
        drop(sink);

        // the record written after the torn line stays readable
        let sink = JsonLinesEntrySink::open(&path).unwrap();
        assert_eq!(sink.len(), 2);
        let inserted = sink.insert_batch(&[record("two")]).await.unwrap();
        assert!(inserted.is_empty());
        assert!(fs::read_to_string(&path).unwrap().ends_with('\n'));
    }
}
