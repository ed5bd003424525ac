// SPDX-License-Identifier: Apache-2.0

//! Tails one log file.
//!
//! A tailer resumes from a persisted position, catches up with everything
//! already in the file, reports `InitialReadComplete` once, and then polls the
//! file for growth, truncation and replacement. Everything it learns is sent
//! as [`TailerEvent`]s on a channel shared by all tailers of a source; events
//! of one file keep their order, and a `StateChanged` always follows the
//! entries it covers.
//!
//! Phases: `Idle -> InitialRead -> Watching <-> (Rotated -> InitialRead) -> Stopped`

use std::io;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use tokio::select;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::assembler::{AssemblerStats, EntryAssembler};
use crate::bounded_channel::{BoundedSender, SendError};
use crate::entry::ParsedLogEntry;
use crate::file_id::FileStat;
use crate::provider::LogProvider;
use crate::reader::{LineReader, ReadChunk};
use crate::source::FileKey;
use crate::state::FileReadState;

/// Lifecycle phase of a tailer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TailerPhase {
    #[default]
    Idle,
    InitialRead,
    Watching,
    Rotated,
    Stopped,
}

/// Why a file is considered rotated
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RotationReason {
    /// The path now refers to a different file
    IdentityChanged,
    /// The file is smaller than the read position
    Truncated,
}

/// Serializable view of a tailer's position
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TailerState {
    /// Position safe to persist: never past the first byte of an entry that
    /// has not been emitted yet
    pub byte_offset: u64,
    pub line_number: u64,
    pub file_size: u64,
    pub file_inode: Option<String>,
    pub is_active: bool,
    pub phase: TailerPhase,
}

#[derive(Debug, Clone)]
pub enum TailerEvent {
    EntryRead {
        key: FileKey,
        entry: ParsedLogEntry,
    },
    RotationDetected {
        key: FileKey,
        reason: RotationReason,
        previous_inode: Option<String>,
        current_inode: Option<String>,
    },
    ReadError {
        key: FileKey,
        error: String,
    },
    StateChanged {
        key: FileKey,
        state: TailerState,
    },
    InitialReadComplete {
        key: FileKey,
        bytes_read: u64,
    },
    Stopped {
        key: FileKey,
        state: TailerState,
        stats: AssemblerStats,
    },
}

impl TailerEvent {
    pub fn key(&self) -> &FileKey {
        match self {
            TailerEvent::EntryRead { key, .. }
            | TailerEvent::RotationDetected { key, .. }
            | TailerEvent::ReadError { key, .. }
            | TailerEvent::StateChanged { key, .. }
            | TailerEvent::InitialReadComplete { key, .. }
            | TailerEvent::Stopped { key, .. } => key,
        }
    }
}

/// Tuning of a tailer
#[derive(Debug, Clone)]
pub struct TailerConfig {
    pub poll_interval: Duration,
    /// Idle time after which a pending multi-line entry is emitted
    pub multiline_flush: Duration,
    pub max_line_bytes: usize,
    pub max_entry_bytes: usize,
    pub max_read_bytes: u64,
}

impl Default for TailerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            multiline_flush: Duration::from_millis(2000),
            max_line_bytes: 64 * 1024,
            max_entry_bytes: 256 * 1024,
            max_read_bytes: 4 * 1024 * 1024,
        }
    }
}

/// Handle to a running tailer task
pub struct TailerHandle {
    key: FileKey,
    cancel: CancellationToken,
    state_rx: watch::Receiver<TailerState>,
    join: JoinHandle<()>,
}

impl TailerHandle {
    pub fn key(&self) -> &FileKey {
        &self.key
    }

    pub fn state(&self) -> TailerState {
        self.state_rx.borrow().clone()
    }

    pub fn phase(&self) -> TailerPhase {
        self.state_rx.borrow().phase
    }

    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Ask the tailer to stop without waiting for it.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop the tailer and wait until it has sent its final events.
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.join.await {
            warn!(file = %self.key, error = %e, "Tailer task failed");
        }
    }
}

pub struct FileTailer {
    key: FileKey,
    config: TailerConfig,
    reader: LineReader,
    assembler: EntryAssembler,
    events: BoundedSender<TailerEvent>,
    state_tx: watch::Sender<TailerState>,

    offset: u64,
    line: u64,
    size: u64,
    inode: Option<String>,
    phase: TailerPhase,

    /// Last time new bytes showed up
    last_data_at: Instant,
    /// Last error reported, so a persistent failure is reported once
    last_error: Option<String>,
    /// Last state sent, to skip redundant updates
    last_sent: Option<TailerState>,
}

impl FileTailer {
    pub fn new(
        key: FileKey,
        resume: &FileReadState,
        provider: Arc<dyn LogProvider>,
        config: TailerConfig,
        events: BoundedSender<TailerEvent>,
    ) -> Self {
        let reader = LineReader::new(&key.path, config.max_line_bytes, config.max_read_bytes);
        let assembler = EntryAssembler::new(provider, config.max_entry_bytes);
        let (state_tx, _) = watch::channel(TailerState::default());

        Self {
            key,
            reader,
            assembler,
            events,
            state_tx,
            offset: resume.byte_offset,
            line: resume.line_number,
            size: resume.file_size,
            inode: resume.file_inode.clone(),
            phase: TailerPhase::Idle,
            last_data_at: Instant::now(),
            last_error: None,
            last_sent: None,
            config,
        }
    }

    /// Run the tailer on its own task. The tailer stops when `cancel` (or a
    /// parent of it) is cancelled.
    pub fn spawn(self, cancel: CancellationToken) -> TailerHandle {
        let key = self.key.clone();
        let state_rx = self.state_tx.subscribe();
        let task_cancel = cancel.clone();
        let join = tokio::spawn(async move {
            let mut tailer = self;
            if let Err(e) = tailer.run(task_cancel).await {
                debug!(file = %tailer.key, error = %e, "Tailer event channel closed");
            }
        });

        TailerHandle {
            key,
            cancel,
            state_rx,
            join,
        }
    }

    async fn run(&mut self, cancel: CancellationToken) -> Result<(), SendError> {
        debug!(
            file = %self.key,
            offset = self.offset,
            line = self.line,
            "Starting tailer"
        );

        self.start(&cancel).await?;

        let mut ticker = tokio::time::interval(self.config.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => break,

                _ = ticker.tick() => self.poll(&cancel).await?,
            }
        }

        self.finish().await
    }

    /// Initial catch-up read. Always ends with exactly one `InitialReadComplete`.
    async fn start(&mut self, cancel: &CancellationToken) -> Result<(), SendError> {
        self.set_phase(TailerPhase::InitialRead);
        let start_offset = self.offset;

        match self.stat().await {
            Ok(stat) => {
                if let Some(reason) = self.detect_rotation(&stat) {
                    self.rotate(reason, &stat).await?;
                }
                self.inode = Some(stat.inode());
                self.size = stat.size;
                let age = stat
                    .modified
                    .and_then(|m| SystemTime::now().duration_since(m).ok());
                if let Some(age) = age {
                    self.last_data_at = Instant::now()
                        .checked_sub(age)
                        .unwrap_or_else(Instant::now);
                }

                self.read_available(cancel).await?;
                self.flush_if_idle().await?;
            }
            Err(e) => self.report_error(&e).await?,
        }

        self.set_phase(TailerPhase::Watching);
        let bytes_read = self.offset.saturating_sub(start_offset);
        self.events
            .send(TailerEvent::InitialReadComplete {
                key: self.key.clone(),
                bytes_read,
            })
            .await?;
        debug!(file = %self.key, bytes_read, "Initial read complete");
        Ok(())
    }

    /// One watch tick
    async fn poll(&mut self, cancel: &CancellationToken) -> Result<(), SendError> {
        let stat = match self.stat().await {
            Ok(stat) => stat,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                // rotation window: the old file is gone and the new one is not there yet
                trace!(file = %self.key, "File missing, retrying next tick");
                return self.flush_if_idle().await;
            }
            Err(e) => return self.report_error(&e).await,
        };
        self.last_error = None;

        if let Some(reason) = self.detect_rotation(&stat) {
            self.rotate(reason, &stat).await?;
            self.size = stat.size;
            self.read_available(cancel).await?;
            self.set_phase(TailerPhase::Watching);
            return Ok(());
        }

        if self.inode.is_none() {
            // the file appeared after start
            self.inode = Some(stat.inode());
        }
        self.size = stat.size;

        if stat.size > self.offset {
            self.read_available(cancel).await?;
        }
        self.flush_if_idle().await
    }

    async fn finish(&mut self) -> Result<(), SendError> {
        if let Some(entry) = self.assembler.flush() {
            self.send_entry(entry).await?;
        }

        self.set_phase(TailerPhase::Stopped);
        let state = self.current_state();
        self.events
            .send(TailerEvent::StateChanged {
                key: self.key.clone(),
                state: state.clone(),
            })
            .await?;
        self.events
            .send(TailerEvent::Stopped {
                key: self.key.clone(),
                state,
                stats: self.assembler.stats(),
            })
            .await?;

        debug!(file = %self.key, offset = self.offset, "Tailer stopped");
        Ok(())
    }

    /// Read until end of file (or cancellation), chunk by chunk.
    async fn read_available(&mut self, cancel: &CancellationToken) -> Result<(), SendError> {
        loop {
            let chunk = match self.read_chunk().await {
                Ok(chunk) => chunk,
                Err(e) => return self.report_error(&e).await,
            };
            self.last_error = None;

            let reached_eof = chunk.reached_eof;
            let had_lines = !chunk.lines.is_empty();

            for line in chunk.lines {
                if let Some(entry) =
                    self.assembler
                        .process_line(&line.text, line.line_number, line.offset)
                {
                    self.send_entry(entry).await?;
                }
            }
            self.offset = chunk.end_offset;
            self.line = chunk.end_line;
            self.size = self.size.max(self.offset);

            if had_lines {
                self.last_data_at = Instant::now();
                self.send_state().await?;
            }

            if reached_eof || cancel.is_cancelled() {
                return Ok(());
            }
        }
    }

    /// Emit the pending entry once no new data arrived for `multiline_flush`
    async fn flush_if_idle(&mut self) -> Result<(), SendError> {
        if !self.assembler.has_pending() || self.last_data_at.elapsed() < self.config.multiline_flush
        {
            return Ok(());
        }
        if let Some(entry) = self.assembler.flush() {
            self.send_entry(entry).await?;
            self.send_state().await?;
        }
        Ok(())
    }

    fn detect_rotation(&self, stat: &FileStat) -> Option<RotationReason> {
        if let Some(known) = &self.inode {
            if *known != stat.inode() {
                return Some(RotationReason::IdentityChanged);
            }
        }
        if stat.size < self.offset {
            return Some(RotationReason::Truncated);
        }
        None
    }

    /// Start over at the beginning of the (new) file
    async fn rotate(&mut self, reason: RotationReason, stat: &FileStat) -> Result<(), SendError> {
        // whatever was assembled from the old file is complete as far as we will ever see
        if let Some(entry) = self.assembler.flush() {
            self.send_entry(entry).await?;
        }

        let previous_inode = self.inode.take();
        let current_inode = Some(stat.inode());
        info!(
            file = %self.key,
            ?reason,
            previous_offset = self.offset,
            size = stat.size,
            "File rotation detected"
        );

        self.set_phase(TailerPhase::Rotated);
        self.offset = 0;
        self.line = 0;
        self.inode = current_inode.clone();
        self.last_sent = None;

        self.events
            .send(TailerEvent::RotationDetected {
                key: self.key.clone(),
                reason,
                previous_inode,
                current_inode,
            })
            .await?;
        self.set_phase(TailerPhase::InitialRead);
        Ok(())
    }

    async fn report_error(&mut self, e: &io::Error) -> Result<(), SendError> {
        let error = e.to_string();
        if self.last_error.as_deref() == Some(error.as_str()) {
            return Ok(());
        }
        warn!(file = %self.key, error = %error, "Failed to read log file");
        self.last_error = Some(error.clone());
        self.events
            .send(TailerEvent::ReadError {
                key: self.key.clone(),
                error,
            })
            .await
    }

    async fn send_entry(&self, entry: ParsedLogEntry) -> Result<(), SendError> {
        self.events
            .send(TailerEvent::EntryRead {
                key: self.key.clone(),
                entry,
            })
            .await
    }

    async fn send_state(&mut self) -> Result<(), SendError> {
        let state = self.current_state();
        if self.last_sent.as_ref() == Some(&state) {
            return Ok(());
        }
        self.last_sent = Some(state.clone());
        self.state_tx.send_replace(state.clone());
        self.events
            .send(TailerEvent::StateChanged {
                key: self.key.clone(),
                state,
            })
            .await
    }

    fn current_state(&self) -> TailerState {
        let (byte_offset, line_number) = match self.assembler.pending_start() {
            Some(start) => (start.offset, start.line_number),
            None => (self.offset, self.line),
        };
        TailerState {
            byte_offset,
            line_number,
            file_size: self.size,
            file_inode: self.inode.clone(),
            is_active: self.phase != TailerPhase::Stopped,
            phase: self.phase,
        }
    }

    fn set_phase(&mut self, phase: TailerPhase) {
        self.phase = phase;
        self.state_tx.send_replace(self.current_state());
    }

    async fn stat(&self) -> io::Result<FileStat> {
        let path = self.key.path.clone();
        tokio::task::spawn_blocking(move || FileStat::read(path))
            .await
            .map_err(io::Error::other)?
    }

    async fn read_chunk(&self) -> io::Result<ReadChunk> {
        let reader = self.reader.clone();
        let (offset, line) = (self.offset, self.line);
        tokio::task::spawn_blocking(move || reader.read_from(offset, line))
            .await
            .map_err(io::Error::other)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bounded_channel::{BoundedReceiver, bounded};
    use crate::provider::presets;
    use crate::source::SourceId;
    use std::fs::{self, OpenOptions};
    use std::io::Write;
    use std::path::Path;
    use tempfile::TempDir;

    const H1: &str = "2024-01-15 10:30:45.1|Info|Scheduler|Task one";
    const H2: &str = "2024-01-15 10:30:46.2|Warn|Scheduler|Task two";
    const H3: &str = "2024-01-15 10:30:47.3|Error|Scheduler|Task three";

    fn test_config() -> TailerConfig {
        TailerConfig {
            poll_interval: Duration::from_millis(20),
            multiline_flush: Duration::from_millis(50),
            ..Default::default()
        }
    }

    fn key(path: &Path) -> FileKey {
        FileKey::new(SourceId::new("arr"), path)
    }

    fn spawn_tailer(
        path: &Path,
        resume: FileReadState,
    ) -> (TailerHandle, BoundedReceiver<TailerEvent>) {
        let (tx, rx) = bounded(256);
        let provider = Arc::new(presets::arr().unwrap());
        let tailer = FileTailer::new(key(path), &resume, provider, test_config(), tx);
        (tailer.spawn(CancellationToken::new()), rx)
    }

    fn append(path: &Path, text: &str) {
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .unwrap();
        f.write_all(text.as_bytes()).unwrap();
    }

    /// Collect events until `pred` matches or the timeout expires
    async fn collect_until(
        rx: &mut BoundedReceiver<TailerEvent>,
        events: &mut Vec<TailerEvent>,
        pred: impl Fn(&[TailerEvent]) -> bool,
    ) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !pred(events) {
            match tokio::time::timeout_at(deadline, rx.next()).await {
                Ok(Some(ev)) => events.push(ev),
                _ => break,
            }
        }
    }

    fn entries(events: &[TailerEvent]) -> Vec<String> {
        events
            .iter()
            .filter_map(|e| match e {
                TailerEvent::EntryRead { entry, .. } => Some(entry.message.clone()),
                _ => None,
            })
            .collect()
    }

    fn count_initial_complete(events: &[TailerEvent]) -> usize {
        events
            .iter()
            .filter(|e| matches!(e, TailerEvent::InitialReadComplete { .. }))
            .count()
    }

    fn last_state(events: &[TailerEvent]) -> Option<TailerState> {
        events.iter().rev().find_map(|e| match e {
            TailerEvent::StateChanged { state, .. } => Some(state.clone()),
            _ => None,
        })
    }

    #[tokio::test]
    async fn test_reads_existing_lines_from_start() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sonarr.txt");
        fs::write(&path, format!("{}\n{}\n{}\n", H1, H2, H3)).unwrap();

        let (handle, mut rx) = spawn_tailer(&path, FileReadState::new(&key(&path)));
        let mut events = Vec::new();
        collect_until(&mut rx, &mut events, |ev| entries(ev).len() == 3).await;

        assert_eq!(entries(&events), vec!["Task one", "Task two", "Task three"]);
        assert_eq!(count_initial_complete(&events), 1);

        handle.stop().await;
        while let Some(ev) = rx.next().await {
            events.push(ev);
        }
        let state = last_state(&events).unwrap();
        assert_eq!(state.byte_offset, fs::metadata(&path).unwrap().len());
        assert_eq!(state.line_number, 3);
        assert!(!state.is_active);
        assert_eq!(count_initial_complete(&events), 1);
    }

    #[tokio::test]
    async fn test_state_follows_entries() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sonarr.txt");
        fs::write(&path, format!("{}\n{}\n", H1, H2)).unwrap();

        let (handle, mut rx) = spawn_tailer(&path, FileReadState::new(&key(&path)));
        handle.stop().await;

        let mut events = Vec::new();
        while let Some(ev) = rx.next().await {
            events.push(ev);
        }

        // every state's offset must be covered by entries sent before it
        let mut emitted = 0;
        for ev in &events {
            match ev {
                TailerEvent::EntryRead { .. } => emitted += 1,
                TailerEvent::StateChanged { state, .. } if state.line_number >= 2 => {
                    assert_eq!(emitted, 2);
                }
                TailerEvent::StateChanged { state, .. } if state.line_number >= 1 => {
                    assert!(emitted >= 1);
                }
                _ => {}
            }
        }
        assert!(matches!(events.last(), Some(TailerEvent::Stopped { .. })));
    }

    #[tokio::test]
    async fn test_resume_without_changes_emits_nothing() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sonarr.txt");
        let content = format!("{}\n{}\n", H1, H2);
        fs::write(&path, &content).unwrap();

        let mut resume = FileReadState::new(&key(&path));
        resume.byte_offset = content.len() as u64;
        resume.line_number = 2;
        resume.file_size = content.len() as u64;
        resume.file_inode = Some(FileStat::read(&path).unwrap().inode());

        let (handle, mut rx) = spawn_tailer(&path, resume);
        let mut events = Vec::new();
        collect_until(&mut rx, &mut events, |ev| count_initial_complete(ev) == 1).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        handle.stop().await;
        while let Some(ev) = rx.next().await {
            events.push(ev);
        }

        assert!(entries(&events).is_empty());
        assert!(
            !events
                .iter()
                .any(|e| matches!(e, TailerEvent::RotationDetected { .. }))
        );
        match &events[0] {
            TailerEvent::InitialReadComplete { bytes_read, .. } => assert_eq!(*bytes_read, 0),
            other => panic!("unexpected first event {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_resume_reads_only_appended_bytes() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sonarr.txt");
        let first = format!("{}\n", H1);
        fs::write(&path, &first).unwrap();

        let mut resume = FileReadState::new(&key(&path));
        resume.byte_offset = first.len() as u64;
        resume.line_number = 1;
        resume.file_inode = Some(FileStat::read(&path).unwrap().inode());
        append(&path, &format!("{}\n{}\n", H2, H3));

        let (handle, mut rx) = spawn_tailer(&path, resume);
        let mut events = Vec::new();
        collect_until(&mut rx, &mut events, |ev| entries(ev).len() == 2).await;
        handle.stop().await;

        assert_eq!(entries(&events), vec!["Task two", "Task three"]);
        match events
            .iter()
            .find(|e| matches!(e, TailerEvent::InitialReadComplete { .. }))
        {
            Some(TailerEvent::InitialReadComplete { bytes_read, .. }) => {
                assert_eq!(*bytes_read, (H2.len() + H3.len() + 2) as u64)
            }
            _ => panic!("missing initial read complete"),
        }
    }

    #[tokio::test]
    async fn test_truncated_file_restarts_from_zero() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sonarr.txt");
        fs::write(&path, format!("{}\n", H1)).unwrap();

        let mut resume = FileReadState::new(&key(&path));
        resume.byte_offset = 200;
        resume.line_number = 4;
        resume.file_inode = Some(FileStat::read(&path).unwrap().inode());

        let (handle, mut rx) = spawn_tailer(&path, resume);
        let mut events = Vec::new();
        collect_until(&mut rx, &mut events, |ev| entries(ev).len() == 1).await;
        handle.stop().await;

        let rotation = events
            .iter()
            .find_map(|e| match e {
                TailerEvent::RotationDetected { reason, .. } => Some(*reason),
                _ => None,
            })
            .unwrap();
        assert_eq!(rotation, RotationReason::Truncated);

        let first_entry = events
            .iter()
            .find_map(|e| match e {
                TailerEvent::EntryRead { entry, .. } => Some(entry.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(first_entry.line_number, 1);
    }

    #[tokio::test]
    async fn test_detects_replacement_while_watching() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sonarr.txt");
        fs::write(&path, format!("{}\n", H1)).unwrap();

        let (handle, mut rx) = spawn_tailer(&path, FileReadState::new(&key(&path)));
        let mut events = Vec::new();
        collect_until(&mut rx, &mut events, |ev| entries(ev).len() == 1).await;

        // rotate: move the old file away and create a new one at the same path
        fs::rename(&path, dir.path().join("sonarr.0.txt")).unwrap();
        fs::write(&path, format!("{}\n{}\n", H2, H3)).unwrap();

        collect_until(&mut rx, &mut events, |ev| entries(ev).len() == 3).await;
        handle.stop().await;

        assert_eq!(entries(&events), vec!["Task one", "Task two", "Task three"]);
        assert!(events.iter().any(|e| matches!(
            e,
            TailerEvent::RotationDetected {
                reason: RotationReason::IdentityChanged,
                ..
            }
        )));
        assert_eq!(count_initial_complete(&events), 1);
    }

    #[tokio::test]
    async fn test_multiline_entry_is_held_until_complete() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sonarr.txt");
        fs::write(
            &path,
            format!("{}\n    at Foo.Bar()\n    at Foo.Baz()\n", H3),
        )
        .unwrap();

        let (handle, mut rx) = spawn_tailer(&path, FileReadState::new(&key(&path)));
        let mut events = Vec::new();
        collect_until(&mut rx, &mut events, |ev| count_initial_complete(ev) == 1).await;

        // the pending entry pins the safe offset at its header
        if let Some(state) = last_state(&events) {
            assert_eq!(state.byte_offset, 0);
        }

        collect_until(&mut rx, &mut events, |ev| entries(ev).len() == 1).await;
        handle.stop().await;

        let entry = events
            .iter()
            .find_map(|e| match e {
                TailerEvent::EntryRead { entry, .. } => Some(entry.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(entry.line_count, 3);
        assert!(entry.stack_trace.unwrap().contains("Foo.Baz"));
    }

    #[tokio::test]
    async fn test_missing_file_still_completes_initial_read() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sonarr.txt");

        let (handle, mut rx) = spawn_tailer(&path, FileReadState::new(&key(&path)));
        let mut events = Vec::new();
        collect_until(&mut rx, &mut events, |ev| count_initial_complete(ev) == 1).await;

        assert!(matches!(events[0], TailerEvent::ReadError { .. }));
        assert_eq!(count_initial_complete(&events), 1);
        assert_eq!(handle.phase(), TailerPhase::Watching);

        // keeps polling and picks the file up once it appears
        fs::write(&path, format!("{}\n{}\n", H1, H2)).unwrap();
        collect_until(&mut rx, &mut events, |ev| entries(ev).len() == 1).await;
        handle.stop().await;
        assert_eq!(entries(&events)[0], "Task one");
    }

    #[tokio::test]
    async fn test_partial_line_waits_for_newline() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sonarr.txt");
        fs::write(&path, format!("{}\n{}", H1, &H2[..10])).unwrap();

        let (handle, mut rx) = spawn_tailer(&path, FileReadState::new(&key(&path)));
        let mut events = Vec::new();
        collect_until(&mut rx, &mut events, |ev| entries(ev).len() == 1).await;

        append(&path, &format!("{}\n", &H2[10..]));
        collect_until(&mut rx, &mut events, |ev| entries(ev).len() == 2).await;
        handle.stop().await;

        assert_eq!(entries(&events), vec!["Task one", "Task two"]);
    }
}
