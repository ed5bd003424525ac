// SPDX-License-Identifier: Apache-2.0

//! Per-source ingestion task.
//!
//! A runner owns everything about one source: its tailers, the startup
//! queue, and its progress. Tailer events arrive on one channel and are
//! handled strictly in order, which keeps each file's position updates
//! behind the entries they cover.

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures::future::join_all;
use tokio::select;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::batch::BatchBuffer;
use super::progress::{IngestionProgress, ProgressThrottle, SyncStatus};
use super::queue::StartupQueue;
use super::recovery::{recover_source, wait_for_dirs};
use super::retry::RetryConfig;
use crate::bounded_channel::{BoundedReceiver, BoundedSender, bounded};
use crate::discovery::{PathDiscovery, modified_at};
use crate::error::{Error, Result};
use crate::provider::LogProvider;
use crate::settings::IngestSettings;
use crate::sink::{EntryRecord, EventSink, IngestEvent};
use crate::source::{FileKey, SourceConfig, SourceId};
use crate::state::{FileStatePatch, FileStateStore};
use crate::tailer::{FileTailer, TailerEvent, TailerHandle};

const EVENT_CHANNEL_SIZE: usize = 1024;
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Split discovered files into those to ingest, newest first, and those too
/// old to backfill. Files without a modification time are ingested. A zero
/// `max_age` disables the age limit.
pub(crate) fn plan_files(
    files: Vec<(PathBuf, Option<SystemTime>)>,
    max_age: Duration,
    now: SystemTime,
) -> (Vec<PathBuf>, Vec<PathBuf>) {
    let mut recent = Vec::new();
    let mut skipped = Vec::new();
    for (path, modified) in files {
        let too_old = !max_age.is_zero()
            && modified
                .and_then(|m| now.duration_since(m).ok())
                .is_some_and(|age| age > max_age);
        if too_old {
            skipped.push(path);
        } else {
            recent.push((path, modified));
        }
    }
    // newest first, unknown times last
    recent.sort_by(|a, b| b.1.cmp(&a.1));
    (recent.into_iter().map(|(p, _)| p).collect(), skipped)
}

/// Everything a runner shares with the rest of the orchestrator
#[derive(Clone)]
pub(crate) struct RunnerContext {
    pub store: Arc<dyn FileStateStore>,
    pub buffer: Arc<BatchBuffer>,
    pub events: Arc<dyn EventSink>,
    pub retry: RetryConfig,
}

pub(crate) struct SourceRunner {
    config: SourceConfig,
    provider: Arc<dyn LogProvider>,
    settings: IngestSettings,
    ctx: RunnerContext,
    discovery: PathDiscovery,
    dirs: Vec<PathBuf>,
    patterns: Vec<String>,
    cancel: CancellationToken,

    progress: IngestionProgress,
    progress_tx: watch::Sender<IngestionProgress>,
    throttle: ProgressThrottle,

    queue: StartupQueue,
    tailers: HashMap<PathBuf, TailerHandle>,
    /// Files that have been queued at some point
    known: HashSet<PathBuf>,
    /// Files counted in the initial sync that have not completed yet
    initial: HashSet<PathBuf>,

    events_tx: Option<BoundedSender<TailerEvent>>,
    events_rx: BoundedReceiver<TailerEvent>,
    stopping: bool,
    /// An event was dropped at cancellation; later positions must not be saved
    event_abandoned: bool,
}

impl SourceRunner {
    pub fn new(
        config: SourceConfig,
        provider: Arc<dyn LogProvider>,
        settings: IngestSettings,
        ctx: RunnerContext,
        progress_tx: watch::Sender<IngestionProgress>,
        cancel: CancellationToken,
    ) -> Result<Self> {
        let discovery = PathDiscovery::new(&config.exclude)?;
        let dirs = PathDiscovery::resolve_paths(&config.log_paths, &provider.default_paths());
        let patterns = if config.file_patterns.is_empty() {
            provider.file_patterns()
        } else {
            config.file_patterns.clone()
        };
        let (events_tx, events_rx) = bounded(EVENT_CHANNEL_SIZE);

        Ok(Self {
            progress: IngestionProgress::new(config.id.clone()),
            throttle: ProgressThrottle::new(settings.progress_interval()),
            queue: StartupQueue::new(settings.max_concurrent_tailers),
            config,
            provider,
            settings,
            ctx,
            discovery,
            dirs,
            patterns,
            cancel,
            progress_tx,
            tailers: HashMap::new(),
            known: HashSet::new(),
            initial: HashSet::new(),
            events_tx: Some(events_tx),
            events_rx,
            stopping: false,
            event_abandoned: false,
        })
    }

    fn source_id(&self) -> &SourceId {
        &self.config.id
    }

    pub async fn run(mut self) {
        info!(
            source = %self.source_id(),
            provider = %self.config.provider,
            paths = ?self.dirs,
            "Starting log source"
        );
        self.publish_progress();

        if let Err(e) = self.startup().await {
            if self.cancel.is_cancelled() {
                self.shutdown().await;
                return;
            }
            error!(source = %self.source_id(), error = %e, "Log source failed to start");
            self.progress.fail(e.to_string());
            self.publish_progress();
            return;
        }

        let rescan_interval = self.settings.rescan_interval();
        let mut rescan = tokio::time::interval_at(Instant::now() + rescan_interval, rescan_interval);
        rescan.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let cancel = self.cancel.clone();
        loop {
            let trailing = self.throttle.trailing_send_at();
            select! {
                biased;

                _ = cancel.cancelled() => break,

                event = self.events_rx.next() => match event {
                    // a push can wait on an unavailable sink
                    Some(event) => select! {
                        biased;

                        _ = cancel.cancelled() => {
                            self.event_abandoned = true;
                            break;
                        }
                        _ = self.handle_event(event) => {},
                    },
                    None => break,
                },

                _ = rescan.tick() => self.rescan().await,

                _ = tokio::time::sleep_until(trailing.unwrap_or_else(Instant::now)), if trailing.is_some() => {
                    self.publish_progress();
                }
            }
        }

        self.shutdown().await;
    }

    async fn startup(&mut self) -> Result<()> {
        // volumes may still be mounting right after boot
        wait_for_dirs(&self.config.id, &self.dirs, &self.ctx.retry, &self.cancel).await?;

        let report = recover_source(
            &self.ctx.store,
            &self.config.id,
            &self.dirs,
            &self.ctx.retry,
            &self.cancel,
        )
        .await?;
        if !report.reset.is_empty() {
            info!(
                source = %self.source_id(),
                reset = report.reset.len(),
                "Reset stale read positions"
            );
        }

        let dirs = self.dirs.clone();
        let validations = tokio::task::spawn_blocking(move || {
            dirs.iter()
                .map(|d| (d.clone(), PathDiscovery::validate(d)))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))?;

        let mut accessible = 0;
        let mut first_error = None;
        for (dir, validation) in validations {
            if validation.accessible {
                accessible += 1;
            } else {
                let reason = validation.error.unwrap_or_default();
                warn!(source = %self.source_id(), path = %dir.display(), reason = %reason, "Log path is not accessible");
                first_error.get_or_insert((dir, reason));
            }
        }
        if accessible == 0 {
            let (path, reason) = first_error
                .unwrap_or_else(|| (PathBuf::new(), "no log paths configured".to_string()));
            return Err(Error::PathUnavailable { path, reason });
        }

        let (recent, skipped) = self.discover().await?;
        info!(
            source = %self.source_id(),
            files = recent.len(),
            skipped = skipped.len(),
            "Discovered log files"
        );

        self.progress.total_files = recent.len();
        self.progress.skipped_files = skipped.len();
        self.progress.status = SyncStatus::Processing;
        self.initial = recent.iter().cloned().collect();
        self.known.extend(recent.iter().cloned());
        self.queue.extend(recent);

        self.dispatch().await;
        Ok(())
    }

    /// Files matching the source's patterns, split by age
    async fn discover(&self) -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
        let discovery = self.discovery.clone();
        let dirs = self.dirs.clone();
        let patterns = self.patterns.clone();
        let max_age = self.settings.max_file_age();

        tokio::task::spawn_blocking(move || -> Result<(Vec<PathBuf>, Vec<PathBuf>)> {
            let files = discovery
                .match_files(&dirs, &patterns)?
                .into_iter()
                .map(|path| {
                    let modified = modified_at(&path);
                    (path, modified)
                })
                .collect();
            Ok(plan_files(files, max_age, SystemTime::now()))
        })
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))?
    }

    /// Start queued files while initial-read slots are free
    async fn dispatch(&mut self) {
        if self.stopping {
            return;
        }
        while let Some(path) = self.queue.next_ready() {
            if let Err(e) = self.start_tailer(path.clone()).await {
                warn!(
                    source = %self.source_id(),
                    file = %path.display(),
                    error = %e,
                    "Failed to start tailer"
                );
                self.queue.complete(&path);
                self.complete_initial(&path);
            }
        }
        self.refresh_progress();
    }

    async fn start_tailer(&mut self, path: PathBuf) -> Result<()> {
        let key = FileKey::new(self.config.id.clone(), path.clone());
        let store = self.ctx.store.clone();
        let create_key = key.clone();
        let start_at_end = self.config.start_at.is_end();
        let resume = tokio::task::spawn_blocking(move || store.create(&create_key, start_at_end))
            .await
            .map_err(|e| Error::Io(io::Error::other(e)))??;

        let events = self.events_tx.clone().ok_or(Error::ChannelSend)?;
        let tailer = FileTailer::new(
            key,
            &resume,
            self.provider.clone(),
            self.settings.tailer_config(),
            events,
        );
        let handle = tailer.spawn(self.cancel.child_token());
        if let Some(previous) = self.tailers.insert(path, handle) {
            previous.cancel();
        }
        self.progress.processed_files += 1;
        Ok(())
    }

    async fn handle_event(&mut self, event: TailerEvent) {
        match event {
            TailerEvent::EntryRead { key, entry } => {
                let record = EntryRecord::new(key.source_id, key.path, entry);
                self.ctx.buffer.push(record).await;
            }
            TailerEvent::StateChanged { key, .. } if self.event_abandoned => {
                debug!(file = %key, "Keeping read position behind a dropped event");
            }
            TailerEvent::StateChanged { key, state } => {
                let mut patch = FileStatePatch::position(state.byte_offset, state.line_number)
                    .with_size(state.file_size)
                    .with_active(state.is_active);
                if let Some(inode) = state.file_inode {
                    patch = patch.with_inode(inode);
                }
                if let Err(e) = self.ctx.store.update(&key, patch) {
                    warn!(file = %key, error = %e, "Failed to update read position");
                }
            }
            TailerEvent::RotationDetected {
                key,
                reason,
                previous_inode,
                current_inode,
            } => {
                debug!(file = %key, ?reason, ?previous_inode, ?current_inode, "Resetting read position after rotation");
                if let Err(e) = self.ctx.store.reset(&key) {
                    warn!(file = %key, error = %e, "Failed to reset read position");
                }
                self.ctx
                    .events
                    .publish(IngestEvent::FileRotated { key, reason });
            }
            TailerEvent::ReadError { key, error } => {
                if let Err(e) = self.ctx.store.record_error(&key, &error) {
                    warn!(file = %key, error = %e, "Failed to record read error");
                }
            }
            TailerEvent::InitialReadComplete { key, bytes_read } => {
                debug!(file = %key, bytes_read, "File caught up");
                self.queue.complete(&key.path);
                self.complete_initial(&key.path);
                self.dispatch().await;
            }
            TailerEvent::Stopped { key, state, stats } => {
                debug!(
                    file = %key,
                    offset = state.byte_offset,
                    parsed = stats.parsed,
                    unparseable = stats.unparseable,
                    truncated = stats.truncated,
                    "Tailer finished"
                );
            }
        }
    }

    fn complete_initial(&mut self, path: &Path) {
        if self.initial.remove(path) {
            self.progress.files_completed += 1;
        }
    }

    async fn rescan(&mut self) {
        if self.stopping {
            return;
        }
        let (recent, _) = match self.discover().await {
            Ok(files) => files,
            Err(e) => {
                warn!(source = %self.source_id(), error = %e, "Log file rescan failed");
                return;
            }
        };

        let mut found = 0;
        for path in recent {
            if self.known.insert(path.clone()) {
                info!(source = %self.source_id(), file = %path.display(), "Discovered new log file");
                self.queue.push(path);
                found += 1;
            }
        }
        if found > 0 {
            self.dispatch().await;
        }
    }

    fn refresh_progress(&mut self) {
        self.progress.active_files = self.queue.active();
        self.progress.queued_files = self.queue.queued();
        self.progress.set_current_files(self.queue.active_paths());
        if self.progress.status == SyncStatus::Processing && self.initial.is_empty() {
            info!(
                source = %self.source_id(),
                files = self.progress.total_files,
                "Initial sync complete, watching for changes"
            );
            self.progress.status = SyncStatus::Watching;
            self.progress.is_initial_sync = false;
        }
        self.publish_progress();
    }

    fn publish_progress(&mut self) {
        self.progress.recompute();
        self.progress_tx.send_replace(self.progress.clone());
        if self.throttle.should_send(&self.progress, Instant::now()) {
            self.ctx
                .events
                .publish(IngestEvent::Progress(self.progress.clone()));
        }
    }

    /// Stop every tailer and handle the events they send on the way out
    async fn shutdown(&mut self) {
        self.stopping = true;
        for handle in self.tailers.values() {
            handle.cancel();
        }
        self.events_tx = None;

        let deadline = Instant::now() + DRAIN_TIMEOUT;
        let mut drained = 0usize;
        let mut clean = true;
        loop {
            match tokio::time::timeout_at(deadline, self.events_rx.next()).await {
                Ok(Some(event)) => {
                    self.handle_event(event).await;
                    drained += 1;
                }
                Ok(None) => break,
                Err(_) => {
                    warn!(source = %self.source_id(), drained, "Timed out draining tailer events");
                    clean = false;
                    break;
                }
            }
        }

        let tailers = std::mem::take(&mut self.tailers);
        if clean {
            join_all(tailers.into_values().map(|handle| handle.stop())).await;
        }

        self.queue.clear();
        if self.progress.status != SyncStatus::Error {
            self.progress.status = SyncStatus::Stopped;
        }
        self.progress.is_initial_sync = false;
        self.refresh_progress();
        info!(source = %self.source_id(), drained, "Log source stopped");
    }
}
