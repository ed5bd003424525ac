// SPDX-License-Identifier: Apache-2.0

//! Ingestion orchestrator.
//!
//! Owns one runner task per source plus two shared background tasks: the
//! entry batch flusher and the checkpoint loop. Sources are started,
//! restarted and stopped independently; a failing source never affects the
//! others.

mod batch;
mod checkpoint;
mod progress;
mod queue;
mod recovery;
mod retry;
mod runner;

pub use batch::{BatchBuffer, FlushStats};
pub use checkpoint::{CheckpointStats, Checkpointer};
pub use progress::{IngestionProgress, ProgressThrottle, SyncStatus};
pub use queue::StartupQueue;
pub use recovery::{RecoveryReport, StaleReason, check_state, recover_source};
pub use retry::{Backoff, RetryConfig};

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, PoisonError, RwLock};

use futures::future::join_all;
use portable_atomic::{AtomicBool, Ordering};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::provider::build_provider;
use crate::settings::{IngestSettings, SettingsCache, SettingsSource};
use crate::sink::{EntrySink, EventSink};
use crate::source::{SourceConfig, SourceId};
use crate::state::FileStateStore;
use runner::{RunnerContext, SourceRunner};

struct SourceSlot {
    config: SourceConfig,
    cancel: Option<CancellationToken>,
    join: Option<JoinHandle<()>>,
}

impl SourceSlot {
    fn is_running(&self) -> bool {
        self.join.as_ref().is_some_and(|j| !j.is_finished())
    }

    /// Cancel the runner and wait until it has drained its tailers
    async fn stop(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel.cancel();
        }
        if let Some(join) = self.join.take() {
            if let Err(e) = join.await {
                warn!(source = %self.config.id, error = %e, "Source runner task failed");
            }
        }
    }
}

pub struct IngestionOrchestrator {
    settings: SettingsCache,
    ctx: RunnerContext,
    sources: Mutex<HashMap<SourceId, SourceSlot>>,
    progress: RwLock<HashMap<SourceId, watch::Receiver<IngestionProgress>>>,
    /// Parent of every source runner
    cancel: CancellationToken,
    /// Stops the flusher and the checkpoint loop
    background_cancel: CancellationToken,
    background: Mutex<Vec<JoinHandle<()>>>,
    background_started: AtomicBool,
}

impl IngestionOrchestrator {
    pub fn new(
        store: Arc<dyn FileStateStore>,
        sink: Arc<dyn EntrySink>,
        events: Arc<dyn EventSink>,
        settings: Arc<dyn SettingsSource>,
    ) -> Self {
        let settings = SettingsCache::new(settings);
        let current = settings.get();
        let buffer = Arc::new(BatchBuffer::new(
            sink,
            events.clone(),
            current.batch_size,
            current.batch_timeout(),
        ));

        Self {
            settings,
            ctx: RunnerContext {
                store,
                buffer,
                events,
                retry: RetryConfig::default(),
            },
            sources: Mutex::new(HashMap::new()),
            progress: RwLock::new(HashMap::new()),
            cancel: CancellationToken::new(),
            background_cancel: CancellationToken::new(),
            background: Mutex::new(Vec::new()),
            background_started: AtomicBool::new(false),
        }
    }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.ctx.retry = retry;
        self
    }

    pub fn settings(&self) -> IngestSettings {
        self.settings.get()
    }

    pub fn buffer(&self) -> &Arc<BatchBuffer> {
        &self.ctx.buffer
    }

    pub fn store(&self) -> &Arc<dyn FileStateStore> {
        &self.ctx.store
    }

    /// Start the background tasks and every enabled source. All
    /// configurations are validated before anything starts.
    pub async fn start(&self, sources: Vec<SourceConfig>) -> Result<()> {
        let mut seen = HashSet::new();
        for config in &sources {
            config.validate().map_err(Error::Config)?;
            build_provider(config)?;
            if !seen.insert(config.id.clone()) {
                return Err(Error::Config(format!("duplicate source id '{}'", config.id)));
            }
        }

        self.start_background().await;

        info!(sources = sources.len(), "Starting ingestion");
        for config in sources {
            if config.enabled {
                self.start_source(config).await?;
            } else {
                info!(source = %config.id, "Source disabled, not starting");
                self.sources.lock().await.insert(
                    config.id.clone(),
                    SourceSlot {
                        config,
                        cancel: None,
                        join: None,
                    },
                );
            }
        }
        Ok(())
    }

    async fn start_background(&self) {
        if self.background_started.swap(true, Ordering::AcqRel) {
            return;
        }
        let settings = self.settings.get();
        let mut background = self.background.lock().await;

        let buffer = self.ctx.buffer.clone();
        background.push(tokio::spawn(
            buffer.run(self.background_cancel.child_token()),
        ));

        let checkpointer = Checkpointer::new(self.ctx.store.clone(), self.ctx.buffer.clone());
        background.push(tokio::spawn(checkpointer.run(
            settings.checkpoint_interval(),
            self.background_cancel.child_token(),
        )));
        debug!("Started batch flusher and checkpoint tasks");
    }

    /// Start (or restart) one source
    pub async fn start_source(&self, config: SourceConfig) -> Result<()> {
        config.validate().map_err(Error::Config)?;
        let provider = build_provider(&config)?;
        self.start_background().await;

        let mut sources = self.sources.lock().await;
        if let Some(slot) = sources.get_mut(&config.id) {
            slot.stop().await;
        }

        let (progress_tx, progress_rx) = watch::channel(IngestionProgress::new(config.id.clone()));
        let cancel = self.cancel.child_token();
        let runner = SourceRunner::new(
            config.clone(),
            provider,
            self.settings.get(),
            self.ctx.clone(),
            progress_tx,
            cancel.clone(),
        )?;
        let join = tokio::spawn(runner.run());

        self.progress
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(config.id.clone(), progress_rx);
        sources.insert(
            config.id.clone(),
            SourceSlot {
                config,
                cancel: Some(cancel),
                join: Some(join),
            },
        );
        Ok(())
    }

    /// Stop every tailer of the source and run its startup sequence again
    pub async fn restart_source(&self, source_id: &SourceId) -> Result<()> {
        let config = {
            let sources = self.sources.lock().await;
            sources
                .get(source_id)
                .map(|slot| slot.config.clone())
                .ok_or_else(|| Error::SourceNotFound(source_id.clone()))?
        };
        info!(source = %source_id, "Restarting source");
        self.start_source(config).await
    }

    pub async fn stop_source(&self, source_id: &SourceId) -> Result<()> {
        let mut sources = self.sources.lock().await;
        let slot = sources
            .get_mut(source_id)
            .ok_or_else(|| Error::SourceNotFound(source_id.clone()))?;
        slot.stop().await;
        Ok(())
    }

    pub async fn is_running(&self, source_id: &SourceId) -> bool {
        self.sources
            .lock()
            .await
            .get(source_id)
            .is_some_and(|slot| slot.is_running())
    }

    /// Forget every read position and the progress of a source, stopping
    /// it first. Returns the number of file states removed.
    pub async fn reset_source_state(&self, source_id: &SourceId) -> Result<usize> {
        {
            let mut sources = self.sources.lock().await;
            if let Some(slot) = sources.get_mut(source_id) {
                slot.stop().await;
            }
        }

        // entries already read stay deliverable even though their positions go
        if let Err(e) = self.ctx.buffer.flush().await {
            warn!(source = %source_id, error = %e, "Failed to flush entries before reset");
        }

        let removed = self.ctx.store.delete_for_source(source_id)?;
        let snapshot = self.ctx.store.snapshot()?;
        let store = self.ctx.store.clone();
        tokio::task::spawn_blocking(move || store.persist(&snapshot))
            .await
            .map_err(|e| Error::Io(io::Error::other(e)))??;

        self.progress
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(source_id);
        info!(source = %source_id, removed, "Reset source state");
        Ok(removed)
    }

    pub fn progress(&self, source_id: &SourceId) -> Option<IngestionProgress> {
        self.progress
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(source_id)
            .map(|rx| rx.borrow().clone())
    }

    /// Progress of every source, ordered by source id
    pub fn all_progress(&self) -> Vec<IngestionProgress> {
        let mut all: Vec<_> = self
            .progress
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .map(|rx| rx.borrow().clone())
            .collect();
        all.sort_by(|a, b| a.source_id.cmp(&b.source_id));
        all
    }

    /// Drop cached settings. Batch limits apply immediately; tailer and
    /// discovery settings apply to sources started afterwards.
    pub fn invalidate_settings(&self) {
        self.settings.invalidate();
        let settings = self.settings.get();
        self.ctx
            .buffer
            .set_limits(settings.batch_size, settings.batch_timeout());
        debug!(generation = self.settings.generation(), "Settings invalidated");
    }

    /// Snapshot positions, flush entries and persist the snapshot now
    pub async fn checkpoint(&self) -> Result<CheckpointStats> {
        Checkpointer::new(self.ctx.store.clone(), self.ctx.buffer.clone())
            .checkpoint()
            .await
    }

    /// Stop every source, then the background tasks. The checkpoint loop
    /// writes a final checkpoint on its way out.
    pub async fn shutdown(&self) -> Result<()> {
        info!("Shutting down ingestion");
        {
            let mut sources = self.sources.lock().await;
            self.cancel.cancel();
            join_all(sources.values_mut().map(|slot| slot.stop())).await;
        }

        self.background_cancel.cancel();
        let handles = std::mem::take(&mut *self.background.lock().await);
        let had_background = !handles.is_empty();
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Background task failed");
            }
        }

        if !had_background {
            self.checkpoint().await?;
        } else if !self.ctx.buffer.is_empty() {
            return Err(Error::Sink(format!(
                "{} entries could not be delivered before shutdown",
                self.ctx.buffer.len()
            )));
        }
        Ok(())
    }
}
