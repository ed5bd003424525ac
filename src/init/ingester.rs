// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

use tokio::select;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::BoxError;
use super::args::{ResetArgs, StartArgs, StateArgs};
use super::sources::load_sources;
use crate::error::Result;
use crate::orchestrator::{IngestionOrchestrator, SyncStatus};
use crate::settings::EnvSettingsSource;
use crate::sink::{BroadcastEventSink, IngestEvent, JsonLinesEntrySink};
use crate::source::SourceId;
use crate::state::{FileReadState, FileStateStore, JsonFileStateStore};

const EVENT_BUFFER_SIZE: usize = 1024;

/// The `start` command: ingest every configured source until cancelled
pub struct Ingester {
    args: StartArgs,
}

impl Ingester {
    pub fn new(args: StartArgs) -> Self {
        Self { args }
    }

    pub async fn run(self, cancel: CancellationToken) -> std::result::Result<(), BoxError> {
        let sources = load_sources(&self.args.sources)?;
        let store = Arc::new(JsonFileStateStore::open(&self.args.state_path)?);
        let sink = Arc::new(JsonLinesEntrySink::open(&self.args.entries_path)?);
        let events = Arc::new(BroadcastEventSink::new(EVENT_BUFFER_SIZE));
        let mut events_rx = events.subscribe();

        info!(
            sources = sources.len(),
            state = %self.args.state_path.display(),
            entries = %self.args.entries_path.display(),
            "Starting logsync"
        );

        let orchestrator = IngestionOrchestrator::new(
            store,
            sink,
            events,
            Arc::new(EnvSettingsSource::new()),
        );
        orchestrator.start(sources).await?;

        loop {
            select! {
                biased;

                _ = cancel.cancelled() => break,

                event = events_rx.recv() => match event {
                    Ok(event) => log_event(&event),
                    Err(RecvError::Lagged(skipped)) => {
                        debug!(skipped, "Event log lagging behind");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }

        orchestrator.shutdown().await?;
        info!("Ingestion stopped");
        Ok(())
    }
}

fn log_event(event: &IngestEvent) {
    match event {
        IngestEvent::Progress(progress) => match progress.status {
            SyncStatus::Error => warn!(
                source = %progress.source_id,
                error = progress.error.as_deref().unwrap_or_default(),
                "Source failed"
            ),
            _ => info!(
                source = %progress.source_id,
                status = ?progress.status,
                completed = progress.files_completed,
                total = progress.total_files,
                percentage = progress.percentage,
                "Ingestion progress"
            ),
        },
        IngestEvent::EntriesInserted { source_id, records } => {
            debug!(source = %source_id, entries = records.len(), "Entries inserted");
        }
        IngestEvent::FileRotated { key, reason } => {
            info!(file = %key, ?reason, "Log file rotated");
        }
    }
}

/// The `reset` command: forget every read position of a source
pub fn reset_state(args: &ResetArgs) -> Result<usize> {
    let store = JsonFileStateStore::open(&args.state_path)?;
    let removed = store.delete_for_source(&SourceId::new(args.source.clone()))?;
    store.persist(&store.snapshot()?)?;
    Ok(removed)
}

/// The `state` command: persisted read positions, ordered by source and path
pub fn list_state(args: &StateArgs) -> Result<Vec<FileReadState>> {
    let store = JsonFileStateStore::open(&args.state_path)?;
    let mut states = match &args.source {
        Some(source) => store.list_for_source(&SourceId::new(source.clone()))?,
        None => store.list_all()?,
    };
    states.sort_by(|a, b| a.key().cmp(&b.key()));
    Ok(states)
}
