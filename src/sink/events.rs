// SPDX-License-Identifier: Apache-2.0

use serde::Serialize;
use tokio::sync::broadcast;
use tracing::trace;

use super::EntryRecord;
use crate::orchestrator::IngestionProgress;
use crate::source::{FileKey, SourceId};
use crate::tailer::RotationReason;

/// Notification for observers of the ingester (UI push, metrics, tests)
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IngestEvent {
    Progress(IngestionProgress),
    EntriesInserted {
        source_id: SourceId,
        records: Vec<EntryRecord>,
    },
    FileRotated {
        key: FileKey,
        reason: RotationReason,
    },
}

pub trait EventSink: Send + Sync {
    /// Must not block
    fn publish(&self, event: IngestEvent);
}

/// Fan-out to any number of subscribers; slow subscribers lose old events
pub struct BroadcastEventSink {
    tx: broadcast::Sender<IngestEvent>,
}

impl BroadcastEventSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.tx.subscribe()
    }
}

impl EventSink for BroadcastEventSink {
    fn publish(&self, event: IngestEvent) {
        if self.tx.send(event).is_err() {
            trace!("No event subscribers");
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _event: IngestEvent) {}
}
