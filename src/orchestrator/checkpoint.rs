// SPDX-License-Identifier: Apache-2.0

//! Periodic persistence of read positions.
//!
//! A checkpoint snapshots the state table, flushes the entry buffer and only
//! then writes the snapshot. Every position in the snapshot was produced
//! after the entries it covers were pushed to the buffer, so once the flush
//! returns those entries are in the sink and the positions are safe to keep.
//! If the sink is unavailable the snapshot is not written.

use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::select;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::batch::{BatchBuffer, FlushStats};
use crate::error::{Error, Result};
use crate::state::FileStateStore;

/// Consecutive failures after which checkpoint errors are logged as errors
const FAILURE_ESCALATION: u32 = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CheckpointStats {
    pub generation: u64,
    pub files: usize,
    pub flush: FlushStats,
}

#[derive(Clone)]
pub struct Checkpointer {
    store: Arc<dyn FileStateStore>,
    buffer: Arc<BatchBuffer>,
}

impl Checkpointer {
    pub fn new(store: Arc<dyn FileStateStore>, buffer: Arc<BatchBuffer>) -> Self {
        Self { store, buffer }
    }

    pub async fn checkpoint(&self) -> Result<CheckpointStats> {
        let snapshot = self.store.snapshot()?;
        let flush = self.buffer.flush().await?;

        let stats = CheckpointStats {
            generation: snapshot.generation,
            files: snapshot.len(),
            flush,
        };
        let store = self.store.clone();
        tokio::task::spawn_blocking(move || store.persist(&snapshot))
            .await
            .map_err(|e| Error::Io(io::Error::other(e)))??;

        debug!(
            generation = stats.generation,
            files = stats.files,
            "Checkpoint written"
        );
        Ok(stats)
    }

    /// Checkpoint every `interval` until cancelled, then once more.
    pub async fn run(self, interval: Duration, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // the first tick completes immediately
        ticker.tick().await;

        let mut failures = 0u32;
        loop {
            select! {
                biased;

                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    match self.checkpoint().await {
                        Ok(_) => {
                            if failures > 0 {
                                debug!(failures, "Checkpoint succeeded after previous failures");
                            }
                            failures = 0;
                        }
                        Err(e) => {
                            failures += 1;
                            if failures >= FAILURE_ESCALATION {
                                error!(failures, error = %e, "Checkpoints keep failing");
                            } else {
                                warn!(error = %e, "Checkpoint failed");
                            }
                        }
                    }
                }
            }
        }

        match self.checkpoint().await {
            Ok(stats) => info!(files = stats.files, "Final checkpoint completed"),
            Err(e) => warn!(error = %e, "Failed to perform final checkpoint"),
        }
    }
}
