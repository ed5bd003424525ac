// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::source::SourceId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncStatus {
    Discovering,
    Processing,
    /// Every file finished its initial read; new content is followed live
    Watching,
    Error,
    Stopped,
}

/// Ingestion progress of one source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionProgress {
    pub source_id: SourceId,
    pub status: SyncStatus,
    pub total_files: usize,
    /// Tailers started
    pub processed_files: usize,
    /// Tailers that finished their initial read
    pub files_completed: usize,
    /// Files older than the backfill window
    pub skipped_files: usize,
    /// Tailers currently in their initial read
    pub active_files: usize,
    pub queued_files: usize,
    /// File names currently in their initial read
    pub current_files: Vec<String>,
    pub percentage: f64,
    pub is_initial_sync: bool,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl IngestionProgress {
    pub fn new(source_id: SourceId) -> Self {
        let now = Utc::now();
        Self {
            source_id,
            status: SyncStatus::Discovering,
            total_files: 0,
            processed_files: 0,
            files_completed: 0,
            skipped_files: 0,
            active_files: 0,
            queued_files: 0,
            current_files: Vec::new(),
            percentage: 0.0,
            is_initial_sync: true,
            error: None,
            started_at: now,
            updated_at: now,
        }
    }

    /// Recompute the percentage from completed files and stamp the update
    pub fn recompute(&mut self) {
        self.percentage = if self.total_files == 0 {
            match self.status {
                SyncStatus::Processing | SyncStatus::Watching => 100.0,
                _ => self.percentage,
            }
        } else if self.files_completed >= self.total_files {
            100.0
        } else {
            self.files_completed as f64 * 100.0 / self.total_files as f64
        };
        self.updated_at = Utc::now();
    }

    pub fn set_current_files<'a>(&mut self, paths: impl IntoIterator<Item = &'a PathBuf>) {
        self.current_files = paths
            .into_iter()
            .map(|p| {
                p.file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| p.display().to_string())
            })
            .collect();
        self.current_files.sort();
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = SyncStatus::Error;
        self.error = Some(reason.into());
        self.is_initial_sync = false;
        self.updated_at = Utc::now();
    }
}

/// Rate limit for progress notifications: a status change and the 0% and
/// 100% marks always go out, anything else at most once per interval. An
/// update that was held back is due again at the end of the interval.
#[derive(Debug)]
pub struct ProgressThrottle {
    interval: Duration,
    last_sent: Option<Instant>,
    last_status: Option<SyncStatus>,
    last_percentage: Option<f64>,
    held: bool,
}

impl ProgressThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_sent: None,
            last_status: None,
            last_percentage: None,
            held: false,
        }
    }

    pub fn should_send(&mut self, progress: &IngestionProgress, now: Instant) -> bool {
        let status_changed = self.last_status != Some(progress.status);
        let boundary = (progress.percentage <= 0.0 || progress.percentage >= 100.0)
            && self.last_percentage != Some(progress.percentage);
        let due = self
            .last_sent
            .is_none_or(|sent| now.duration_since(sent) >= self.interval);

        if status_changed || boundary || due {
            self.last_sent = Some(now);
            self.last_status = Some(progress.status);
            self.last_percentage = Some(progress.percentage);
            self.held = false;
            return true;
        }
        self.held = true;
        false
    }

    /// When the last held-back update should be sent, if there is one
    pub fn trailing_send_at(&self) -> Option<Instant> {
        match self.last_sent {
            Some(sent) if self.held => Some(sent + self.interval),
            _ => None,
        }
    }
}
