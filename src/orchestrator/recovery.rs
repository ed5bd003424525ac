// SPDX-License-Identifier: Apache-2.0

//! Startup check of persisted read positions.
//!
//! Before a source starts tailing, each of its persisted positions is
//! compared with the file on disk. A position is reset to the start of the
//! file when the file was replaced, shrank below the position, or can no
//! longer be read. While none of the source's directories are reachable
//! (an unmounted share, say) the check is retried with backoff.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::retry::RetryConfig;
use crate::discovery::PathDiscovery;
use crate::error::{Error, Result};
use crate::file_id::FileStat;
use crate::source::{FileKey, SourceId};
use crate::state::{FileReadState, FileStateStore};

/// Why a persisted position was discarded
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StaleReason {
    IdentityChanged,
    Shrunk { size: u64, offset: u64 },
    Inaccessible(String),
}

#[derive(Debug, Default)]
pub struct RecoveryReport {
    pub checked: usize,
    pub reset: Vec<(FileKey, StaleReason)>,
}

/// Compare a persisted position with what is on disk now
pub fn check_state(state: &FileReadState, stat: io::Result<FileStat>) -> Option<StaleReason> {
    match stat {
        Ok(stat) => {
            if let Some(inode) = &state.file_inode {
                if *inode != stat.inode() {
                    return Some(StaleReason::IdentityChanged);
                }
            }
            if stat.size < state.byte_offset {
                return Some(StaleReason::Shrunk {
                    size: stat.size,
                    offset: state.byte_offset,
                });
            }
            None
        }
        Err(e) => Some(StaleReason::Inaccessible(e.to_string())),
    }
}

/// Validate every persisted position of a source, resetting stale ones.
///
/// Fails with [`Error::PathUnavailable`] when none of `dirs` became
/// accessible within the retry budget.
pub async fn recover_source(
    store: &Arc<dyn FileStateStore>,
    source: &SourceId,
    dirs: &[PathBuf],
    retry: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<RecoveryReport> {
    let states = store.list_for_source(source)?;
    let mut report = RecoveryReport::default();
    if states.is_empty() {
        return Ok(report);
    }

    wait_for_dirs(source, dirs, retry, cancel).await?;

    for state in states {
        report.checked += 1;
        let path = state.file_path.clone();
        let stat = tokio::task::spawn_blocking(move || FileStat::read(path))
            .await
            .map_err(|e| Error::Io(io::Error::other(e)))?;

        if let Some(reason) = check_state(&state, stat) {
            let key = state.key();
            info!(file = %key, ?reason, "Resetting stale read position");
            store.reset(&key)?;
            report.reset.push((key, reason));
        }
    }

    debug!(
        source = %source,
        checked = report.checked,
        reset = report.reset.len(),
        "Recovered read positions"
    );
    Ok(report)
}

/// Wait with backoff until at least one of `dirs` is accessible
pub(crate) async fn wait_for_dirs(
    source: &SourceId,
    dirs: &[PathBuf],
    retry: &RetryConfig,
    cancel: &CancellationToken,
) -> Result<()> {
    if dirs.is_empty() {
        return Ok(());
    }

    let mut backoff = retry.backoff();
    loop {
        let dirs_owned = dirs.to_vec();
        let validations = tokio::task::spawn_blocking(move || {
            dirs_owned
                .iter()
                .map(|d| PathDiscovery::validate(d))
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| Error::Io(io::Error::other(e)))?;

        if validations.iter().any(|v| v.accessible) {
            return Ok(());
        }

        let reason = validations
            .iter()
            .find_map(|v| v.error.clone())
            .unwrap_or_else(|| "not accessible".to_string());

        let Some(delay) = backoff.next_delay() else {
            return Err(Error::PathUnavailable {
                path: dirs[0].clone(),
                reason,
            });
        };

        warn!(
            source = %source,
            attempt = backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            reason = %reason,
            "Log directories unavailable, retrying"
        );
        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(Error::PathUnavailable {
                    path: dirs[0].clone(),
                    reason: "cancelled while waiting".to_string(),
                });
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }
}
