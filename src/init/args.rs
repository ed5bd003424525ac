// SPDX-License-Identifier: Apache-2.0

use clap::Args;
use std::path::PathBuf;

#[derive(Debug, Args, Clone)]
pub struct StartArgs {
    /// TOML file with the [[sources]] to ingest
    #[arg(long, env = "LOGSYNC_SOURCES", default_value = "logsync.toml")]
    pub sources: PathBuf,

    /// State file with per-file read positions
    #[arg(long, env = "LOGSYNC_STATE_PATH", default_value = "logsync-state.json")]
    pub state_path: PathBuf,

    /// JSON lines file ingested entries are appended to
    #[arg(long, env = "LOGSYNC_ENTRIES_PATH", default_value = "logsync-entries.jsonl")]
    pub entries_path: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct ResetArgs {
    /// Source whose read positions are forgotten
    #[arg(long, env = "LOGSYNC_RESET_SOURCE")]
    pub source: String,

    /// State file with per-file read positions
    #[arg(long, env = "LOGSYNC_STATE_PATH", default_value = "logsync-state.json")]
    pub state_path: PathBuf,
}

#[derive(Debug, Args, Clone)]
pub struct StateArgs {
    /// Only show files of this source
    #[arg(long)]
    pub source: Option<String>,

    /// State file with per-file read positions
    #[arg(long, env = "LOGSYNC_STATE_PATH", default_value = "logsync-state.json")]
    pub state_path: PathBuf,
}
