// SPDX-License-Identifier: Apache-2.0

//! Header grammars of the supported media and automation servers.
//!
//! ## Jellyfin
//! ```text
//! [2024-01-15 10:30:45.123 +00:00] [INF] [12] Emby.Server.Implementations.ApplicationHost: Starting
//! ```
//!
//! ## Sonarr / Radarr / Prowlarr
//! ```text
//! 2024-01-15 10:30:45.1|Info|RssSyncService|RSS Sync Completed. Reports found: 50
//! ```
//!
//! ## Plex Media Server
//! ```text
//! Jan 15, 2024 10:30:45.123 [0x7f2b5c0f8b38] INFO - Library section 1 scanned
//! ```

use std::path::PathBuf;

use super::regex::RegexProvider;
use crate::error::Result;

pub const JELLYFIN_PATTERN: &str = r"^\[(?P<timestamp>\d{4}-\d{2}-\d{2} \d{2}:\d{2}:\d{2}\.\d{3} [+-]\d{2}:\d{2})\] \[(?P<level>[A-Z]{3})\] \[(?P<thread>\d+)\] (?P<source>[^:\s]+): (?P<message>.*)$";

pub const JELLYFIN_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f %:z";

pub const ARR_PATTERN: &str = r"^(?P<timestamp>\d{4}-\d{1,2}-\d{1,2} \d{1,2}:\d{2}:\d{2}(?:\.\d+)?)\|(?P<level>\w+)\|(?P<source>[^|]+)\|(?P<message>.*)$";

pub const ARR_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

pub const PLEX_PATTERN: &str = r"^(?P<timestamp>[A-Z][a-z]{2} \d{1,2}, \d{4} \d{2}:\d{2}:\d{2}\.\d{3}) \[(?P<thread>[^\]]+)\] (?P<level>[A-Z]+) - (?P<message>.*)$";

pub const PLEX_TIMESTAMP_FORMAT: &str = "%b %d, %Y %H:%M:%S%.3f";

pub fn jellyfin() -> Result<RegexProvider> {
    Ok(RegexProvider::new("jellyfin", JELLYFIN_PATTERN)?
        .with_timestamp_format(JELLYFIN_TIMESTAMP_FORMAT)
        .with_file_patterns(vec!["log_*.log".to_string(), "jellyfin*.log".to_string()])
        .with_default_paths(jellyfin_paths()))
}

pub fn arr() -> Result<RegexProvider> {
    Ok(RegexProvider::new("arr", ARR_PATTERN)?
        .with_timestamp_format(ARR_TIMESTAMP_FORMAT)
        .with_file_patterns(vec![
            "sonarr*.txt".to_string(),
            "radarr*.txt".to_string(),
            "prowlarr*.txt".to_string(),
        ])
        .with_default_paths(arr_paths()))
}

pub fn plex() -> Result<RegexProvider> {
    Ok(RegexProvider::new("plex", PLEX_PATTERN)?
        .with_timestamp_format(PLEX_TIMESTAMP_FORMAT)
        .with_file_patterns(vec!["Plex Media Server*.log".to_string()])
        .with_default_paths(plex_paths()))
}

fn jellyfin_paths() -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![PathBuf::from(r"C:\ProgramData\Jellyfin\Server\log")]
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from("~/.local/share/jellyfin/log")]
    } else {
        vec![
            PathBuf::from("/var/log/jellyfin"),
            PathBuf::from("/config/log"),
        ]
    }
}

fn arr_paths() -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![
            PathBuf::from(r"C:\ProgramData\Sonarr\logs"),
            PathBuf::from(r"C:\ProgramData\Radarr\logs"),
            PathBuf::from(r"C:\ProgramData\Prowlarr\logs"),
        ]
    } else {
        vec![
            PathBuf::from("/config/logs"),
            PathBuf::from("~/.config/Sonarr/logs"),
            PathBuf::from("~/.config/Radarr/logs"),
            PathBuf::from("~/.config/Prowlarr/logs"),
        ]
    }
}

fn plex_paths() -> Vec<PathBuf> {
    if cfg!(windows) {
        vec![PathBuf::from(r"~\AppData\Local\Plex Media Server\Logs")]
    } else if cfg!(target_os = "macos") {
        vec![PathBuf::from("~/Library/Logs/Plex Media Server")]
    } else {
        vec![
            PathBuf::from(
                "/var/lib/plexmediaserver/Library/Application Support/Plex Media Server/Logs",
            ),
            PathBuf::from("/config/Library/Application Support/Plex Media Server/Logs"),
        ]
    }
}
