// SPDX-License-Identifier: Apache-2.0

use serde::{Deserialize, Serialize};
use std::fmt;

/// Severity indicates the seriousness of a log entry.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Severity {
    /// Level missing or not recognized
    #[default]
    Unknown = 0,
    /// Verbose tracing
    Trace = 10,
    /// Debugging purposes
    Debug = 20,
    /// High level application details
    Info = 30,
    /// Should be noticed
    Warning = 50,
    /// Something undesirable happened
    Error = 60,
    /// Process or component is unusable
    Fatal = 70,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Trace => "trace",
            Self::Debug => "debug",
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Fatal => "fatal",
        }
    }

    /// Lenient parse used by providers; unrecognized levels map to `Unknown`.
    pub fn from_level(level: &str) -> Self {
        level.parse().unwrap_or(Self::Unknown)
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    /// Accepts the spellings used by the supported servers, e.g. Jellyfin's
    /// `INF`/`WRN`, *arr's `Warn`/`Fatal` and Plex's `VERBOSE`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" | "trc" | "vrb" | "verbose" => Ok(Self::Trace),
            "debug" | "dbg" => Ok(Self::Debug),
            "info" | "inf" | "information" | "notice" => Ok(Self::Info),
            "warning" | "warn" | "wrn" => Ok(Self::Warning),
            "error" | "err" | "eror" => Ok(Self::Error),
            "fatal" | "ftl" | "critical" | "crit" => Ok(Self::Fatal),
            "unknown" => Ok(Self::Unknown),
            _ => Err(format!("unknown severity: {}", s)),
        }
    }
}
