// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;
use thiserror::Error;

use crate::source::SourceId;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid glob pattern: {0}")]
    InvalidGlob(String),

    #[error("Regex error: {0}")]
    Regex(String),

    #[error("Sink error: {0}")]
    Sink(String),

    #[error("Channel send error")]
    ChannelSend,

    #[error("Unknown source: {0}")]
    SourceNotFound(SourceId),

    #[error("Log path unavailable: {path}: {reason}")]
    PathUnavailable { path: PathBuf, reason: String },
}

pub type Result<T> = std::result::Result<T, Error>;
