// SPDX-License-Identifier: Apache-2.0

pub mod assembler;
pub mod bounded_channel;
pub mod discovery;
pub mod entry;
pub mod error;
pub mod file_id;
pub mod init;
pub mod orchestrator;
pub mod provider;
pub mod reader;
pub mod settings;
pub mod sink;
pub mod source;
pub mod state;
pub mod tailer;

pub use error::{Error, Result};
