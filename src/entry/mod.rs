// SPDX-License-Identifier: Apache-2.0

mod dedup;
mod entry;
mod severity;

pub use dedup::{DeduplicationKey, MESSAGE_PREFIX_BYTES};
pub use entry::ParsedLogEntry;
pub use severity::Severity;
