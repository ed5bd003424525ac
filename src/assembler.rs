// SPDX-License-Identifier: Apache-2.0

//! Merges physical lines into logical entries.
//!
//! A header line opens a new entry and releases the previous one; continuation
//! lines (stack frames, wrapped text) are appended to the entry being built.

use std::sync::Arc;

use tracing::trace;

use crate::entry::ParsedLogEntry;
use crate::provider::LogProvider;

/// Counters of an assembler's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AssemblerStats {
    /// Entries emitted
    pub parsed: u64,
    /// Lines that were neither a header nor a usable continuation
    pub unparseable: u64,
    /// Continuation lines dropped because the entry hit its size limit
    pub truncated: u64,
}

/// Position of the first line of the entry still being assembled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PendingStart {
    /// Byte offset of the header line
    pub offset: u64,
    /// Lines consumed before the header line
    pub line_number: u64,
}

struct Pending {
    entry: ParsedLogEntry,
    start: PendingStart,
}

/// One assembler per file.
pub struct EntryAssembler {
    provider: Arc<dyn LogProvider>,
    pending: Option<Pending>,
    max_entry_bytes: usize,
    stats: AssemblerStats,
}

impl EntryAssembler {
    pub fn new(provider: Arc<dyn LogProvider>, max_entry_bytes: usize) -> Self {
        Self {
            provider,
            pending: None,
            max_entry_bytes,
            stats: AssemblerStats::default(),
        }
    }

    /// Feed one line. Returns the previously pending entry when `line` starts
    /// a new one.
    pub fn process_line(
        &mut self,
        line: &str,
        line_number: u64,
        offset: u64,
    ) -> Option<ParsedLogEntry> {
        if line.trim().is_empty() {
            return None;
        }

        if let Some(mut entry) = self.provider.parse_header(line) {
            entry.line_number = line_number;
            let previous = self.pending.replace(Pending {
                entry,
                start: PendingStart {
                    offset,
                    line_number: line_number.saturating_sub(1),
                },
            });
            return previous.map(|p| self.emit(p));
        }

        if !self.provider.is_continuation(line) {
            trace!(line_number, provider = self.provider.name(), "Unrecognized log line");
            self.stats.unparseable += 1;
            return None;
        }

        match &mut self.pending {
            Some(pending) => {
                if pending.entry.raw.len() + line.len() + 1 > self.max_entry_bytes {
                    self.stats.truncated += 1;
                } else {
                    pending.entry.append_continuation(line);
                }
            }
            None => {
                // orphaned continuation, e.g. the tail of an entry from before our offset
                self.stats.unparseable += 1;
            }
        }
        None
    }

    /// Release the pending entry, if any.
    pub fn flush(&mut self) -> Option<ParsedLogEntry> {
        self.pending.take().map(|p| self.emit(p))
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Where the pending entry starts, so callers never persist a position
    /// past an entry that has not been emitted.
    pub fn pending_start(&self) -> Option<PendingStart> {
        self.pending.as_ref().map(|p| p.start)
    }

    pub fn stats(&self) -> AssemblerStats {
        self.stats
    }

    fn emit(&mut self, pending: Pending) -> ParsedLogEntry {
        self.stats.parsed += 1;
        pending.entry
    }
}
