// SPDX-License-Identifier: Apache-2.0

use std::path::PathBuf;

use crate::entry::ParsedLogEntry;

/// Line classification for one log grammar.
///
/// The assembler asks `parse_header` first; a line that is not a header is
/// merged into the pending entry when `is_continuation` accepts it.
pub trait LogProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Parse a line that starts a new entry. `None` when the line is not a header.
    fn parse_header(&self, line: &str) -> Option<ParsedLogEntry>;

    /// Whether a non-header line belongs to the entry before it
    fn is_continuation(&self, line: &str) -> bool;

    /// Glob patterns of the files this grammar is written to
    fn file_patterns(&self) -> Vec<String>;

    /// Where the server writes its logs on this platform
    fn default_paths(&self) -> Vec<PathBuf>;
}
