// SPDX-License-Identifier: Apache-2.0

//! On-disk layout of the file read state document.
//!
//! ```json
//! {
//!   "version": 1,
//!   "files": {
//!     "jellyfin:/var/log/jellyfin/log_20240101.log": { "source_id": "jellyfin", ... }
//!   }
//! }
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::FileReadState;
use crate::error::{Error, Result};
use crate::source::FileKey;

/// Current schema version for persisted state
pub const STATE_VERSION: u32 = 1;

/// Persisted state for all known files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    /// Schema version
    pub version: u32,
    /// Map from "source:path" to the file state
    pub files: BTreeMap<String, FileReadState>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: STATE_VERSION,
            files: BTreeMap::new(),
        }
    }
}

impl PersistedState {
    pub fn from_states<'a>(states: impl IntoIterator<Item = &'a FileReadState>) -> Self {
        let files = states
            .into_iter()
            .map(|s| (state_key(&s.key()), s.clone()))
            .collect();
        Self {
            version: STATE_VERSION,
            files,
        }
    }

    /// Parse a document, rejecting versions this build does not understand.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let doc: PersistedState = serde_json::from_slice(bytes)?;
        if doc.version > STATE_VERSION {
            return Err(Error::Persistence(format!(
                "unsupported state version {} (this build understands up to {})",
                doc.version, STATE_VERSION
            )));
        }
        Ok(doc)
    }
}

/// Map key of a file state
pub fn state_key(key: &FileKey) -> String {
    key.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::SourceId;

    #[test]
    fn test_state_document_shape() {
        let mut state = FileReadState::new(&FileKey::new(SourceId::new("arr"), "/logs/sonarr.txt"));
        state.byte_offset = 42;
        state.file_inode = Some("1:2".to_string());

        let doc = PersistedState::from_states([&state]);
        let json: serde_json::Value = serde_json::to_value(&doc).unwrap();

        assert_eq!(json["version"], 1);
        let entry = &json["files"]["arr:/logs/sonarr.txt"];
        assert_eq!(entry["byte_offset"], 42);
        assert_eq!(entry["file_inode"], "1:2");
        assert_eq!(entry["source_id"], "arr");
    }

    #[test]
    fn test_rejects_newer_version() {
        let err = PersistedState::from_slice(br#"{"version":9,"files":{}}"#).unwrap_err();
        assert!(err.to_string().contains("unsupported state version 9"));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            PersistedState::from_slice(b"{not json"),
            Err(Error::Json(_))
        ));
    }
}
