// SPDX-License-Identifier: Apache-2.0

//! Loading of the sources file.
//!
//! ```toml
//! [[sources]]
//! id = "jellyfin"
//! provider = "jellyfin"
//! log_paths = ["/config/log"]
//! start_at = "beginning"
//! ```

use figment::Figment;
use figment::providers::{Format, Toml};
use serde::Deserialize;
use std::collections::HashSet;
use std::path::Path;

use crate::error::{Error, Result};
use crate::source::SourceConfig;

#[derive(Debug, Default, Deserialize)]
struct SourcesFile {
    #[serde(default)]
    sources: Vec<SourceConfig>,
}

/// Read and validate the sources of a TOML file
pub fn load_sources(path: &Path) -> Result<Vec<SourceConfig>> {
    if !path.exists() {
        return Err(Error::Config(format!(
            "sources file not found: {}",
            path.display()
        )));
    }
    let file: SourcesFile = Figment::new()
        .merge(Toml::file(path))
        .extract()
        .map_err(|e| Error::Config(format!("failed to parse {}: {}", path.display(), e)))?;
    validate_sources(&file.sources)?;
    Ok(file.sources)
}

/// Parse sources from a TOML string
pub fn parse_sources(toml: &str) -> Result<Vec<SourceConfig>> {
    let file: SourcesFile = Figment::new()
        .merge(Toml::string(toml))
        .extract()
        .map_err(|e| Error::Config(format!("failed to parse sources: {}", e)))?;
    validate_sources(&file.sources)?;
    Ok(file.sources)
}

fn validate_sources(sources: &[SourceConfig]) -> Result<()> {
    let mut ids = HashSet::new();
    for source in sources {
        source.validate().map_err(Error::Config)?;
        if !ids.insert(source.id.clone()) {
            return Err(Error::Config(format!("duplicate source id '{}'", source.id)));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ProviderKind;
    use crate::source::StartAt;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_sources_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
[[sources]]
id = "jf"
provider = "jellyfin"
log_paths = ["/config/log"]

[[sources]]
id = "sonarr"
provider = "arr"
start_at = "end"
enabled = false
exclude = ["*.old.txt"]

[[sources]]
id = "custom"
provider = "regex"
pattern = '^(?P<timestamp>\S+) (?P<message>.*)$'
timestamp_format = "%Y-%m-%dT%H:%M:%S"
"#
        )
        .unwrap();
        file.flush().unwrap();

        let sources = load_sources(file.path()).unwrap();
        assert_eq!(sources.len(), 3);
        assert_eq!(sources[0].provider, ProviderKind::Jellyfin);
        assert_eq!(sources[0].log_paths, vec![PathBuf::from("/config/log")]);
        assert_eq!(sources[1].start_at, StartAt::End);
        assert!(!sources[1].enabled);
        assert_eq!(sources[1].exclude, vec!["*.old.txt".to_string()]);
        assert_eq!(sources[2].provider, ProviderKind::Regex);
        assert!(sources[2].pattern.is_some());
    }

    #[test]
    fn test_rejects_duplicates_and_invalid_sources() {
        let err = parse_sources(
            r#"
[[sources]]
id = "jf"
provider = "jellyfin"

[[sources]]
id = "jf"
provider = "plex"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("duplicate source id"));

        let err = parse_sources(
            r#"
[[sources]]
id = "custom"
provider = "regex"
"#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("pattern must be specified"));

        let err = parse_sources(
            r#"
[[sources]]
id = "x"
provider = "syslog"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_missing_file() {
        let err = load_sources(Path::new("/nonexistent/logsync.toml")).unwrap_err();
        assert!(err.to_string().contains("sources file not found"));
    }

    #[test]
    fn test_empty_file_has_no_sources() {
        assert!(parse_sources("").unwrap().is_empty());
    }
}
