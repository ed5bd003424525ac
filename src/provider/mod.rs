// SPDX-License-Identifier: Apache-2.0

//! Log grammars.
//!
//! - [`RegexProvider`] - header lines described by a regex with named groups
//! - [`presets`] - pre-configured providers for Jellyfin, *arr and Plex

pub mod presets;
mod regex;
mod traits;

pub use regex::{DEFAULT_CONTINUATION_PATTERN, RegexProvider};
pub use traits::LogProvider;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::source::SourceConfig;

/// Grammar of a source's log files
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Jellyfin,
    /// Sonarr, Radarr and Prowlarr
    Arr,
    Plex,
    /// User supplied pattern
    Regex,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Jellyfin => "jellyfin",
            Self::Arr => "arr",
            Self::Plex => "plex",
            Self::Regex => "regex",
        };
        f.write_str(name)
    }
}

/// Build the provider for a source
pub fn build_provider(config: &SourceConfig) -> Result<Arc<dyn LogProvider>> {
    let provider = match config.provider {
        ProviderKind::Jellyfin => presets::jellyfin()?,
        ProviderKind::Arr => presets::arr()?,
        ProviderKind::Plex => presets::plex()?,
        ProviderKind::Regex => {
            let pattern = config.pattern.as_deref().ok_or_else(|| {
                Error::Config(format!(
                    "source '{}': pattern must be specified when provider is 'regex'",
                    config.id
                ))
            })?;
            let mut provider = RegexProvider::new(config.id.as_str(), pattern)?;
            if let Some(format) = &config.timestamp_format {
                provider = provider.with_timestamp_format(format.clone());
            }
            provider
        }
    };
    Ok(Arc::new(provider))
}
