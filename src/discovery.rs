// SPDX-License-Identifier: Apache-2.0

//! Path discovery: turns configured (or default) log locations into concrete
//! file paths. Read-only; never fails on a missing path.

use glob::{MatchOptions, Pattern, glob_with};
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Component, Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

use crate::error::{Error, Result};

/// Result of probing a configured log path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathValidation {
    pub accessible: bool,
    pub error: Option<String>,
}

impl PathValidation {
    fn ok() -> Self {
        Self {
            accessible: true,
            error: None,
        }
    }

    fn failed(reason: impl Into<String>) -> Self {
        Self {
            accessible: false,
            error: Some(reason.into()),
        }
    }
}

/// Finds log files under a set of directories, honoring exclude patterns.
#[derive(Debug, Clone, Default)]
pub struct PathDiscovery {
    exclude: Vec<Pattern>,
}

impl PathDiscovery {
    /// Create a discovery with the given exclude globs (matched against the full path)
    pub fn new(exclude: &[String]) -> Result<Self> {
        let exclude = exclude
            .iter()
            .map(|p| Pattern::new(p).map_err(|e| Error::InvalidGlob(format!("{}: {}", p, e))))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { exclude })
    }

    /// Configured paths win when present, otherwise the platform defaults.
    /// Paths are made absolute, `~` is expanded, duplicates are dropped and
    /// order is preserved.
    pub fn resolve_paths(configured: &[PathBuf], defaults: &[PathBuf]) -> Vec<PathBuf> {
        let candidates = if configured.is_empty() {
            defaults
        } else {
            configured
        };

        let mut seen = HashSet::new();
        let mut resolved = Vec::with_capacity(candidates.len());
        for path in candidates {
            let path = absolutize(&expand_home(path));
            if seen.insert(path.clone()) {
                resolved.push(path);
            }
        }
        resolved
    }

    /// Find files matching any of `patterns` inside each of `paths`.
    ///
    /// A path that is itself a file is kept when its file name matches a
    /// pattern. Output is deduplicated and stable.
    pub fn match_files(&self, paths: &[PathBuf], patterns: &[String]) -> Result<Vec<PathBuf>> {
        let compiled = patterns
            .iter()
            .map(|p| Pattern::new(p).map_err(|e| Error::InvalidGlob(format!("{}: {}", p, e))))
            .collect::<Result<Vec<_>>>()?;

        let options = MatchOptions {
            case_sensitive: true,
            require_literal_separator: true,
            require_literal_leading_dot: true,
        };

        let mut seen = HashSet::new();
        let mut files = Vec::new();

        for base in paths {
            if base.is_file() {
                let name_matches = base
                    .file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|name| {
                        compiled.is_empty() || compiled.iter().any(|p| p.matches(name))
                    });
                if name_matches && !self.is_excluded(base) && seen.insert(base.clone()) {
                    files.push(base.clone());
                }
                continue;
            }

            if !base.is_dir() {
                debug!(path = ?base, "Skipping log path that is not a directory");
                continue;
            }

            let escaped_base = Pattern::escape(&base.to_string_lossy());
            for pattern in patterns {
                let full = format!(
                    "{}{}{}",
                    escaped_base,
                    std::path::MAIN_SEPARATOR,
                    pattern
                );
                let matches =
                    glob_with(&full, options).map_err(|e| Error::InvalidGlob(e.to_string()))?;

                for entry in matches {
                    let path = match entry {
                        Ok(path) => path,
                        Err(e) => {
                            debug!("Skipping unreadable glob entry: {}", e);
                            continue;
                        }
                    };

                    if path.is_dir() || self.is_excluded(&path) {
                        continue;
                    }

                    if seen.insert(path.clone()) {
                        files.push(path);
                    }
                }
            }
        }

        Ok(files)
    }

    /// Probe a log path without failing.
    pub fn validate(path: &Path) -> PathValidation {
        match fs::metadata(path) {
            Ok(metadata) if metadata.is_dir() => match fs::read_dir(path) {
                Ok(_) => PathValidation::ok(),
                Err(e) => PathValidation::failed(describe_io_error(&e)),
            },
            Ok(metadata) if metadata.is_file() => match fs::File::open(path) {
                Ok(_) => PathValidation::ok(),
                Err(e) => PathValidation::failed(describe_io_error(&e)),
            },
            Ok(_) => PathValidation::failed("not a directory or regular file"),
            Err(e) => PathValidation::failed(describe_io_error(&e)),
        }
    }

    fn is_excluded(&self, path: &Path) -> bool {
        self.exclude.iter().any(|p| p.matches_path(path))
    }
}

/// Last modification time of a file, if the platform reports one.
pub fn modified_at(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

fn describe_io_error(e: &io::Error) -> String {
    match e.kind() {
        io::ErrorKind::NotFound => "path does not exist".to_string(),
        io::ErrorKind::PermissionDenied => "permission denied".to_string(),
        _ => e.to_string(),
    }
}

fn home_dir() -> Option<PathBuf> {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
}

fn expand_home(path: &Path) -> PathBuf {
    let mut components = path.components();
    match components.next() {
        Some(Component::Normal(first)) if first == "~" => match home_dir() {
            Some(home) => home.join(components.as_path()),
            None => path.to_path_buf(),
        },
        _ => path.to_path_buf(),
    }
}

fn absolutize(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    match std::env::current_dir() {
        Ok(cwd) => cwd.join(path),
        Err(_) => path.to_path_buf(),
    }
}
