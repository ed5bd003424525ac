// SPDX-License-Identifier: Apache-2.0

//! Ingestion tuning settings and their cache.
//!
//! Settings come from a [`SettingsSource`]. The [`SettingsCache`] keeps the
//! first successful read until `invalidate` bumps its generation; readers then
//! refetch lazily. A source that fails yields the defaults without caching
//! them, so the next read tries again.

use std::sync::{Arc, RwLock};
use std::time::Duration;

use figment::{Figment, providers::Env};
use portable_atomic::{AtomicU64, Ordering};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::tailer::TailerConfig;

pub const ENV_PREFIX: &str = "LOGSYNC_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestSettings {
    /// Tailers allowed in their initial read at the same time, per source
    pub max_concurrent_tailers: usize,
    /// Files not modified within this many days are not backfilled
    pub max_file_age_days: u64,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub poll_interval_ms: u64,
    pub progress_interval_ms: u64,
    pub rescan_interval_ms: u64,
    pub checkpoint_interval_ms: u64,
    pub multiline_flush_ms: u64,
    pub max_line_bytes: usize,
    pub max_entry_bytes: usize,
    pub max_read_bytes: u64,
}

impl Default for IngestSettings {
    fn default() -> Self {
        Self {
            max_concurrent_tailers: 3,
            max_file_age_days: 30,
            batch_size: 100,
            batch_timeout_ms: 2000,
            poll_interval_ms: 1000,
            progress_interval_ms: 500,
            rescan_interval_ms: 30_000,
            checkpoint_interval_ms: 2000,
            multiline_flush_ms: 2000,
            max_line_bytes: 64 * 1024,
            max_entry_bytes: 256 * 1024,
            max_read_bytes: 4 * 1024 * 1024,
        }
    }
}

impl IngestSettings {
    /// Replace values that would stall ingestion with their defaults
    pub fn normalized(mut self) -> Self {
        let defaults = Self::default();
        if self.max_concurrent_tailers == 0 {
            self.max_concurrent_tailers = defaults.max_concurrent_tailers;
        }
        if self.batch_size == 0 {
            self.batch_size = defaults.batch_size;
        }
        for (value, default) in [
            (&mut self.batch_timeout_ms, defaults.batch_timeout_ms),
            (&mut self.poll_interval_ms, defaults.poll_interval_ms),
            (&mut self.rescan_interval_ms, defaults.rescan_interval_ms),
            (&mut self.checkpoint_interval_ms, defaults.checkpoint_interval_ms),
            (&mut self.max_read_bytes, defaults.max_read_bytes),
        ] {
            if *value == 0 {
                *value = default;
            }
        }
        if self.max_line_bytes == 0 {
            self.max_line_bytes = defaults.max_line_bytes;
        }
        if self.max_entry_bytes < self.max_line_bytes {
            self.max_entry_bytes = self.max_line_bytes;
        }
        self
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn progress_interval(&self) -> Duration {
        Duration::from_millis(self.progress_interval_ms)
    }

    pub fn rescan_interval(&self) -> Duration {
        Duration::from_millis(self.rescan_interval_ms)
    }

    pub fn checkpoint_interval(&self) -> Duration {
        Duration::from_millis(self.checkpoint_interval_ms)
    }

    pub fn max_file_age(&self) -> Duration {
        Duration::from_secs(self.max_file_age_days.saturating_mul(24 * 60 * 60))
    }

    pub fn tailer_config(&self) -> TailerConfig {
        TailerConfig {
            poll_interval: self.poll_interval(),
            multiline_flush: Duration::from_millis(self.multiline_flush_ms),
            max_line_bytes: self.max_line_bytes,
            max_entry_bytes: self.max_entry_bytes,
            max_read_bytes: self.max_read_bytes,
        }
    }
}

/// Read-only provider of settings
pub trait SettingsSource: Send + Sync {
    fn load(&self) -> Result<IngestSettings>;
}

/// Settings from `LOGSYNC_*` environment variables, e.g. `LOGSYNC_BATCH_SIZE=500`
#[derive(Debug, Clone)]
pub struct EnvSettingsSource {
    prefix: String,
}

impl EnvSettingsSource {
    pub fn new() -> Self {
        Self::with_prefix(ENV_PREFIX)
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }
}

impl Default for EnvSettingsSource {
    fn default() -> Self {
        Self::new()
    }
}

impl SettingsSource for EnvSettingsSource {
    fn load(&self) -> Result<IngestSettings> {
        Figment::new()
            .merge(Env::prefixed(&self.prefix))
            .extract()
            .map_err(|e| Error::Config(format!("failed to parse settings: {}", e)))
    }
}

/// Fixed settings
#[derive(Debug, Clone, Default)]
pub struct StaticSettingsSource(pub IngestSettings);

impl SettingsSource for StaticSettingsSource {
    fn load(&self) -> Result<IngestSettings> {
        Ok(self.0.clone())
    }
}

pub struct SettingsCache {
    source: Arc<dyn SettingsSource>,
    generation: AtomicU64,
    cached: RwLock<Option<(u64, IngestSettings)>>,
}

impl SettingsCache {
    pub fn new(source: Arc<dyn SettingsSource>) -> Self {
        Self {
            source,
            generation: AtomicU64::new(0),
            cached: RwLock::new(None),
        }
    }

    /// Current settings, loading them if the cache is empty or stale
    pub fn get(&self) -> IngestSettings {
        let generation = self.generation.load(Ordering::Acquire);
        if let Ok(cached) = self.cached.read() {
            if let Some((cached_gen, settings)) = cached.as_ref() {
                if *cached_gen == generation {
                    return settings.clone();
                }
            }
        }

        match self.source.load() {
            Ok(settings) => {
                let settings = settings.normalized();
                debug!(generation, ?settings, "Loaded ingestion settings");
                if let Ok(mut cached) = self.cached.write() {
                    *cached = Some((generation, settings.clone()));
                }
                settings
            }
            Err(e) => {
                warn!(error = %e, "Settings unavailable, using defaults");
                IngestSettings::default()
            }
        }
    }

    /// Mark the cached settings stale
    pub fn invalidate(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    struct CountingSource {
        loads: AtomicUsize,
        batch_size: Mutex<usize>,
        fail: bool,
    }

    impl CountingSource {
        fn new(batch_size: usize, fail: bool) -> Self {
            Self {
                loads: AtomicUsize::new(0),
                batch_size: Mutex::new(batch_size),
                fail,
            }
        }
    }

    impl SettingsSource for CountingSource {
        fn load(&self) -> Result<IngestSettings> {
            self.loads
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if self.fail {
                return Err(Error::Config("settings table missing".to_string()));
            }
            Ok(IngestSettings {
                batch_size: *self.batch_size.lock().unwrap(),
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_cache_reads_once_until_invalidated() {
        let source = Arc::new(CountingSource::new(10, false));
        let cache = SettingsCache::new(source.clone());

        assert_eq!(cache.get().batch_size, 10);
        assert_eq!(cache.get().batch_size, 10);
        assert_eq!(source.loads.load(std::sync::atomic::Ordering::SeqCst), 1);

        *source.batch_size.lock().unwrap() = 20;
        assert_eq!(cache.get().batch_size, 10);

        cache.invalidate();
        assert_eq!(cache.generation(), 1);
        assert_eq!(cache.get().batch_size, 20);
        assert_eq!(source.loads.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn test_failing_source_falls_back_to_defaults() {
        let source = Arc::new(CountingSource::new(10, true));
        let cache = SettingsCache::new(source.clone());

        assert_eq!(cache.get(), IngestSettings::default());
        // failures are not cached
        cache.get();
        assert_eq!(source.loads.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[test]
    fn test_normalized_replaces_zeroes() {
        let settings = IngestSettings {
            max_concurrent_tailers: 0,
            batch_size: 0,
            poll_interval_ms: 0,
            max_entry_bytes: 10,
            ..Default::default()
        }
        .normalized();

        assert_eq!(settings.max_concurrent_tailers, 3);
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.poll_interval_ms, 1000);
        assert_eq!(settings.max_entry_bytes, settings.max_line_bytes);
    }

    #[test]
    fn test_env_source_uses_prefix() {
        // unique prefix so parallel tests do not interfere
        let prefix = "LOGSYNC_TEST_SETTINGS_ENV_";
        unsafe {
            std::env::set_var(format!("{}BATCH_SIZE", prefix), "250");
            std::env::set_var(format!("{}MAX_FILE_AGE_DAYS", prefix), "7");
        }

        let settings = EnvSettingsSource::with_prefix(prefix).load().unwrap();
        assert_eq!(settings.batch_size, 250);
        assert_eq!(settings.max_file_age_days, 7);
        assert_eq!(settings.poll_interval_ms, 1000);

        unsafe {
            std::env::set_var(format!("{}BATCH_SIZE", prefix), "lots");
        }
        let err = EnvSettingsSource::with_prefix(prefix).load().unwrap_err();
        assert!(err.to_string().contains("failed to parse settings"));

        unsafe {
            std::env::remove_var(format!("{}BATCH_SIZE", prefix));
            std::env::remove_var(format!("{}MAX_FILE_AGE_DAYS", prefix));
        }
    }

    #[test]
    fn test_tailer_config_from_settings() {
        let config = IngestSettings {
            poll_interval_ms: 250,
            multiline_flush_ms: 750,
            ..Default::default()
        }
        .tailer_config();
        assert_eq!(config.poll_interval, Duration::from_millis(250));
        assert_eq!(config.multiline_flush, Duration::from_millis(750));
    }
}
