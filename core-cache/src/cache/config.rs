//! Cache configuration and policies

use crate::error::{CacheError, Result};
use core_runtime::config::{CoreConfig, FeatureFlags};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the on-disk cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Directory holding span files and the content index
    pub cache_dir: PathBuf,

    /// Maximum committed bytes before eviction (default: 512 MiB)
    pub max_cache_bytes: u64,

    /// Span file size at which cache writes roll over (default: 5 MiB)
    pub max_cache_file_size: u64,

    /// Eviction policy when the cache is full
    pub eviction_policy: EvictionPolicy,

    /// Bound on blocking hole-lock waits; `None` waits indefinitely
    pub lock_wait_timeout: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from("rangecache"),
            max_cache_bytes: 512 * 1024 * 1024,
            max_cache_file_size: 5 * 1024 * 1024,
            eviction_policy: EvictionPolicy::LeastRecentlyUsed,
            lock_wait_timeout: None,
        }
    }
}

impl CacheConfig {
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            ..Self::default()
        }
    }

    /// Set maximum cache size.
    pub fn with_max_size(mut self, bytes: u64) -> Self {
        self.max_cache_bytes = bytes;
        self
    }

    /// Set the span file roll-over size.
    pub fn with_max_file_size(mut self, bytes: u64) -> Self {
        self.max_cache_file_size = bytes;
        self
    }

    /// Set eviction policy.
    pub fn with_eviction_policy(mut self, policy: EvictionPolicy) -> Self {
        self.eviction_policy = policy;
        self
    }

    /// Bound blocking lock waits.
    pub fn with_lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lock_wait_timeout = Some(timeout);
        self
    }

    /// Validate configuration.
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(CacheError::Config("cache_dir cannot be empty".to_string()));
        }

        if self.max_cache_bytes == 0 {
            return Err(CacheError::Config(
                "max_cache_bytes must be greater than 0".to_string(),
            ));
        }

        if self.max_cache_file_size == 0 {
            return Err(CacheError::Config(
                "max_cache_file_size must be greater than 0".to_string(),
            ));
        }

        if self.lock_wait_timeout == Some(Duration::ZERO) {
            return Err(CacheError::Config(
                "lock_wait_timeout must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

impl From<&CoreConfig> for CacheConfig {
    fn from(config: &CoreConfig) -> Self {
        Self {
            cache_dir: config.cache_dir.clone(),
            max_cache_bytes: config.max_cache_bytes,
            max_cache_file_size: config.max_cache_file_size,
            eviction_policy: EvictionPolicy::LeastRecentlyUsed,
            lock_wait_timeout: config.lock_wait_timeout,
        }
    }
}

/// Policy flags of a [`CacheDataSource`](crate::CacheDataSource).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CacheFlags {
    /// Wait for holes held by other readers instead of bypassing the cache
    pub block_on_cache: bool,

    /// Bypass the cache after a cache error was seen
    pub ignore_cache_on_error: bool,

    /// Let requests of unknown length populate the cache
    pub cache_unbounded_requests: bool,
}

impl From<FeatureFlags> for CacheFlags {
    fn from(features: FeatureFlags) -> Self {
        Self {
            block_on_cache: features.block_on_cache,
            ignore_cache_on_error: features.ignore_cache_on_error,
            cache_unbounded_requests: features.cache_unbounded_requests,
        }
    }
}

/// Policy for evicting spans when the cache is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvictionPolicy {
    /// Remove spans that haven't been read recently
    LeastRecentlyUsed,

    /// Never evict; the cache grows without bound
    None,
}

impl EvictionPolicy {
    pub fn description(&self) -> &'static str {
        match self {
            EvictionPolicy::LeastRecentlyUsed => "Remove spans that haven't been read recently",
            EvictionPolicy::None => "Never evict cached spans",
        }
    }
}
