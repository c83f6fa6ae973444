//! # Core Configuration Module
//!
//! Provides configuration management for the range cache core.
//!
//! ## Overview
//!
//! The configuration system uses a builder pattern to construct a `CoreConfig`
//! instance that holds the storage settings, cache policy flags and the
//! upstream source factory. Validation is fail-fast: a config that would make
//! the cache misbehave at runtime is rejected at `build()`.
//!
//! ## Dependencies
//!
//! - `DataSourceFactory` - Creates upstream sources (desktop default: reqwest)
//!
//! When the `desktop-shims` feature is enabled, the HTTP upstream factory and
//! the platform cache directory are injected automatically if not provided.
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::time::Duration;
//!
//! let config = CoreConfig::builder()
//!     .cache_dir("/path/to/cache")
//!     .max_cache_bytes(256 * 1024 * 1024)
//!     .lock_wait_timeout(Duration::from_secs(30))
//!     .block_on_cache(true)
//!     .build()
//!     .expect("Failed to build config");
//! ```
//!
//! ## Error Handling
//!
//! ```should_panic
//! use core_runtime::config::CoreConfig;
//!
//! // A zero-byte cache can never hold a span
//! let config = CoreConfig::builder()
//!     .cache_dir("/tmp/rangecache")
//!     .max_cache_bytes(0)
//!     .build()
//!     .expect("Should fail - empty cache");
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{DataSourceFactory, RetryPolicy};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

/// Default cache budget: 512 MiB.
pub const DEFAULT_MAX_CACHE_BYTES: u64 = 512 * 1024 * 1024;

/// Default size at which a cache write rolls over to a new span file.
pub const DEFAULT_MAX_CACHE_FILE_SIZE: u64 = 5 * 1024 * 1024;

/// Largest accepted cache budget: 1 TiB.
pub const MAX_CACHE_BYTES_LIMIT: u64 = 1024 * 1024 * 1024 * 1024;

/// Core configuration for the range cache.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    /// Directory holding span files and the content index
    pub cache_dir: PathBuf,

    /// Upper bound on committed span bytes before LRU eviction kicks in
    pub max_cache_bytes: u64,

    /// Span file size at which cache writes roll over
    pub max_cache_file_size: u64,

    /// Bound on how long a reader waits for another reader's hole lock.
    /// `None` waits indefinitely.
    pub lock_wait_timeout: Option<Duration>,

    /// Cache policy flags
    pub features: FeatureFlags,

    /// Capacity of the event bus channel
    pub event_buffer_size: usize,

    /// Retry policy used by the default HTTP upstream
    pub http_retry_policy: RetryPolicy,

    /// Creates upstream sources, one per reader session
    pub upstream_factory: Arc<dyn DataSourceFactory>,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("cache_dir", &self.cache_dir)
            .field("max_cache_bytes", &self.max_cache_bytes)
            .field("max_cache_file_size", &self.max_cache_file_size)
            .field("lock_wait_timeout", &self.lock_wait_timeout)
            .field("features", &self.features)
            .field("event_buffer_size", &self.event_buffer_size)
            .field("http_retry_policy", &self.http_retry_policy)
            .field("upstream_factory", &"DataSourceFactory { ... }")
            .finish()
    }
}

/// Cache policy flags.
///
/// All flags default to `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    /// Wait for a hole held by another reader instead of bypassing the cache
    pub block_on_cache: bool,

    /// After a cache error, serve later requests straight from upstream
    pub ignore_cache_on_error: bool,

    /// Cache requests whose length is unknown
    pub cache_unbounded_requests: bool,
}

impl CoreConfig {
    /// Creates a new builder for constructing a `CoreConfig`.
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] with an actionable message for the first
    /// invalid setting.
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config(
                "Cache directory must not be empty".to_string(),
            ));
        }

        if self.max_cache_bytes == 0 {
            return Err(Error::Config(
                "Cache size must be greater than 0 bytes".to_string(),
            ));
        }

        if self.max_cache_bytes > MAX_CACHE_BYTES_LIMIT {
            return Err(Error::Config(
                "Cache size exceeds maximum of 1 TiB".to_string(),
            ));
        }

        if self.max_cache_file_size == 0 {
            return Err(Error::Config(
                "Maximum cache file size must be greater than 0 bytes".to_string(),
            ));
        }

        if self.max_cache_file_size > self.max_cache_bytes {
            return Err(Error::Config(format!(
                "Maximum cache file size ({} bytes) exceeds the cache size ({} bytes)",
                self.max_cache_file_size, self.max_cache_bytes
            )));
        }

        if self.lock_wait_timeout == Some(Duration::ZERO) {
            return Err(Error::Config(
                "Lock wait timeout must be greater than 0. Omit it to wait indefinitely."
                    .to_string(),
            ));
        }

        if self.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.http_retry_policy.max_attempts == 0 {
            return Err(Error::Config(
                "HTTP retry policy must allow at least one attempt".to_string(),
            ));
        }

        Ok(())
    }
}

/// Builder for constructing `CoreConfig` instances.
#[derive(Default)]
pub struct CoreConfigBuilder {
    cache_dir: Option<PathBuf>,
    max_cache_bytes: Option<u64>,
    max_cache_file_size: Option<u64>,
    lock_wait_timeout: Option<Duration>,
    features: FeatureFlags,
    event_buffer_size: Option<usize>,
    http_retry_policy: Option<RetryPolicy>,
    upstream_factory: Option<Arc<dyn DataSourceFactory>>,
}

impl CoreConfigBuilder {
    /// Sets the cache directory.
    ///
    /// Required unless the `desktop-shims` feature supplies the platform
    /// cache directory.
    pub fn cache_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.cache_dir = Some(path.as_ref().to_path_buf());
        self
    }

    /// Sets the cache budget in bytes.
    ///
    /// Default: 512 MiB
    pub fn max_cache_bytes(mut self, bytes: u64) -> Self {
        self.max_cache_bytes = Some(bytes);
        self
    }

    /// Sets the span file size at which cache writes roll over.
    ///
    /// Default: 5 MiB
    pub fn max_cache_file_size(mut self, bytes: u64) -> Self {
        self.max_cache_file_size = Some(bytes);
        self
    }

    /// Bounds how long a blocking reader waits for a hole lock.
    pub fn lock_wait_timeout(mut self, timeout: Duration) -> Self {
        self.lock_wait_timeout = Some(timeout);
        self
    }

    /// Wait for holes held by other readers instead of bypassing the cache.
    ///
    /// Default: false
    pub fn block_on_cache(mut self, enabled: bool) -> Self {
        self.features.block_on_cache = enabled;
        self
    }

    /// Bypass the cache for later requests once a cache error was seen.
    ///
    /// Default: false
    pub fn ignore_cache_on_error(mut self, enabled: bool) -> Self {
        self.features.ignore_cache_on_error = enabled;
        self
    }

    /// Cache requests whose length is unknown.
    ///
    /// Default: false
    pub fn cache_unbounded_requests(mut self, enabled: bool) -> Self {
        self.features.cache_unbounded_requests = enabled;
        self
    }

    /// Sets all feature flags at once.
    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Sets the capacity of the event bus channel.
    ///
    /// Default: 100
    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.event_buffer_size = Some(size);
        self
    }

    /// Sets the retry policy of the default HTTP upstream.
    ///
    /// Ignored when a custom upstream factory is provided.
    pub fn http_retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.http_retry_policy = Some(policy);
        self
    }

    /// Sets the upstream source factory.
    ///
    /// If not provided, the desktop default (reqwest-based) will be used when
    /// the `desktop-shims` feature is enabled.
    pub fn upstream_factory(mut self, factory: Arc<dyn DataSourceFactory>) -> Self {
        self.upstream_factory = Some(factory);
        self
    }

    /// Builds the final `CoreConfig` instance.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - No cache directory is set and no platform default is available
    /// - No upstream factory is set and no platform default is available
    /// - Any value fails [`CoreConfig::validate`]
    pub fn build(self) -> Result<CoreConfig> {
        let cache_dir = match self.cache_dir {
            Some(dir) => dir,
            None => provide_default_cache_dir()?,
        };

        let http_retry_policy = self.http_retry_policy.unwrap_or_default();

        let upstream_factory = match self.upstream_factory {
            Some(factory) => factory,
            None => provide_default_upstream_factory(&http_retry_policy)?,
        };

        let config = CoreConfig {
            cache_dir,
            max_cache_bytes: self.max_cache_bytes.unwrap_or(DEFAULT_MAX_CACHE_BYTES),
            max_cache_file_size: self
                .max_cache_file_size
                .unwrap_or(DEFAULT_MAX_CACHE_FILE_SIZE),
            lock_wait_timeout: self.lock_wait_timeout,
            features: self.features,
            event_buffer_size: self.event_buffer_size.unwrap_or(DEFAULT_EVENT_BUFFER_SIZE),
            http_retry_policy,
            upstream_factory,
        };

        config.validate()?;

        Ok(config)
    }
}

#[cfg(feature = "desktop-shims")]
fn provide_default_cache_dir() -> Result<PathBuf> {
    Ok(bridge_desktop::default_cache_dir()?)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_cache_dir() -> Result<PathBuf> {
    Err(Error::Config(
        "Cache directory is required. Use .cache_dir() to set it.".to_string(),
    ))
}

#[cfg(feature = "desktop-shims")]
fn provide_default_upstream_factory(
    retry_policy: &RetryPolicy,
) -> Result<Arc<dyn DataSourceFactory>> {
    let factory = bridge_desktop::HttpDataSourceFactory::new(retry_policy.clone())?;
    Ok(Arc::new(factory))
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_upstream_factory(
    _retry_policy: &RetryPolicy,
) -> Result<Arc<dyn DataSourceFactory>> {
    Err(Error::CapabilityMissing {
        capability: "DataSourceFactory".to_string(),
        message: "No upstream source factory was provided. Use .upstream_factory() or \
                  enable the desktop-shims feature for the HTTP default."
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::{DataSource, DataSpec, ReadOutcome};

    struct NullSource;

    #[async_trait]
    impl DataSource for NullSource {
        async fn open(&mut self, _spec: &DataSpec) -> BridgeResult<Option<u64>> {
            Ok(Some(0))
        }

        async fn read(&mut self, _buf: &mut [u8]) -> BridgeResult<ReadOutcome> {
            Ok(ReadOutcome::EndOfInput)
        }

        async fn close(&mut self) -> BridgeResult<()> {
            Ok(())
        }

        fn uri(&self) -> Option<String> {
            None
        }
    }

    fn null_factory() -> Arc<dyn DataSourceFactory> {
        Arc::new(|| Box::new(NullSource) as Box<dyn DataSource>)
    }

    fn builder() -> CoreConfigBuilder {
        CoreConfig::builder()
            .cache_dir("/tmp/rangecache-test")
            .upstream_factory(null_factory())
    }

    #[test]
    fn test_builder_defaults() {
        let config = builder().build().unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/tmp/rangecache-test"));
        assert_eq!(config.max_cache_bytes, DEFAULT_MAX_CACHE_BYTES);
        assert_eq!(config.max_cache_file_size, DEFAULT_MAX_CACHE_FILE_SIZE);
        assert_eq!(config.lock_wait_timeout, None);
        assert_eq!(config.features, FeatureFlags::default());
        assert_eq!(config.event_buffer_size, DEFAULT_EVENT_BUFFER_SIZE);
    }

    #[test]
    fn test_feature_flags_default() {
        let flags = FeatureFlags::default();
        assert!(!flags.block_on_cache);
        assert!(!flags.ignore_cache_on_error);
        assert!(!flags.cache_unbounded_requests);
    }

    #[test]
    fn test_builder_with_feature_flags() {
        let config = builder()
            .block_on_cache(true)
            .ignore_cache_on_error(true)
            .cache_unbounded_requests(true)
            .build()
            .unwrap();

        assert!(config.features.block_on_cache);
        assert!(config.features.ignore_cache_on_error);
        assert!(config.features.cache_unbounded_requests);
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_upstream_factory() {
        let result = CoreConfig::builder().cache_dir("/tmp/rangecache").build();
        match result {
            Err(Error::CapabilityMissing { capability, .. }) => {
                assert_eq!(capability, "DataSourceFactory");
            }
            other => panic!("expected CapabilityMissing, got {:?}", other.map(|_| ())),
        }
    }

    #[cfg(not(feature = "desktop-shims"))]
    #[test]
    fn test_builder_requires_cache_dir() {
        let result = CoreConfig::builder()
            .upstream_factory(null_factory())
            .build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[cfg(feature = "desktop-shims")]
    #[test]
    fn test_build_with_desktop_defaults() {
        let config = CoreConfig::builder().build().unwrap();
        assert!(!config.cache_dir.as_os_str().is_empty());
    }

    #[test]
    fn test_validate_rejects_zero_cache_size() {
        let result = builder().max_cache_bytes(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_excessive_cache_size() {
        let result = builder().max_cache_bytes(MAX_CACHE_BYTES_LIMIT + 1).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_rejects_file_size_above_cache_size() {
        let result = builder()
            .max_cache_bytes(1024)
            .max_cache_file_size(4096)
            .build();
        match result {
            Err(Error::Config(message)) => assert!(message.contains("exceeds the cache size")),
            other => panic!("expected Config error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn test_validate_rejects_zero_lock_timeout() {
        let result = builder().lock_wait_timeout(Duration::ZERO).build();
        assert!(matches!(result, Err(Error::Config(_))));

        let config = builder()
            .lock_wait_timeout(Duration::from_millis(250))
            .build()
            .unwrap();
        assert_eq!(config.lock_wait_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_validate_rejects_zero_event_buffer() {
        let result = builder().event_buffer_size(0).build();
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_builder_accepts_pathbuf() {
        let config = builder()
            .cache_dir(PathBuf::from("/var/cache/rc"))
            .build()
            .unwrap();
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/rc"));
    }

    #[test]
    fn test_config_is_cloneable_and_debug_hides_factory() {
        let config = builder().build().unwrap();
        let cloned = config.clone();
        assert_eq!(cloned.max_cache_bytes, config.max_cache_bytes);

        let debug = format!("{:?}", config);
        assert!(debug.contains("DataSourceFactory { ... }"));
    }
}
