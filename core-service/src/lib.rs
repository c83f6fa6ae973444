//! Core service façade and bootstrap helpers.
//!
//! This crate wires a validated [`CoreConfig`] into a running cache: the
//! on-disk [`SimpleCache`], the [`EventBus`] carrying cache telemetry, and the
//! factories handing out one [`CacheDataSource`] per reader session. Desktop
//! apps typically enable the `desktop-shims` feature, which lets the config
//! builder fall back to the HTTP upstream and platform cache directory from
//! `bridge-desktop`.

pub mod error;

pub use error::{CoreError, Result};

use std::sync::Arc;

use bridge_traits::DataSpec;
use core_cache::{
    cached_stats, precache, Cache, CacheConfig, CacheDataSource, CacheDataSourceFactory,
    CacheFlags, CacheStats, EventBusCacheListener, PrecacheProgress, SimpleCache,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CacheEvent, CoreEvent, EventBus, EventStream, PrecacheEvent};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, trace, warn};

/// Precache jobs allowed to download at the same time.
pub const MAX_CONCURRENT_PRECACHE: usize = 2;

struct ServiceInner {
    config: CoreConfig,
    cache: Arc<SimpleCache>,
    event_bus: EventBus,
    readers: CacheDataSourceFactory,
    precachers: CacheDataSourceFactory,
    precache_permits: Semaphore,
    shutdown: CancellationToken,
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct CoreService {
    inner: Arc<ServiceInner>,
}

impl CoreService {
    /// Opens the cache described by `config` and wires the reader factories.
    ///
    /// Spans left on disk by a previous run are recovered before this returns.
    #[instrument(skip_all, fields(cache_dir = %config.cache_dir.display()))]
    pub async fn bootstrap(config: CoreConfig) -> Result<Self> {
        let cache = SimpleCache::create(CacheConfig::from(&config)).await?;
        let event_bus = EventBus::new(config.event_buffer_size);
        let shutdown = CancellationToken::new();
        let dyn_cache: Arc<dyn Cache> = cache.clone();

        let readers = CacheDataSourceFactory::new(
            dyn_cache.clone(),
            config.upstream_factory.clone(),
            config.features.into(),
            config.max_cache_file_size,
        )
        .with_listener(Arc::new(EventBusCacheListener::new(event_bus.clone())))
        .with_cancellation(shutdown.clone());

        // Precache jobs wait for other writers and cache open-ended ranges.
        let precache_flags = CacheFlags {
            block_on_cache: true,
            cache_unbounded_requests: true,
            ..CacheFlags::from(config.features)
        };
        let precachers = CacheDataSourceFactory::new(
            dyn_cache,
            config.upstream_factory.clone(),
            precache_flags,
            config.max_cache_file_size,
        )
        .with_cancellation(shutdown.clone());

        let stats = cache.stats();
        info!(
            keys = stats.keys,
            spans = stats.cached_spans,
            bytes = stats.total_bytes,
            average_span = stats.average_span_size(),
            usage = %format!("{:.1}%", stats.usage_percentage()),
            "Core service ready"
        );
        if stats.is_near_capacity() {
            warn!(
                over_budget = stats.space_needed(),
                full = stats.is_full(),
                "Cache is near capacity"
            );
        }

        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                cache,
                event_bus,
                readers,
                precachers,
                precache_permits: Semaphore::new(MAX_CONCURRENT_PRECACHE),
                shutdown,
            }),
        })
    }

    /// Bootstraps with desktop defaults: platform cache directory and the
    /// reqwest-backed HTTP upstream.
    #[cfg(feature = "desktop-shims")]
    pub async fn bootstrap_desktop() -> Result<Self> {
        let config = CoreConfig::builder().build()?;
        Self::bootstrap(config).await
    }

    pub fn config(&self) -> &CoreConfig {
        &self.inner.config
    }

    pub fn cache(&self) -> Arc<SimpleCache> {
        Arc::clone(&self.inner.cache)
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    /// Subscribe to cache and precache events published from now on.
    pub fn subscribe(&self) -> EventStream {
        EventStream::new(self.inner.event_bus.subscribe())
    }

    /// Factory for cache-aware reader sessions.
    pub fn data_source_factory(&self) -> &CacheDataSourceFactory {
        &self.inner.readers
    }

    /// A new reader session over the shared cache.
    pub fn create_data_source(&self) -> Result<CacheDataSource> {
        self.ensure_running()?;
        Ok(self.inner.readers.create_cache_data_source())
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Bytes of `spec` already cached.
    pub fn cached_stats(&self, spec: &DataSpec) -> PrecacheProgress {
        cached_stats(spec, self.inner.cache.as_ref())
    }

    /// Downloads the uncached parts of `spec` into the cache.
    ///
    /// At most [`MAX_CONCURRENT_PRECACHE`] jobs download at once; further jobs
    /// wait for a slot. Progress is published as [`PrecacheEvent`]s.
    #[instrument(skip_all, fields(key = %spec.cache_key()))]
    pub async fn precache(&self, spec: DataSpec) -> Result<PrecacheProgress> {
        self.ensure_running()?;
        let key = spec.cache_key().to_string();

        let _permit = tokio::select! {
            _ = self.inner.shutdown.cancelled() => return Err(CoreError::ShutDown),
            permit = self.inner.precache_permits.acquire() => {
                permit.map_err(|_| CoreError::ShutDown)?
            }
        };

        let initial = self.cached_stats(&spec);
        self.publish(CoreEvent::Precache(PrecacheEvent::Started {
            key: key.clone(),
            total_bytes: initial.total_bytes,
            cached_bytes: initial.cached_bytes,
        }));

        let event_bus = &self.inner.event_bus;
        let report = |progress: &PrecacheProgress| {
            let _ = event_bus.emit(CoreEvent::Precache(PrecacheEvent::Progress {
                key: key.clone(),
                total_bytes: progress.total_bytes,
                cached_bytes: progress.cached_bytes,
            }));
        };

        let mut source = self.inner.precachers.create_cache_data_source();
        let result = precache(
            &spec,
            self.inner.cache.as_ref(),
            &mut source,
            Some(&report),
            Some(&self.inner.shutdown),
        )
        .await
        .map_err(CoreError::from);

        let event = match &result {
            Ok(progress) => {
                info!(downloaded = progress.downloaded_bytes, "Precache completed");
                PrecacheEvent::Completed {
                    key,
                    downloaded_bytes: progress.downloaded_bytes,
                }
            }
            Err(e) if e.is_cancelled() || self.is_shut_down() => PrecacheEvent::Cancelled { key },
            Err(e) => {
                warn!(error = %e, "Precache failed");
                PrecacheEvent::Failed {
                    key,
                    message: e.to_string(),
                }
            }
        };
        self.publish(CoreEvent::Precache(event));
        result
    }

    /// Runs [`precache`](Self::precache) on a background task.
    pub fn spawn_precache(&self, spec: DataSpec) -> JoinHandle<Result<PrecacheProgress>> {
        let service = self.clone();
        tokio::spawn(async move { service.precache(spec).await })
    }

    /// Drops every span and the content length of `key`.
    ///
    /// Fails while a reader holds a hole of `key`.
    #[instrument(skip(self))]
    pub async fn remove_content(&self, key: &str) -> Result<()> {
        self.inner.cache.remove_content(key).await?;
        self.publish(CoreEvent::Cache(CacheEvent::ContentRemoved {
            key: key.to_string(),
        }));
        Ok(())
    }

    /// Cancels precache jobs and blocked hole waits, and refuses new work.
    pub fn shutdown(&self) {
        info!("Shutting down core service");
        self.inner.shutdown.cancel();
        self.inner.precache_permits.close();
    }

    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    fn ensure_running(&self) -> Result<()> {
        if self.is_shut_down() {
            return Err(CoreError::ShutDown);
        }
        Ok(())
    }

    fn publish(&self, event: CoreEvent) {
        if self.inner.event_bus.emit(event).is_err() {
            trace!("No event subscribers");
        }
    }
}
