//! Factory creating one [`CacheDataSource`] per reader session.

use crate::cache::{Cache, CacheFlags};
use crate::data_source::CacheDataSource;
use crate::listener::CacheEventListener;
use bridge_traits::{DataSource, DataSourceFactory};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Shares a cache, an upstream factory and policy between reader sessions.
#[derive(Clone)]
pub struct CacheDataSourceFactory {
    cache: Arc<dyn Cache>,
    upstream_factory: Arc<dyn DataSourceFactory>,
    flags: CacheFlags,
    max_cache_file_size: u64,
    listener: Option<Arc<dyn CacheEventListener>>,
    cancel: Option<CancellationToken>,
}

impl CacheDataSourceFactory {
    pub fn new(
        cache: Arc<dyn Cache>,
        upstream_factory: Arc<dyn DataSourceFactory>,
        flags: CacheFlags,
        max_cache_file_size: u64,
    ) -> Self {
        Self {
            cache,
            upstream_factory,
            flags,
            max_cache_file_size,
            listener: None,
            cancel: None,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn CacheEventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Every created source stops blocking hole waits once `token` is
    /// cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    pub fn flags(&self) -> CacheFlags {
        self.flags
    }

    pub fn create_cache_data_source(&self) -> CacheDataSource {
        let mut source = CacheDataSource::new(
            self.cache.clone(),
            self.upstream_factory.create(),
            self.flags,
            self.max_cache_file_size,
        );
        if let Some(listener) = &self.listener {
            source = source.with_listener(listener.clone());
        }
        if let Some(token) = &self.cancel {
            source = source.with_cancellation(token.clone());
        }
        source
    }
}

impl DataSourceFactory for CacheDataSourceFactory {
    fn create(&self) -> Box<dyn DataSource> {
        Box::new(self.create_cache_data_source())
    }
}
