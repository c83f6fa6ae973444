//! Cache read telemetry.

use core_runtime::events::{CacheEvent, CoreEvent, EventBus};
use tracing::trace;

/// Receives telemetry from [`CacheDataSource`](crate::CacheDataSource).
pub trait CacheEventListener: Send + Sync {
    /// Called on close of a reader session that served bytes from the cache.
    ///
    /// `cache_size_bytes` is the cache usage at that moment.
    fn on_cached_bytes_read(&self, cache_size_bytes: u64, cached_bytes_read: u64);
}

/// Republishes cache telemetry on the [`EventBus`].
#[derive(Debug, Clone)]
pub struct EventBusCacheListener {
    event_bus: EventBus,
}

impl EventBusCacheListener {
    pub fn new(event_bus: EventBus) -> Self {
        Self { event_bus }
    }
}

impl CacheEventListener for EventBusCacheListener {
    fn on_cached_bytes_read(&self, cache_size_bytes: u64, cached_bytes_read: u64) {
        let event = CoreEvent::Cache(CacheEvent::CachedBytesRead {
            cache_size_bytes,
            cached_bytes_read,
        });
        // No subscribers is not an error for telemetry.
        if self.event_bus.emit(event).is_err() {
            trace!("No subscribers for cache telemetry");
        }
    }
}
