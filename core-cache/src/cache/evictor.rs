//! Eviction policies for [`SimpleCache`](super::SimpleCache).
//!
//! The cache reports span lifecycle changes to its evictor and asks it which
//! spans to drop before a new file is written. Evictors only choose; the cache
//! removes the chosen spans and deletes their files.

use crate::span::CacheSpan;
use lru::LruCache;

/// Identifies a cached span within the cache.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SpanId {
    pub key: String,
    pub position: u64,
}

impl SpanId {
    pub fn of(span: &CacheSpan) -> Self {
        Self {
            key: span.key.clone(),
            position: span.position,
        }
    }
}

/// Chooses spans to evict.
///
/// Called with the cache's internal lock held; implementations must not block.
pub trait CacheEvictor: Send {
    /// Called once after start-up recovery. Returns spans to evict.
    fn on_cache_initialized(&mut self, total_bytes: u64) -> Vec<SpanId>;

    /// Called before `length` bytes of `key` are written. Returns spans to
    /// evict so the write fits.
    fn on_start_file(&mut self, key: &str, length: u64, total_bytes: u64) -> Vec<SpanId>;

    fn on_span_added(&mut self, span: &CacheSpan);

    fn on_span_removed(&mut self, span: &CacheSpan);

    /// Called when a cached span is handed out for reading.
    fn on_span_touched(&mut self, span: &CacheSpan);
}

/// Evicts least recently read spans once the cache exceeds `max_bytes`.
///
/// Spans of the key being written are never chosen on `on_start_file`, so a
/// writer cannot evict data just ahead of or behind its own read position.
pub struct LeastRecentlyUsedCacheEvictor {
    max_bytes: u64,
    spans: LruCache<SpanId, u64>,
}

impl LeastRecentlyUsedCacheEvictor {
    pub fn new(max_bytes: u64) -> Self {
        Self {
            max_bytes,
            spans: LruCache::unbounded(),
        }
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    fn choose(&self, needed: u64, protected_key: Option<&str>) -> Vec<SpanId> {
        let mut freed = 0;
        let mut chosen = Vec::new();
        // `iter()` runs most to least recent.
        for (id, &length) in self.spans.iter().rev() {
            if freed >= needed {
                break;
            }
            if protected_key == Some(id.key.as_str()) {
                continue;
            }
            freed += length;
            chosen.push(id.clone());
        }
        chosen
    }
}

impl CacheEvictor for LeastRecentlyUsedCacheEvictor {
    fn on_cache_initialized(&mut self, total_bytes: u64) -> Vec<SpanId> {
        self.choose(total_bytes.saturating_sub(self.max_bytes), None)
    }

    fn on_start_file(&mut self, key: &str, length: u64, total_bytes: u64) -> Vec<SpanId> {
        let needed = (total_bytes + length).saturating_sub(self.max_bytes);
        if needed == 0 {
            return Vec::new();
        }
        self.choose(needed, Some(key))
    }

    fn on_span_added(&mut self, span: &CacheSpan) {
        self.spans.put(SpanId::of(span), span.length.unwrap_or(0));
    }

    fn on_span_removed(&mut self, span: &CacheSpan) {
        self.spans.pop(&SpanId::of(span));
    }

    fn on_span_touched(&mut self, span: &CacheSpan) {
        self.spans.promote(&SpanId::of(span));
    }
}

/// Never evicts.
#[derive(Debug, Default)]
pub struct NoOpCacheEvictor;

impl CacheEvictor for NoOpCacheEvictor {
    fn on_cache_initialized(&mut self, _total_bytes: u64) -> Vec<SpanId> {
        Vec::new()
    }

    fn on_start_file(&mut self, _key: &str, _length: u64, _total_bytes: u64) -> Vec<SpanId> {
        Vec::new()
    }

    fn on_span_added(&mut self, _span: &CacheSpan) {}

    fn on_span_removed(&mut self, _span: &CacheSpan) {}

    fn on_span_touched(&mut self, _span: &CacheSpan) {}
}
