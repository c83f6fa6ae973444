//! # Cache Store
//!
//! The [`Cache`] contract consumed by [`CacheDataSource`](crate::CacheDataSource)
//! and its on-disk implementation, [`SimpleCache`].
//!
//! ## Spans and holes
//!
//! For each key the cache holds a set of non-overlapping cached spans, each
//! backed by one file. Any position not covered by a cached span lies in a
//! hole. `start_read_write*` hands out a hole span as an exclusive lock: until
//! it is released no other caller can obtain a hole overlapping it, so two
//! writers never materialise the same bytes.
//!
//! ## Write path
//!
//! A writer holding a hole calls [`Cache::start_file`] to obtain a path inside
//! the hole, writes the bytes, then registers the file with
//! [`Cache::commit_file`].

pub mod config;
pub mod evictor;
pub mod index;
pub mod simple;
pub mod stats;

pub use config::{CacheConfig, CacheFlags, EvictionPolicy};
pub use evictor::{CacheEvictor, LeastRecentlyUsedCacheEvictor, NoOpCacheEvictor, SpanId};
pub use simple::SimpleCache;
pub use stats::{CacheStats, PrecacheProgress};

use crate::error::Result;
use crate::span::CacheSpan;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Span lookup, hole locking and content-length bookkeeping for keyed
/// resources.
///
/// Implementations are shared between reader sessions on different tasks and
/// must synchronise internally.
#[async_trait]
pub trait Cache: Send + Sync {
    /// Known total length of the resource, if discovered.
    fn content_length(&self, key: &str) -> Option<u64>;

    /// Records the total length of the resource.
    ///
    /// Returns `false` if the value could not be persisted or contradicts a
    /// previously recorded length. Callers log and continue.
    async fn set_content_length(&self, key: &str, length: u64) -> bool;

    /// Waits until either a cached span containing `position` or a hole span
    /// starting at `position` (now held by the caller) can be returned.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::LockAcquisitionInterrupted`](crate::CacheError::LockAcquisitionInterrupted)
    /// if the wait is bounded and expires.
    async fn start_read_write(&self, key: &str, position: u64) -> Result<CacheSpan>;

    /// Like [`start_read_write`](Cache::start_read_write) but returns `None`
    /// instead of waiting when `position` lies in a hole held by another
    /// caller.
    async fn start_read_write_non_blocking(
        &self,
        key: &str,
        position: u64,
    ) -> Result<Option<CacheSpan>>;

    /// Releases a hole span obtained from `start_read_write*`.
    ///
    /// Releasing a span that is not held is a no-op.
    fn release_hole_span(&self, span: &CacheSpan);

    /// Bytes currently held by cached spans across all keys.
    fn cache_space_bytes(&self) -> u64;

    /// Returns a path to write up to `max_length` bytes of `key` starting at
    /// `position`. The caller must hold a hole containing `position`.
    async fn start_file(&self, key: &str, position: u64, max_length: u64) -> Result<PathBuf>;

    /// Registers a file obtained from [`start_file`](Cache::start_file) as a
    /// cached span. Files that would overlap cached data are deleted and
    /// rejected.
    async fn commit_file(&self, file: &Path) -> Result<()>;

    /// Cached spans of `key`, ordered by position.
    fn cached_spans(&self, key: &str) -> Vec<CacheSpan>;

    /// Keys with cached spans or a recorded content length.
    fn keys(&self) -> Vec<String>;

    /// Returns `true` if `[position, position + length)` is fully cached.
    fn is_cached(&self, key: &str, position: u64, length: u64) -> bool {
        self.cached_bytes(key, position, Some(length)) >= length
    }

    /// Number of contiguous cached bytes starting at `position`, capped at
    /// `length` when given.
    fn cached_bytes(&self, key: &str, position: u64, length: Option<u64>) -> u64;

    /// Removes a cached span and deletes its file.
    async fn remove_span(&self, span: &CacheSpan) -> Result<()>;

    /// Removes every cached span and the recorded length of `key`.
    async fn remove_content(&self, key: &str) -> Result<()>;
}
