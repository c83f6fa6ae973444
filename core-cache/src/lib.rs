//! # Range Cache Core
//!
//! Disk-backed caching of byte ranges of keyed remote resources.
//!
//! ## Overview
//!
//! This crate provides:
//! - The [`Cache`] contract: span lookup, hole locking, content-length
//!   bookkeeping and space accounting
//! - [`SimpleCache`], a directory-backed implementation with LRU eviction
//! - [`CacheDataSource`], a [`DataSource`](bridge_traits::DataSource) that
//!   serves any range by combining cached spans with upstream reads, writing
//!   fetched data into the cache as it goes
//! - [`precache`] and [`cached_stats`] for populating and inspecting the cache
//!
//! ## Usage
//!
//! ```rust,ignore
//! use core_cache::{CacheConfig, CacheDataSourceFactory, CacheFlags, SimpleCache};
//!
//! let cache = SimpleCache::create(CacheConfig::new("/var/cache/rangecache")).await?;
//! let factory = CacheDataSourceFactory::new(cache, upstream_factory, CacheFlags::default(), 5 << 20);
//!
//! let mut source = factory.create_cache_data_source();
//! source.open(&DataSpec::new(url).with_key("episode-42").with_range(0, Some(1000))).await?;
//! ```

pub mod cache;
pub mod data_source;
pub mod error;
pub mod factory;
pub mod file_source;
pub mod listener;
pub mod precache;
pub mod sink;
pub mod span;
pub mod tee;

pub use cache::{
    Cache, CacheConfig, CacheEvictor, CacheFlags, CacheStats, EvictionPolicy,
    LeastRecentlyUsedCacheEvictor, NoOpCacheEvictor, PrecacheProgress, SimpleCache, SpanId,
};
pub use data_source::{CacheDataSource, HoleSpanGuard};
pub use error::{CacheError, Result};
pub use factory::CacheDataSourceFactory;
pub use file_source::FileDataSource;
pub use listener::{CacheEventListener, EventBusCacheListener};
pub use precache::{cached_stats, precache, ProgressCallback};
pub use sink::CacheDataSink;
pub use span::CacheSpan;
pub use tee::TeeDataSource;
