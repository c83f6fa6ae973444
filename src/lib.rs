//! Workspace umbrella crate.
//!
//! Exposes feature flags that map to the individual workspace crates
//! (`core-service`, `core-cache`). Hosts can depend on `rangecache-workspace`
//! and enable the documented features without wiring each crate individually.

#[cfg(feature = "desktop-shims")]
pub use core_service as service;

#[cfg(feature = "cache-core")]
pub use core_cache as cache;
