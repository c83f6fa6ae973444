//! # Desktop Bridge Implementations
//!
//! Default implementations of bridge traits for desktop platforms
//! (macOS, Windows, Linux).
//!
//! ## Overview
//!
//! - [`HttpDataSource`] reading byte ranges over HTTP using `reqwest`
//! - [`HttpDataSourceFactory`] sharing one connection pool between sources
//! - [`default_cache_dir`] resolving the platform cache directory via `dirs`
//!
//! ## Usage
//!
//! ```ignore
//! use bridge_desktop::{default_cache_dir, HttpDataSourceFactory};
//! use bridge_traits::RetryPolicy;
//!
//! let upstream = HttpDataSourceFactory::new(RetryPolicy::default())?;
//! let cache_dir = default_cache_dir()?;
//! ```

mod filesystem;
mod http;

pub use filesystem::{default_cache_dir, APP_DIR_NAME};
pub use http::{HttpDataSource, HttpDataSourceFactory};
