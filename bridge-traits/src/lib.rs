//! # Host Bridge Traits
//!
//! Contracts between the cache core and the outside world.
//!
//! ## Overview
//!
//! The cache core never talks to the network or to a host logging system
//! directly. It consumes the traits defined here, and each host platform ships
//! concrete adapters (see `bridge-desktop`).
//!
//! ## Traits
//!
//! ### Data Transfer
//! - [`DataSource`](source::DataSource) - Sequential reads of a byte range (HTTP, local file)
//! - [`DataSink`](source::DataSink) - Persisting a byte stream (cache writer)
//! - [`DataSourceFactory`](source::DataSourceFactory) - One source per reader session
//!
//! ### Utilities
//! - [`Clock`](time::Clock) - Time source for deterministic testing
//! - [`LoggerSink`](time::LoggerSink) - Forward structured logs to host logging
//!
//! ## Error Handling
//!
//! All bridge traits use [`BridgeError`](error::BridgeError). Sources must
//! report a read position past the end of the resource as
//! [`BridgeError::PositionOutOfRange`](error::BridgeError::PositionOutOfRange)
//! so callers can discover the length of unbounded streams.
//!
//! ## Thread Safety
//!
//! Sources and sinks are `Send` so reader sessions can move between worker
//! threads; factories are `Send + Sync` and shared.

pub mod error;
pub mod http;
pub mod source;
pub mod time;

pub use error::BridgeError;

pub use http::{ContentRange, RetryPolicy};
pub use source::{DataSink, DataSource, DataSourceFactory, DataSpec, ReadOutcome, FLAG_ALLOW_GZIP};
pub use time::{Clock, LogEntry, LogLevel, LoggerSink, ManualClock, SystemClock};
