//! Byte-Range Data Source Abstractions
//!
//! Contracts for reading a byte range of a resource (`DataSource`) and for
//! persisting a byte stream (`DataSink`). Upstream sources (HTTP), local file
//! readers and the cache orchestrator all speak this contract.

use async_trait::async_trait;

use crate::error::Result;

/// Allow the source to negotiate a compressed transfer encoding.
///
/// Only safe when the caller does not rely on byte offsets of the response
/// matching offsets of the resource.
pub const FLAG_ALLOW_GZIP: u32 = 1 << 0;

/// Describes the byte range of a resource to open.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataSpec {
    /// Location of the data (remote URL or local file path).
    pub uri: String,
    /// Offset of the first byte to read.
    pub position: u64,
    /// Number of bytes to read, `None` for an open-ended request.
    pub length: Option<u64>,
    /// Cache key identifying the logical resource independent of `uri`.
    pub key: Option<String>,
    /// Request flags (`FLAG_*`).
    pub flags: u32,
}

impl DataSpec {
    /// Open-ended request for the whole resource.
    pub fn new(uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            position: 0,
            length: None,
            key: None,
            flags: 0,
        }
    }

    pub fn with_range(mut self, position: u64, length: Option<u64>) -> Self {
        self.position = position;
        self.length = length;
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Some(key.into());
        self
    }

    pub fn with_flags(mut self, flags: u32) -> Self {
        self.flags = flags;
        self
    }

    /// Key under which the resource is cached; falls back to the URI.
    pub fn cache_key(&self) -> &str {
        self.key.as_deref().unwrap_or(&self.uri)
    }

    /// Returns `true` if the request has no known length.
    pub fn is_unbounded(&self) -> bool {
        self.length.is_none()
    }

    pub fn is_flag_set(&self, flag: u32) -> bool {
        self.flags & flag == flag
    }
}

/// Result of a single read call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Number of bytes copied into the buffer.
    Bytes(usize),
    /// The opened range has been fully consumed.
    EndOfInput,
}

impl ReadOutcome {
    pub fn is_end_of_input(&self) -> bool {
        matches!(self, ReadOutcome::EndOfInput)
    }
}

/// A readable byte-range source.
///
/// Sources are stateful: `open` selects a range, `read` consumes it
/// sequentially, `close` releases any resources. A source may be reopened
/// after `close`.
#[async_trait]
pub trait DataSource: Send {
    /// Opens the source for `spec`.
    ///
    /// Returns the number of bytes that can be read, or `None` if unknown.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::PositionOutOfRange`](crate::error::BridgeError::PositionOutOfRange)
    /// if `spec.position` lies beyond the end of the resource.
    async fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>>;

    /// Reads up to `buf.len()` bytes.
    async fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome>;

    /// Closes the source. Safe to call when not open.
    async fn close(&mut self) -> Result<()>;

    /// URI currently being read, if open.
    fn uri(&self) -> Option<String>;
}

/// A sink that persists a byte stream.
#[async_trait]
pub trait DataSink: Send {
    /// Prepares the sink to receive the data described by `spec`.
    async fn open(&mut self, spec: &DataSpec) -> Result<()>;

    /// Consumes `data`.
    async fn write(&mut self, data: &[u8]) -> Result<()>;

    /// Flushes and finalises everything written since `open`.
    async fn close(&mut self) -> Result<()>;
}

/// Creates fresh [`DataSource`] instances, one per reader session.
pub trait DataSourceFactory: Send + Sync {
    fn create(&self) -> Box<dyn DataSource>;
}

impl<F> DataSourceFactory for F
where
    F: Fn() -> Box<dyn DataSource> + Send + Sync,
{
    fn create(&self) -> Box<dyn DataSource> {
        self()
    }
}
