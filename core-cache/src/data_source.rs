//! # Cache Data Source
//!
//! [`CacheDataSource`] serves a byte range of a keyed resource by stitching
//! together segments read from cached span files, segments fetched from
//! upstream while being written into the cache, and segments fetched from
//! upstream directly when the cache cannot be used.
//!
//! ## Segment selection
//!
//! At each segment boundary the cache is asked for the span at the read
//! position:
//!
//! - cached span: the span file is read from the matching offset
//! - hole span: the hole is now locked by this session; upstream is read
//!   through a tee into the cache, bounded by the hole
//! - no span (hole locked by another reader, non-blocking mode) or cache
//!   ignored: upstream is read directly
//!
//! When a segment ends before the request is satisfied the next one is opened
//! transparently, so callers never observe a short read while data remains.

use crate::cache::{Cache, CacheFlags};
use crate::error::{CacheError, Result};
use crate::file_source::FileDataSource;
use crate::listener::CacheEventListener;
use crate::sink::CacheDataSink;
use crate::span::CacheSpan;
use crate::tee::TeeDataSource;
use async_trait::async_trait;
use bridge_traits::{
    error::Result as BridgeResult, BridgeError, DataSource, DataSpec, ReadOutcome,
};
use std::io;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, instrument, warn};

/// Exclusive hold on a hole span, released on drop.
pub struct HoleSpanGuard {
    cache: Arc<dyn Cache>,
    span: Option<CacheSpan>,
}

impl HoleSpanGuard {
    pub fn new(cache: Arc<dyn Cache>, span: CacheSpan) -> Self {
        Self {
            cache,
            span: Some(span),
        }
    }

    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if let Some(span) = self.span.take() {
            self.cache.release_hole_span(&span);
        }
    }
}

impl Drop for HoleSpanGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Upstream,
    CacheRead,
    CacheWrite,
}

/// Cache-aware [`DataSource`].
///
/// One instance serves one reader session at a time; concurrent sessions use
/// separate instances sharing the same [`Cache`] (see
/// [`CacheDataSourceFactory`](crate::CacheDataSourceFactory)).
pub struct CacheDataSource {
    cache: Arc<dyn Cache>,
    cache_write: TeeDataSource<CacheDataSink>,
    cache_read: FileDataSource,
    flags: CacheFlags,
    listener: Option<Arc<dyn CacheEventListener>>,
    cancel: Option<CancellationToken>,

    uri: Option<String>,
    request: Option<DataSpec>,
    read_position: u64,
    bytes_remaining: Option<u64>,
    current: Option<SourceKind>,
    locked: Option<HoleSpanGuard>,
    current_request_unbounded: bool,
    current_request_ignores_cache: bool,
    segment_bytes_read: u64,
    seen_cache_error: bool,
    total_cached_bytes_read: u64,
}

impl CacheDataSource {
    /// Creates a source reading through `cache`, writing span files of at most
    /// `max_cache_file_size` bytes.
    pub fn new(
        cache: Arc<dyn Cache>,
        upstream: Box<dyn DataSource>,
        flags: CacheFlags,
        max_cache_file_size: u64,
    ) -> Self {
        let sink = CacheDataSink::new(cache.clone(), max_cache_file_size);
        Self {
            cache,
            cache_write: TeeDataSource::new(upstream, sink),
            cache_read: FileDataSource::new(),
            flags,
            listener: None,
            cancel: None,
            uri: None,
            request: None,
            read_position: 0,
            bytes_remaining: None,
            current: None,
            locked: None,
            current_request_unbounded: false,
            current_request_ignores_cache: false,
            segment_bytes_read: 0,
            seen_cache_error: false,
            total_cached_bytes_read: 0,
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn CacheEventListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    /// Interrupt blocking hole waits when `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn cache(&self) -> &Arc<dyn Cache> {
        &self.cache
    }

    /// Whether a cache failure was observed by an earlier read or open.
    pub fn has_seen_cache_error(&self) -> bool {
        self.seen_cache_error
    }

    /// Lets the next session use the cache again after a cache failure.
    pub fn clear_cache_error(&mut self) {
        self.seen_cache_error = false;
    }

    /// Opens `spec`. Returns the number of readable bytes, if known.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::InvalidState`] if a session is already open,
    /// and propagates failures of the first segment's source.
    #[instrument(skip_all, fields(key = %spec.cache_key(), position = spec.position))]
    pub async fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>> {
        if self.request.is_some() {
            return Err(CacheError::InvalidState(
                "cache data source is already open".to_string(),
            ));
        }

        let key = spec.cache_key();
        self.current_request_ignores_cache = (self.flags.ignore_cache_on_error
            && self.seen_cache_error)
            || (!self.flags.cache_unbounded_requests && spec.is_unbounded());

        let bytes_remaining = if spec.length.is_some() || self.current_request_ignores_cache {
            spec.length
        } else {
            match self.cache.content_length(key) {
                Some(length) if spec.position > length => {
                    return Err(CacheError::Source(BridgeError::PositionOutOfRange {
                        position: spec.position,
                    }));
                }
                Some(length) => Some(length - spec.position),
                None => None,
            }
        };

        self.uri = Some(spec.uri.clone());
        self.request = Some(spec.clone());
        self.read_position = spec.position;
        self.bytes_remaining = bytes_remaining;

        if bytes_remaining != Some(0) {
            if let Err(e) = self.open_next_source(true).await {
                self.request = None;
                self.uri = None;
                return Err(e);
            }
        }
        debug!(
            ignores_cache = self.current_request_ignores_cache,
            bytes_remaining = ?self.bytes_remaining,
            "Opened"
        );
        Ok(self.bytes_remaining)
    }

    /// Reads up to `buf.len()` bytes, continuing across segment boundaries.
    pub async fn read(&mut self, buf: &mut [u8]) -> Result<ReadOutcome> {
        if buf.is_empty() {
            return Ok(ReadOutcome::Bytes(0));
        }

        loop {
            if self.bytes_remaining == Some(0) {
                self.close_current_source().await?;
                return Ok(ReadOutcome::EndOfInput);
            }

            let kind = self.current.ok_or_else(|| {
                CacheError::InvalidState("cache data source is not open".to_string())
            })?;
            let outcome = match self.read_current(kind, buf).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    self.note_error(Some(kind), &e);
                    return Err(e);
                }
            };

            match outcome {
                ReadOutcome::Bytes(read) => {
                    if kind == SourceKind::CacheRead {
                        self.total_cached_bytes_read += read as u64;
                    }
                    self.read_position += read as u64;
                    self.segment_bytes_read += read as u64;
                    if let Some(remaining) = self.bytes_remaining.as_mut() {
                        *remaining = remaining.saturating_sub(read as u64);
                    }
                    return Ok(outcome);
                }
                ReadOutcome::EndOfInput => {
                    if self.current_request_unbounded {
                        // Only upstream is ever read unbounded, so this is the
                        // true end of the resource.
                        self.record_content_length(self.read_position).await;
                        self.bytes_remaining = Some(0);
                    }
                    let empty_segment = self.segment_bytes_read == 0;
                    self.close_current_source().await?;
                    if self.bytes_remaining == Some(0) {
                        return Ok(ReadOutcome::EndOfInput);
                    }
                    if empty_segment {
                        // A segment that yields nothing would be reopened forever.
                        return Err(CacheError::Source(BridgeError::Io(io::Error::new(
                            io::ErrorKind::UnexpectedEof,
                            format!(
                                "resource ended at {} with {:?} bytes outstanding",
                                self.read_position, self.bytes_remaining
                            ),
                        ))));
                    }
                    if !self.open_next_source(false).await? {
                        return Ok(ReadOutcome::EndOfInput);
                    }
                }
            }
        }
    }

    /// Ends the session, releasing any held hole even if closing the current
    /// segment fails.
    #[instrument(skip_all)]
    pub async fn close(&mut self) -> Result<()> {
        self.uri = None;
        self.request = None;
        self.notify_bytes_read();
        let result = self.close_current_source().await;
        self.bytes_remaining = None;
        result
    }

    /// URI being read: upstream's while upstream is read directly, otherwise
    /// the requested URI.
    pub fn uri(&self) -> Option<String> {
        match self.current {
            Some(SourceKind::Upstream) => self.cache_write.upstream().uri(),
            _ => self.uri.clone(),
        }
    }

    async fn open_next_source(&mut self, initial: bool) -> Result<bool> {
        let request = self
            .request
            .clone()
            .ok_or_else(|| CacheError::InvalidState("no open request".to_string()))?;
        let key = request.cache_key().to_string();
        let position = self.read_position;

        let span = if self.current_request_ignores_cache {
            None
        } else if self.flags.block_on_cache {
            let cancel = self.cancel.as_ref();
            match acquire_blocking(self.cache.as_ref(), cancel, &key, position).await {
                Ok(span) => Some(span),
                Err(e) => {
                    self.note_error(None, &e);
                    return Err(e);
                }
            }
        } else {
            match self.cache.start_read_write_non_blocking(&key, position).await {
                Ok(span) => span,
                Err(e) => {
                    self.note_error(None, &e);
                    return Err(e);
                }
            }
        };

        let base = DataSpec {
            uri: request.uri.clone(),
            position,
            length: self.bytes_remaining,
            key: Some(key.clone()),
            flags: request.flags,
        };
        let (kind, spec, guard) = match span {
            None => {
                debug!(position, "Reading upstream directly");
                (SourceKind::Upstream, base, None)
            }
            Some(span) if span.is_cached => {
                let file = span.file.as_ref().ok_or_else(|| {
                    CacheError::InvalidState(format!("cached span at {} has no file", span.position))
                })?;
                let file_position = position - span.position;
                let available = span.length.map(|len| len - file_position);
                let length = match (available, self.bytes_remaining) {
                    (Some(available), Some(remaining)) => Some(available.min(remaining)),
                    (available, remaining) => available.or(remaining),
                };
                debug!(position, span_position = span.position, ?length, "Reading cached span");
                let spec = DataSpec {
                    uri: file.display().to_string(),
                    position: file_position,
                    length,
                    key: Some(key.clone()),
                    flags: request.flags,
                };
                (SourceKind::CacheRead, spec, None)
            }
            Some(span) => {
                let length = match (span.length, self.bytes_remaining) {
                    (Some(hole), Some(remaining)) => Some(hole.min(remaining)),
                    (hole, remaining) => hole.or(remaining),
                };
                debug!(position, hole_length = ?span.length, ?length, "Writing hole into cache");
                let guard = HoleSpanGuard::new(self.cache.clone(), span);
                (SourceKind::CacheWrite, DataSpec { length, ..base }, Some(guard))
            }
        };

        let unbounded = spec.is_unbounded();
        let opened = match kind {
            SourceKind::Upstream => self.cache_write.upstream_mut().open(&spec).await,
            SourceKind::CacheRead => self.cache_read.open(&spec).await,
            SourceKind::CacheWrite => self.cache_write.open(&spec).await,
        };
        let resolved = match opened {
            Ok(resolved) => resolved,
            Err(e) => {
                let e = CacheError::from(e);
                if !initial && unbounded && e.is_position_out_of_range() {
                    debug!(position, "End of stream found on re-open");
                    drop(guard);
                    self.bytes_remaining = Some(0);
                    self.record_content_length(position).await;
                    return Ok(false);
                }
                self.note_error(Some(kind), &e);
                return Err(e);
            }
        };

        self.current = Some(kind);
        self.current_request_unbounded = unbounded;
        self.segment_bytes_read = 0;
        self.locked = guard;

        if unbounded {
            if let Some(length) = resolved {
                self.bytes_remaining = Some(length);
                if self.locked.is_some() {
                    self.record_content_length(spec.position + length).await;
                }
            }
        }
        Ok(true)
    }

    async fn read_current(&mut self, kind: SourceKind, buf: &mut [u8]) -> Result<ReadOutcome> {
        let outcome = match kind {
            SourceKind::Upstream => self.cache_write.upstream_mut().read(buf).await?,
            SourceKind::CacheRead => self.cache_read.read(buf).await?,
            SourceKind::CacheWrite => self.cache_write.read(buf).await?,
        };
        Ok(outcome)
    }

    async fn close_current_source(&mut self) -> Result<()> {
        let Some(kind) = self.current.take() else {
            if let Some(guard) = self.locked.take() {
                guard.release();
            }
            return Ok(());
        };

        let closed = match kind {
            SourceKind::Upstream => self.cache_write.upstream_mut().close().await,
            SourceKind::CacheRead => self.cache_read.close().await,
            SourceKind::CacheWrite => self.cache_write.close().await,
        };
        self.current_request_unbounded = false;
        if let Some(guard) = self.locked.take() {
            guard.release();
        }

        closed.map_err(|e| {
            let e = CacheError::from(e);
            self.note_error(Some(kind), &e);
            e
        })
    }

    fn note_error(&mut self, kind: Option<SourceKind>, err: &CacheError) {
        if kind == Some(SourceKind::CacheRead) || err.is_cache_error() {
            error!("Cache error: {}", err);
            self.seen_cache_error = true;
        }
    }

    async fn record_content_length(&mut self, length: u64) {
        let Some(key) = self.request.as_ref().map(|r| r.cache_key().to_string()) else {
            return;
        };
        let cache = self.cache.as_ref();
        if !cache.set_content_length(&key, length).await {
            warn!(
                key = %key,
                length,
                known = ?cache.content_length(&key),
                "Failed to record content length"
            );
        }
    }

    fn notify_bytes_read(&mut self) {
        let total = std::mem::take(&mut self.total_cached_bytes_read);
        if total == 0 {
            return;
        }
        if let Some(listener) = &self.listener {
            listener.on_cached_bytes_read(self.cache.cache_space_bytes(), total);
        }
    }
}

async fn acquire_blocking(
    cache: &dyn Cache,
    cancel: Option<&CancellationToken>,
    key: &str,
    position: u64,
) -> Result<CacheSpan> {
    let Some(token) = cancel else {
        return cache.start_read_write(key, position).await;
    };
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(CacheError::LockAcquisitionInterrupted(format!(
            "cancelled while waiting for {} at {}",
            key, position
        ))),
        span = cache.start_read_write(key, position) => span,
    }
}

#[async_trait]
impl DataSource for CacheDataSource {
    async fn open(&mut self, spec: &DataSpec) -> BridgeResult<Option<u64>> {
        Ok(CacheDataSource::open(self, spec).await?)
    }

    async fn read(&mut self, buf: &mut [u8]) -> BridgeResult<ReadOutcome> {
        Ok(CacheDataSource::read(self, buf).await?)
    }

    async fn close(&mut self) -> BridgeResult<()> {
        Ok(CacheDataSource::close(self).await?)
    }

    fn uri(&self) -> Option<String> {
        CacheDataSource::uri(self)
    }
}
