//! Shared fixtures for core-cache integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bridge_traits::{
    error::Result as BridgeResult, BridgeError, DataSource, DataSourceFactory, DataSpec,
    ReadOutcome,
};
use core_cache::{
    Cache, CacheConfig, CacheDataSource, CacheError, CacheSpan, Result, SimpleCache,
};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub const KEY: &str = "v1";
pub const URI: &str = "https://cdn.example.com/v1.mp4";

/// Deterministic resource content.
pub fn test_data(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}

pub fn spec(position: u64, length: Option<u64>) -> DataSpec {
    DataSpec::new(URI).with_key(KEY).with_range(position, length)
}

pub async fn new_cache(dir: &Path) -> Arc<SimpleCache> {
    SimpleCache::create(CacheConfig::new(dir)).await.unwrap()
}

#[derive(Debug, Default)]
pub struct UpstreamLog {
    pub opens: Vec<DataSpec>,
    pub bytes_served: u64,
}

/// In-memory upstream behaving like an HTTP range server.
#[derive(Clone)]
pub struct FakeUpstream {
    data: Arc<Vec<u8>>,
    log: Arc<Mutex<UpstreamLog>>,
    /// Report the resource length for open-ended requests.
    report_length: bool,
    /// Fail reads once this absolute position is reached.
    fail_at: Option<u64>,
    resolved_uri: Option<String>,
    open: Option<(DataSpec, u64, u64)>,
}

impl FakeUpstream {
    pub fn new(data: Vec<u8>) -> Self {
        Self {
            data: Arc::new(data),
            log: Arc::new(Mutex::new(UpstreamLog::default())),
            report_length: true,
            fail_at: None,
            resolved_uri: None,
            open: None,
        }
    }

    pub fn without_length(mut self) -> Self {
        self.report_length = false;
        self
    }

    pub fn failing_at(mut self, position: u64) -> Self {
        self.fail_at = Some(position);
        self
    }

    pub fn redirected_to(mut self, uri: &str) -> Self {
        self.resolved_uri = Some(uri.to_string());
        self
    }

    pub fn opens(&self) -> Vec<DataSpec> {
        self.log.lock().opens.clone()
    }

    pub fn bytes_served(&self) -> u64 {
        self.log.lock().bytes_served
    }

    pub fn clear_log(&self) {
        *self.log.lock() = UpstreamLog::default();
    }

    pub fn factory(&self) -> Arc<dyn DataSourceFactory> {
        let upstream = self.clone();
        Arc::new(move || Box::new(upstream.clone()) as Box<dyn DataSource>)
    }
}

#[async_trait]
impl DataSource for FakeUpstream {
    async fn open(&mut self, spec: &DataSpec) -> BridgeResult<Option<u64>> {
        self.log.lock().opens.push(spec.clone());

        let len = self.data.len() as u64;
        if spec.position > len || (spec.position == len && spec.length.is_none()) {
            return Err(BridgeError::PositionOutOfRange {
                position: spec.position,
            });
        }
        let end = spec.length.map_or(len, |length| (spec.position + length).min(len));
        self.open = Some((spec.clone(), spec.position, end));

        Ok(match spec.length {
            Some(_) => Some(end - spec.position),
            None if self.report_length => Some(end - spec.position),
            None => None,
        })
    }

    async fn read(&mut self, buf: &mut [u8]) -> BridgeResult<ReadOutcome> {
        let (_, cursor, end) = self
            .open
            .as_mut()
            .ok_or_else(|| BridgeError::OperationFailed("not open".to_string()))?;
        if Some(*cursor) == self.fail_at {
            return Err(BridgeError::Http {
                status: 503,
                message: "induced failure".to_string(),
            });
        }
        if *cursor == *end {
            return Ok(ReadOutcome::EndOfInput);
        }

        let mut n = buf.len().min((*end - *cursor) as usize);
        if let Some(fail_at) = self.fail_at {
            if fail_at > *cursor {
                n = n.min((fail_at - *cursor) as usize);
            }
        }
        let start = *cursor as usize;
        buf[..n].copy_from_slice(&self.data[start..start + n]);
        *cursor += n as u64;
        self.log.lock().bytes_served += n as u64;
        Ok(ReadOutcome::Bytes(n))
    }

    async fn close(&mut self) -> BridgeResult<()> {
        self.open = None;
        Ok(())
    }

    fn uri(&self) -> Option<String> {
        let (spec, _, _) = self.open.as_ref()?;
        Some(self.resolved_uri.clone().unwrap_or_else(|| spec.uri.clone()))
    }
}

/// Reads until end of input in `chunk`-sized reads.
pub async fn read_to_end(source: &mut CacheDataSource, chunk: usize) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    let mut buf = vec![0u8; chunk];
    loop {
        match source.read(&mut buf).await? {
            ReadOutcome::Bytes(n) => out.extend_from_slice(&buf[..n]),
            ReadOutcome::EndOfInput => return Ok(out),
        }
    }
}

/// Reads `spec` through `source` from open to close.
pub async fn read_range(source: &mut CacheDataSource, spec: &DataSpec) -> Result<Vec<u8>> {
    source.open(spec).await?;
    let data = read_to_end(source, 37).await;
    source.close().await?;
    data
}

/// [`SimpleCache`] wrapper counting hole acquisitions and releases.
pub struct CountingCache {
    inner: Arc<SimpleCache>,
    acquired: AtomicUsize,
    released: AtomicUsize,
}

impl CountingCache {
    pub fn new(inner: Arc<SimpleCache>) -> Self {
        Self {
            inner,
            acquired: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &SimpleCache {
        &self.inner
    }

    pub fn acquired(&self) -> usize {
        self.acquired.load(Ordering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.released.load(Ordering::SeqCst)
    }

    fn count(&self, span: &CacheSpan) {
        if span.is_hole() {
            self.acquired.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl Cache for CountingCache {
    fn content_length(&self, key: &str) -> Option<u64> {
        self.inner.content_length(key)
    }

    async fn set_content_length(&self, key: &str, length: u64) -> bool {
        self.inner.set_content_length(key, length).await
    }

    async fn start_read_write(&self, key: &str, position: u64) -> Result<CacheSpan> {
        let span = self.inner.start_read_write(key, position).await?;
        self.count(&span);
        Ok(span)
    }

    async fn start_read_write_non_blocking(
        &self,
        key: &str,
        position: u64,
    ) -> Result<Option<CacheSpan>> {
        let span = self.inner.start_read_write_non_blocking(key, position).await?;
        if let Some(span) = &span {
            self.count(span);
        }
        Ok(span)
    }

    fn release_hole_span(&self, span: &CacheSpan) {
        self.released.fetch_add(1, Ordering::SeqCst);
        self.inner.release_hole_span(span);
    }

    fn cache_space_bytes(&self) -> u64 {
        self.inner.cache_space_bytes()
    }

    async fn start_file(&self, key: &str, position: u64, max_length: u64) -> Result<PathBuf> {
        self.inner.start_file(key, position, max_length).await
    }

    async fn commit_file(&self, file: &Path) -> Result<()> {
        self.inner.commit_file(file).await
    }

    fn cached_spans(&self, key: &str) -> Vec<CacheSpan> {
        self.inner.cached_spans(key)
    }

    fn keys(&self) -> Vec<String> {
        self.inner.keys()
    }

    fn cached_bytes(&self, key: &str, position: u64, length: Option<u64>) -> u64 {
        self.inner.cached_bytes(key, position, length)
    }

    async fn remove_span(&self, span: &CacheSpan) -> Result<()> {
        self.inner.remove_span(span).await
    }

    async fn remove_content(&self, key: &str) -> Result<()> {
        self.inner.remove_content(key).await
    }
}

pub fn is_interrupted(err: &CacheError) -> bool {
    matches!(err, CacheError::LockAcquisitionInterrupted(_))
}
