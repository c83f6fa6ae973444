//! [`DataSink`] writing a byte stream into the cache as span files.

use crate::cache::Cache;
use async_trait::async_trait;
use bridge_traits::{error::Result as BridgeResult, BridgeError, DataSink, DataSpec};
use std::fmt::Display;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

fn sink_error(context: &str, err: impl Display) -> BridgeError {
    BridgeError::Sink(io::Error::other(format!("{}: {}", context, err)))
}

/// Writes data into the cache, rolling over to a new span file every
/// `max_file_size` bytes.
///
/// The writer must hold a hole span covering the data. Every failure is
/// reported as [`BridgeError::Sink`] so readers can tell cache failures
/// apart from upstream ones.
pub struct CacheDataSink {
    cache: Arc<dyn Cache>,
    max_file_size: u64,
    spec: Option<DataSpec>,
    file: Option<File>,
    path: Option<PathBuf>,
    /// Bytes written into the current file.
    output_bytes: u64,
    /// Bytes written since `open`.
    spec_bytes: u64,
}

impl CacheDataSink {
    pub fn new(cache: Arc<dyn Cache>, max_file_size: u64) -> Self {
        Self {
            cache,
            max_file_size: max_file_size.max(1),
            spec: None,
            file: None,
            path: None,
            output_bytes: 0,
            spec_bytes: 0,
        }
    }

    async fn open_next_file(&mut self) -> BridgeResult<()> {
        let spec = self
            .spec
            .as_ref()
            .ok_or_else(|| sink_error("cache sink", "not open"))?;
        let max_length = spec.length.map_or(self.max_file_size, |length| {
            length.saturating_sub(self.spec_bytes).min(self.max_file_size)
        });
        let position = spec.position + self.spec_bytes;

        let path = self
            .cache
            .start_file(spec.cache_key(), position, max_length)
            .await
            .map_err(|e| sink_error("failed to start cache file", e))?;
        let file = File::create(&path)
            .await
            .map_err(|e| sink_error("failed to create cache file", e))?;

        debug!(file = %path.display(), position, "Opened cache file");
        self.file = Some(file);
        self.path = Some(path);
        self.output_bytes = 0;
        Ok(())
    }

    /// Flushes and commits the current file, if any.
    async fn close_current_file(&mut self) -> BridgeResult<()> {
        let (Some(mut file), Some(path)) = (self.file.take(), self.path.take()) else {
            return Ok(());
        };

        let flushed = async {
            file.flush().await?;
            file.sync_data().await
        }
        .await;
        drop(file);

        if let Err(e) = flushed {
            if let Err(remove) = tokio::fs::remove_file(&path).await {
                warn!("Failed to delete unflushed cache file {}: {}", path.display(), remove);
            }
            return Err(sink_error("failed to flush cache file", e));
        }

        self.cache
            .commit_file(&path)
            .await
            .map_err(|e| sink_error("failed to commit cache file", e))
    }
}

#[async_trait]
impl DataSink for CacheDataSink {
    async fn open(&mut self, spec: &DataSpec) -> BridgeResult<()> {
        self.spec = Some(spec.clone());
        self.spec_bytes = 0;
        self.output_bytes = 0;
        Ok(())
    }

    async fn write(&mut self, data: &[u8]) -> BridgeResult<()> {
        if self.spec.is_none() {
            return Err(sink_error("cache sink", "write before open"));
        }

        let mut offset = 0;
        while offset < data.len() {
            if self.output_bytes == self.max_file_size {
                self.close_current_file().await?;
            }
            if self.file.is_none() {
                self.open_next_file().await?;
            }

            let room = (self.max_file_size - self.output_bytes).min((data.len() - offset) as u64);
            let chunk = &data[offset..offset + room as usize];
            let file = self
                .file
                .as_mut()
                .ok_or_else(|| sink_error("cache sink", "no open file"))?;
            file.write_all(chunk)
                .await
                .map_err(|e| sink_error("failed to write cache file", e))?;

            offset += chunk.len();
            self.output_bytes += room;
            self.spec_bytes += room;
        }
        Ok(())
    }

    async fn close(&mut self) -> BridgeResult<()> {
        let result = self.close_current_file().await;
        self.spec = None;
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, SimpleCache};

    #[tokio::test]
    async fn test_rolls_over_at_max_file_size() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SimpleCache::create(CacheConfig::new(dir.path())).await.unwrap();
        let hole = cache
            .start_read_write_non_blocking("k", 0)
            .await
            .unwrap()
            .unwrap();

        let mut sink = CacheDataSink::new(cache.clone(), 4);
        sink.open(&DataSpec::new("u").with_key("k").with_range(0, Some(10)))
            .await
            .unwrap();
        sink.write(b"0123456").await.unwrap();
        sink.write(b"789").await.unwrap();
        sink.close().await.unwrap();
        cache.release_hole_span(&hole);

        let spans = cache.cached_spans("k");
        let layout: Vec<(u64, Option<u64>)> =
            spans.iter().map(|s| (s.position, s.length)).collect();
        assert_eq!(layout, vec![(0, Some(4)), (4, Some(4)), (8, Some(2))]);
        assert_eq!(cache.cached_bytes("k", 0, None), 10);
    }

    #[tokio::test]
    async fn test_write_without_hole_is_sink_error() {
        let dir = tempfile::tempdir().unwrap();
        let cache = SimpleCache::create(CacheConfig::new(dir.path())).await.unwrap();

        let mut sink = CacheDataSink::new(cache, 4);
        sink.open(&DataSpec::new("u").with_key("k")).await.unwrap();
        let err = sink.write(b"01").await.unwrap_err();
        assert!(err.is_sink_error());
    }
}
