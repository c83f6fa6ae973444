//! Source wrapper that copies everything it reads into a sink.

use async_trait::async_trait;
use bridge_traits::{
    error::Result as BridgeResult, DataSink, DataSource, DataSpec, ReadOutcome,
};
use tracing::warn;

/// Reads from `upstream` and writes every byte read into `sink`.
///
/// The sink is opened after the upstream so that an unbounded request can be
/// written with the length the upstream resolved. If nothing is readable the
/// sink is not opened at all.
pub struct TeeDataSource<K> {
    upstream: Box<dyn DataSource>,
    sink: K,
    sink_open: bool,
    bytes_remaining: Option<u64>,
}

impl<K: DataSink> TeeDataSource<K> {
    pub fn new(upstream: Box<dyn DataSource>, sink: K) -> Self {
        Self {
            upstream,
            sink,
            sink_open: false,
            bytes_remaining: None,
        }
    }

    /// Upstream source, for reads that bypass the sink.
    pub fn upstream(&self) -> &dyn DataSource {
        self.upstream.as_ref()
    }

    pub fn upstream_mut(&mut self) -> &mut dyn DataSource {
        self.upstream.as_mut()
    }
}

#[async_trait]
impl<K: DataSink> DataSource for TeeDataSource<K> {
    async fn open(&mut self, spec: &DataSpec) -> BridgeResult<Option<u64>> {
        let length = self.upstream.open(spec).await?;
        self.bytes_remaining = length;
        if length == Some(0) {
            return Ok(length);
        }

        let sink_spec = match (spec.length, length) {
            (None, Some(resolved)) => spec.clone().with_range(spec.position, Some(resolved)),
            _ => spec.clone(),
        };
        if let Err(e) = self.sink.open(&sink_spec).await {
            if let Err(close) = self.upstream.close().await {
                warn!("Failed to close upstream after sink error: {}", close);
            }
            return Err(e);
        }
        self.sink_open = true;
        Ok(length)
    }

    async fn read(&mut self, buf: &mut [u8]) -> BridgeResult<ReadOutcome> {
        if self.bytes_remaining == Some(0) {
            return Ok(ReadOutcome::EndOfInput);
        }
        let outcome = self.upstream.read(buf).await?;
        if let ReadOutcome::Bytes(read) = outcome {
            if read > 0 {
                if self.sink_open {
                    self.sink.write(&buf[..read]).await?;
                }
                if let Some(remaining) = self.bytes_remaining.as_mut() {
                    *remaining = remaining.saturating_sub(read as u64);
                }
            }
        }
        Ok(outcome)
    }

    async fn close(&mut self) -> BridgeResult<()> {
        let upstream = self.upstream.close().await;
        let sink = if std::mem::take(&mut self.sink_open) {
            self.sink.close().await
        } else {
            Ok(())
        };
        self.bytes_remaining = None;
        upstream.and(sink)
    }

    fn uri(&self) -> Option<String> {
        self.upstream.uri()
    }
}
