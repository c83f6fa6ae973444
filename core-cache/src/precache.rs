//! Cache population and inspection utilities.

use crate::cache::{Cache, PrecacheProgress};
use crate::data_source::CacheDataSource;
use crate::error::{CacheError, Result};
use bridge_traits::{BridgeError, DataSpec, ReadOutcome};
use std::io;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

const BUFFER_SIZE: usize = 128 * 1024;

/// Callback receiving progress after every chunk written into the cache.
pub type ProgressCallback<'a> = &'a (dyn Fn(&PrecacheProgress) + Send + Sync);

/// Bytes of `spec` already held by the cache.
pub fn cached_stats(spec: &DataSpec, cache: &dyn Cache) -> PrecacheProgress {
    let key = spec.cache_key();
    let total_bytes = spec.length.or_else(|| {
        cache
            .content_length(key)
            .map(|len| len.saturating_sub(spec.position))
    });
    let end = total_bytes.map(|len| spec.position + len);

    let cached_bytes = cache
        .cached_spans(key)
        .iter()
        .map(|span| {
            let start = span.position.max(spec.position);
            let span_end = span.end().unwrap_or(u64::MAX);
            let stop = end.map_or(span_end, |end| end.min(span_end));
            stop.saturating_sub(start)
        })
        .sum();

    PrecacheProgress {
        total_bytes,
        cached_bytes,
        downloaded_bytes: 0,
    }
}

/// Populates the cache with `spec` by reading it through `source` and
/// discarding the bytes. Ranges already cached are skipped.
///
/// Open-ended specs are only written into the cache if the source caches
/// unbounded requests or the content length is already known.
///
/// # Errors
///
/// Returns [`CacheError::Cancelled`] once `cancel` fires, and
/// `UnexpectedEof` if the resource ends before a bounded `spec` does.
#[instrument(skip_all, fields(key = %spec.cache_key(), position = spec.position))]
pub async fn precache(
    spec: &DataSpec,
    cache: &dyn Cache,
    source: &mut CacheDataSource,
    progress: Option<ProgressCallback<'_>>,
    cancel: Option<&CancellationToken>,
) -> Result<PrecacheProgress> {
    let key = spec.cache_key().to_string();
    let mut stats = cached_stats(spec, cache);
    if let Some(report) = progress {
        report(&stats);
    }

    let mut buf = vec![0u8; BUFFER_SIZE];
    let mut start = spec.position;
    let mut left = stats.total_bytes;

    while left != Some(0) {
        if cancel.map_or(false, CancellationToken::is_cancelled) {
            return Err(CacheError::Cancelled(format!("precache of {}", key)));
        }

        let cached = cache.cached_bytes(&key, start, left);
        if cached > 0 {
            start += cached;
            left = left.map(|left| left - cached);
            continue;
        }

        let next_cached = cache
            .cached_spans(&key)
            .into_iter()
            .map(|span| span.position)
            .find(|position| *position > start);
        let block = match (next_cached.map(|next| next - start), left) {
            (Some(hole), Some(left)) => Some(hole.min(left)),
            (hole, left) => hole.or(left),
        };

        let request = DataSpec {
            uri: spec.uri.clone(),
            position: start,
            length: block,
            key: Some(key.clone()),
            flags: spec.flags,
        };
        let result =
            read_and_discard(&request, source, &mut buf, &mut stats, progress, cancel).await;
        let closed = source.close().await;
        let read = match result {
            Ok(read) => read,
            Err(e) if left.is_none() && e.is_position_out_of_range() => {
                debug!(position = start, "Reached end of resource");
                if !cache.set_content_length(&key, start).await {
                    warn!(key = %key, length = start, "Failed to record content length");
                }
                stats.total_bytes.get_or_insert(start - spec.position);
                break;
            }
            Err(e) => return Err(e),
        };
        closed?;

        if let (None, Some(resolved)) = (stats.total_bytes, read.resolved) {
            if block.is_none() {
                stats.total_bytes = Some(start - spec.position + resolved);
            }
        }

        if block.map_or(true, |block| read.bytes < block) {
            if left.is_some() {
                return Err(CacheError::Source(BridgeError::Io(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("{} ended at {}", key, start + read.bytes),
                ))));
            }
            if stats.total_bytes.is_none() {
                stats.total_bytes = Some(start + read.bytes - spec.position);
            }
            break;
        }

        start += read.bytes;
        left = left.map(|left| left - read.bytes);
    }

    debug!(
        downloaded = stats.downloaded_bytes,
        cached = stats.cached_bytes,
        "Precache finished"
    );
    Ok(stats)
}

struct BlockRead {
    bytes: u64,
    resolved: Option<u64>,
}

async fn read_and_discard(
    request: &DataSpec,
    source: &mut CacheDataSource,
    buf: &mut [u8],
    stats: &mut PrecacheProgress,
    progress: Option<ProgressCallback<'_>>,
    cancel: Option<&CancellationToken>,
) -> Result<BlockRead> {
    let resolved = source.open(request).await?;
    let mut bytes = 0;
    loop {
        if cancel.map_or(false, CancellationToken::is_cancelled) {
            return Err(CacheError::Cancelled(format!(
                "precache of {}",
                request.cache_key()
            )));
        }
        match source.read(buf).await? {
            ReadOutcome::Bytes(read) => {
                bytes += read as u64;
                stats.downloaded_bytes += read as u64;
                stats.cached_bytes += read as u64;
                if let Some(report) = progress {
                    report(stats);
                }
            }
            ReadOutcome::EndOfInput => break,
        }
    }
    Ok(BlockRead { bytes, resolved })
}
