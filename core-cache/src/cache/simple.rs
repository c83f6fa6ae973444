//! # Simple Cache
//!
//! On-disk [`Cache`] keeping one file per cached span in a single directory.
//!
//! Span files are named `<id>.<position>.<uuid>.span`, where `<id>` is the
//! key's id in the content index. The index (`cached_content_index.json`)
//! maps ids back to keys and records discovered content lengths. On start-up
//! the directory is scanned and the in-memory span set rebuilt from the file
//! names; files that cannot be attributed to a key are deleted.
//!
//! All bookkeeping lives behind one mutex that is never held across an
//! `.await`. File deletions and index writes happen after the lock is
//! released.

use crate::cache::config::{CacheConfig, EvictionPolicy};
use crate::cache::evictor::{
    CacheEvictor, LeastRecentlyUsedCacheEvictor, NoOpCacheEvictor, SpanId,
};
use crate::cache::index::{ContentIndex, INDEX_FILE_NAME};
use crate::cache::stats::CacheStats;
use crate::cache::Cache;
use crate::error::{CacheError, Result};
use crate::span::CacheSpan;
use async_trait::async_trait;
use bridge_traits::{Clock, SystemClock};
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io;
use std::ops::Bound::{Excluded, Unbounded};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;
use tokio::fs;
use tokio::sync::Notify;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

const SPAN_FILE_SUFFIX: &str = "span";

#[derive(Debug, Clone)]
struct SpanEntry {
    length: u64,
    file: PathBuf,
    last_access_millis: i64,
}

#[derive(Debug, Default)]
struct CachedContent {
    spans: BTreeMap<u64, SpanEntry>,
    /// Held hole locks, position to length (`None` for open-ended).
    holes: BTreeMap<u64, Option<u64>>,
}

impl CachedContent {
    fn is_empty(&self) -> bool {
        self.spans.is_empty() && self.holes.is_empty()
    }

    fn span_containing(&self, position: u64) -> Option<(u64, &SpanEntry)> {
        self.spans
            .range(..=position)
            .next_back()
            .filter(|(start, entry)| position < **start + entry.length)
            .map(|(start, entry)| (*start, entry))
    }

    fn holds_hole_containing(&self, position: u64) -> bool {
        self.holes
            .range(..=position)
            .next_back()
            .map_or(false, |(start, length)| {
                length.map_or(true, |len| position < start + len)
            })
    }

    fn overlaps_cached(&self, position: u64, length: u64) -> bool {
        let end = position + length;
        let before = self
            .spans
            .range(..=position)
            .next_back()
            .map_or(false, |(start, entry)| start + entry.length > position);
        let after = self
            .spans
            .range((Excluded(position), Unbounded))
            .next()
            .map_or(false, |(start, _)| *start < end);
        before || after
    }

    fn cached_end(&self) -> u64 {
        self.spans
            .iter()
            .next_back()
            .map_or(0, |(start, entry)| start + entry.length)
    }
}

struct CacheState {
    initialized: bool,
    index: ContentIndex,
    contents: HashMap<String, CachedContent>,
    total_bytes: u64,
    evictor: Box<dyn CacheEvictor>,
    index_version: u64,
}

impl CacheState {
    fn ensure_initialized(&self) -> Result<()> {
        if self.initialized {
            Ok(())
        } else {
            Err(CacheError::InvalidState(
                "cache has not been initialized".to_string(),
            ))
        }
    }

    /// Removes a cached span, returning its file for deletion.
    fn remove_span(&mut self, key: &str, position: u64) -> Option<PathBuf> {
        let content = self.contents.get_mut(key)?;
        let entry = content.spans.remove(&position)?;
        if content.is_empty() {
            self.contents.remove(key);
        }
        self.total_bytes = self.total_bytes.saturating_sub(entry.length);
        self.evictor.on_span_removed(&CacheSpan::cached(
            key,
            position,
            entry.length,
            entry.file.clone(),
            entry.last_access_millis,
        ));
        Some(entry.file)
    }

    fn evict(&mut self, victims: Vec<SpanId>) -> Vec<PathBuf> {
        victims
            .into_iter()
            .filter_map(|id| {
                debug!(key = %id.key, position = id.position, "Evicting cached span");
                self.remove_span(&id.key, id.position)
            })
            .collect()
    }

    fn snapshot_index(&mut self) -> Option<IndexSnapshot> {
        if !self.index.take_dirty() {
            return None;
        }
        match self.index.to_json() {
            Ok(bytes) => {
                self.index_version += 1;
                Some(IndexSnapshot {
                    version: self.index_version,
                    bytes,
                })
            }
            Err(e) => {
                error!("Failed to serialize content index: {}", e);
                self.index.mark_dirty();
                None
            }
        }
    }
}

struct IndexSnapshot {
    version: u64,
    bytes: Vec<u8>,
}

/// Disk-backed [`Cache`] with pluggable eviction.
///
/// # Example
///
/// ```rust,ignore
/// use core_cache::{CacheConfig, SimpleCache};
///
/// let cache = SimpleCache::create(CacheConfig::new("/var/cache/rangecache")).await?;
/// println!("{} bytes cached", cache.stats().total_bytes);
/// ```
pub struct SimpleCache {
    dir: PathBuf,
    config: CacheConfig,
    state: Mutex<CacheState>,
    changed: Notify,
    clock: Arc<dyn Clock>,
    init_lock: tokio::sync::Mutex<()>,
    /// Version of the last index snapshot written to disk.
    persist_lock: tokio::sync::Mutex<u64>,
}

impl SimpleCache {
    /// Creates an uninitialized cache with the evictor named by the config's
    /// eviction policy.
    pub fn new(config: CacheConfig) -> Result<Self> {
        config.validate()?;
        let evictor: Box<dyn CacheEvictor> = match config.eviction_policy {
            EvictionPolicy::LeastRecentlyUsed => {
                Box::new(LeastRecentlyUsedCacheEvictor::new(config.max_cache_bytes))
            }
            EvictionPolicy::None => Box::new(NoOpCacheEvictor),
        };
        Ok(Self::with_evictor(config, evictor))
    }

    pub fn with_evictor(config: CacheConfig, evictor: Box<dyn CacheEvictor>) -> Self {
        Self {
            dir: config.cache_dir.clone(),
            config,
            state: Mutex::new(CacheState {
                initialized: false,
                index: ContentIndex::new(),
                contents: HashMap::new(),
                total_bytes: 0,
                evictor,
                index_version: 0,
            }),
            changed: Notify::new(),
            clock: Arc::new(SystemClock),
            init_lock: tokio::sync::Mutex::new(()),
            persist_lock: tokio::sync::Mutex::new(0),
        }
    }

    /// Use a custom clock for span access times.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Creates and initializes a cache.
    pub async fn create(config: CacheConfig) -> Result<Arc<Self>> {
        let cache = Self::new(config)?;
        cache.initialize().await?;
        Ok(Arc::new(cache))
    }

    pub fn cache_dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    /// Rebuilds the span set from the cache directory.
    ///
    /// Deletes orphaned, empty and overlapping span files, then evicts down to
    /// the configured budget. Calling this again is a no-op.
    #[instrument(skip(self), fields(dir = %self.dir.display()))]
    pub async fn initialize(&self) -> Result<()> {
        let _init = self.init_lock.lock().await;
        if self.state.lock().initialized {
            return Ok(());
        }

        fs::create_dir_all(&self.dir).await.map_err(|e| {
            error!("Failed to create cache directory: {}", e);
            CacheError::CacheIo(format!(
                "failed to create cache directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let index = match ContentIndex::load(&self.dir).await {
            Ok(index) => index,
            Err(e) => {
                warn!("Discarding unreadable content index: {}", e);
                ContentIndex::new()
            }
        };

        let mut found = Vec::new();
        let mut doomed = Vec::new();
        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let name = entry.file_name();
            if name.to_str() == Some(INDEX_FILE_NAME) {
                continue;
            }
            let metadata = entry.metadata().await?;
            if !metadata.is_file() {
                continue;
            }

            let parsed = parse_span_file_name(&path)
                .and_then(|(id, position)| index.key_for_id(id).map(|key| (key, position)));
            match parsed {
                Some((key, position)) if metadata.len() > 0 => {
                    let last_access_millis = metadata
                        .modified()
                        .ok()
                        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
                        .map_or(0, |d| d.as_millis() as i64);
                    found.push((
                        key.to_string(),
                        position,
                        SpanEntry {
                            length: metadata.len(),
                            file: path,
                            last_access_millis,
                        },
                    ));
                }
                _ => doomed.push(path),
            }
        }
        found.sort_by(|a, b| (&a.0, a.1).cmp(&(&b.0, b.1)));

        let (evicted, snapshot, spans, total) = {
            let mut guard = self.state.lock();
            let state = &mut *guard;
            state.index = index;

            let mut added = Vec::new();
            for (key, position, entry) in found {
                let beyond_length = state
                    .index
                    .content_length(&key)
                    .map_or(false, |len| position + entry.length > len);
                let content = state.contents.entry(key.clone()).or_default();
                if beyond_length || content.overlaps_cached(position, entry.length) {
                    doomed.push(entry.file);
                    continue;
                }
                state.total_bytes += entry.length;
                added.push(CacheSpan::cached(
                    key,
                    position,
                    entry.length,
                    entry.file.clone(),
                    entry.last_access_millis,
                ));
                content.spans.insert(position, entry);
            }
            state.contents.retain(|_, content| !content.is_empty());

            added.sort_by_key(|span| span.last_access_millis);
            for span in &added {
                state.evictor.on_span_added(span);
            }
            let victims = state.evictor.on_cache_initialized(state.total_bytes);
            let evicted = state.evict(victims);

            let stale: Vec<String> = state
                .index
                .keys()
                .filter(|key| {
                    !state.contents.contains_key(*key)
                        && state.index.content_length(key).is_none()
                })
                .map(str::to_string)
                .collect();
            for key in stale {
                state.index.remove(&key);
            }

            state.initialized = true;
            state.index.mark_dirty();
            (
                evicted,
                state.snapshot_index(),
                added.len(),
                state.total_bytes,
            )
        };

        for file in doomed.iter().chain(evicted.iter()) {
            delete_file(file).await;
        }
        if let Some(snapshot) = snapshot {
            self.persist(snapshot).await;
        }

        info!(
            spans,
            total_bytes = total,
            removed = doomed.len(),
            evicted = evicted.len(),
            "Cache initialized"
        );
        Ok(())
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        CacheStats {
            keys: state.contents.values().filter(|c| !c.spans.is_empty()).count(),
            cached_spans: state.contents.values().map(|c| c.spans.len()).sum(),
            held_holes: state.contents.values().map(|c| c.holes.len()).sum(),
            total_bytes: state.total_bytes,
            max_bytes: self.config.max_cache_bytes,
        }
    }

    fn try_start_read_write(&self, key: &str, position: u64) -> Result<Option<CacheSpan>> {
        let now = self.clock.unix_timestamp_millis();
        let mut guard = self.state.lock();
        guard.ensure_initialized()?;
        let state = &mut *guard;

        let content_length = state.index.content_length(key);
        let content = state.contents.entry(key.to_string()).or_default();

        let cached_start = content.span_containing(position).map(|(start, _)| start);
        if let Some(start) = cached_start {
            if let Some(entry) = content.spans.get_mut(&start) {
                entry.last_access_millis = now;
                let span = CacheSpan::cached(key, start, entry.length, entry.file.clone(), now);
                state.evictor.on_span_touched(&span);
                return Ok(Some(span));
            }
        }

        if content.holds_hole_containing(position) {
            return Ok(None);
        }

        let next_cached = content
            .spans
            .range((Excluded(position), Unbounded))
            .next()
            .map(|(start, _)| *start);
        let next_hole = content
            .holes
            .range((Excluded(position), Unbounded))
            .next()
            .map(|(start, _)| *start);
        let known_end = content_length.filter(|len| *len > position);
        let end = [next_cached, next_hole, known_end].into_iter().flatten().min();
        let length = end.map(|end| end - position);

        content.holes.insert(position, length);
        debug!(key, position, ?length, "Hole span locked");
        Ok(Some(CacheSpan::hole(key, position, length)))
    }

    async fn persist(&self, snapshot: IndexSnapshot) -> bool {
        let mut written = self.persist_lock.lock().await;
        if *written >= snapshot.version {
            return true;
        }
        match ContentIndex::write(&self.dir, &snapshot.bytes).await {
            Ok(()) => {
                *written = snapshot.version;
                true
            }
            Err(e) => {
                warn!("Failed to write content index: {}", e);
                self.state.lock().index.mark_dirty();
                false
            }
        }
    }
}

impl fmt::Debug for SimpleCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimpleCache")
            .field("dir", &self.dir)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Cache for SimpleCache {
    fn content_length(&self, key: &str) -> Option<u64> {
        self.state.lock().index.content_length(key)
    }

    async fn set_content_length(&self, key: &str, length: u64) -> bool {
        let snapshot = {
            let mut state = self.state.lock();
            if !state.initialized {
                warn!(key, "Content length set before initialization");
                return false;
            }
            match state.index.content_length(key) {
                Some(known) if known == length => return true,
                Some(known) => {
                    warn!(key, known, length, "Rejecting contradicting content length");
                    return false;
                }
                None => {}
            }
            let cached_end = state.contents.get(key).map_or(0, CachedContent::cached_end);
            if cached_end > length {
                warn!(key, cached_end, length, "Content length shorter than cached data");
                return false;
            }
            state.index.set_content_length(key, length);
            state.snapshot_index()
        };

        debug!(key, length, "Content length recorded");
        match snapshot {
            Some(snapshot) => self.persist(snapshot).await,
            None => true,
        }
    }

    #[instrument(skip(self))]
    async fn start_read_write(&self, key: &str, position: u64) -> Result<CacheSpan> {
        let wait = async {
            loop {
                let notified = self.changed.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();

                if let Some(span) = self.try_start_read_write(key, position)? {
                    return Ok::<_, CacheError>(span);
                }
                debug!("Waiting for hole span held by another reader");
                notified.await;
            }
        };

        match self.config.lock_wait_timeout {
            Some(timeout) => tokio::time::timeout(timeout, wait).await.map_err(|_| {
                CacheError::LockAcquisitionInterrupted(format!(
                    "timed out after {:?} waiting for {} at {}",
                    timeout, key, position
                ))
            })?,
            None => wait.await,
        }
    }

    async fn start_read_write_non_blocking(
        &self,
        key: &str,
        position: u64,
    ) -> Result<Option<CacheSpan>> {
        self.try_start_read_write(key, position)
    }

    fn release_hole_span(&self, span: &CacheSpan) {
        if span.is_cached {
            return;
        }
        {
            let mut state = self.state.lock();
            let released = match state.contents.get_mut(&span.key) {
                Some(content) => {
                    let released = content.holes.remove(&span.position).is_some();
                    if content.is_empty() {
                        state.contents.remove(&span.key);
                    }
                    released
                }
                None => false,
            };
            if !released {
                debug!(key = %span.key, position = span.position, "Released hole span was not held");
                return;
            }
        }
        debug!(key = %span.key, position = span.position, "Hole span released");
        self.changed.notify_waiters();
    }

    fn cache_space_bytes(&self) -> u64 {
        self.state.lock().total_bytes
    }

    async fn start_file(&self, key: &str, position: u64, max_length: u64) -> Result<PathBuf> {
        let (id, evicted, snapshot) = {
            let mut guard = self.state.lock();
            guard.ensure_initialized()?;
            let state = &mut *guard;

            let holds = state
                .contents
                .get(key)
                .map_or(false, |content| content.holds_hole_containing(position));
            if !holds {
                return Err(CacheError::InvalidState(format!(
                    "no hole span held for {} at {}",
                    key, position
                )));
            }

            let id = state.index.get_or_add(key);
            let victims = state.evictor.on_start_file(key, max_length, state.total_bytes);
            let evicted = state.evict(victims);
            (id, evicted, state.snapshot_index())
        };

        for file in &evicted {
            delete_file(file).await;
        }
        if let Some(snapshot) = snapshot {
            self.persist(snapshot).await;
        }

        fs::create_dir_all(&self.dir).await.map_err(|e| {
            CacheError::CacheIo(format!(
                "failed to create cache directory {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        Ok(self.dir.join(span_file_name(id, position)))
    }

    #[instrument(skip(self), fields(file = %file.display()))]
    async fn commit_file(&self, file: &Path) -> Result<()> {
        let length = match fs::metadata(file).await {
            Ok(metadata) => metadata.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!("Committed file does not exist");
                return Ok(());
            }
            Err(e) => return Err(CacheError::CacheIo(format!("failed to stat span file: {}", e))),
        };
        if length == 0 {
            delete_file(file).await;
            return Ok(());
        }

        let Some((id, position)) = parse_span_file_name(file) else {
            delete_file(file).await;
            return Err(CacheError::InvalidState(format!(
                "not a span file: {}",
                file.display()
            )));
        };

        let now = self.clock.unix_timestamp_millis();
        let outcome = {
            let mut guard = self.state.lock();
            guard.ensure_initialized()?;
            let state = &mut *guard;

            match state.index.key_for_id(id).map(str::to_string) {
                None => Err(CacheError::InvalidState(format!(
                    "span file for unknown content id {}",
                    id
                ))),
                Some(key) => {
                    let content_length = state.index.content_length(&key);
                    let overlaps = state
                        .contents
                        .get(&key)
                        .map_or(false, |content| content.overlaps_cached(position, length));
                    if content_length.map_or(false, |len| position + length > len) {
                        Err(CacheError::CacheIo(format!(
                            "span [{}, {}) of {} exceeds content length",
                            position,
                            position + length,
                            key
                        )))
                    } else if overlaps {
                        Err(CacheError::CacheIo(format!(
                            "span [{}, {}) of {} overlaps cached data",
                            position,
                            position + length,
                            key
                        )))
                    } else {
                        let content = state.contents.entry(key.clone()).or_default();
                        content.spans.insert(
                            position,
                            SpanEntry {
                                length,
                                file: file.to_path_buf(),
                                last_access_millis: now,
                            },
                        );
                        state.total_bytes += length;
                        state.evictor.on_span_added(&CacheSpan::cached(
                            key.as_str(),
                            position,
                            length,
                            file.to_path_buf(),
                            now,
                        ));
                        Ok(state.snapshot_index())
                    }
                }
            }
        };

        match outcome {
            Ok(snapshot) => {
                if let Some(snapshot) = snapshot {
                    self.persist(snapshot).await;
                }
                debug!(position, length, "Span committed");
                self.changed.notify_waiters();
                Ok(())
            }
            Err(e) => {
                warn!("Rejecting span file: {}", e);
                delete_file(file).await;
                Err(e)
            }
        }
    }

    fn cached_spans(&self, key: &str) -> Vec<CacheSpan> {
        let state = self.state.lock();
        state
            .contents
            .get(key)
            .map(|content| {
                content
                    .spans
                    .iter()
                    .map(|(position, entry)| {
                        CacheSpan::cached(
                            key,
                            *position,
                            entry.length,
                            entry.file.clone(),
                            entry.last_access_millis,
                        )
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn keys(&self) -> Vec<String> {
        let state = self.state.lock();
        let mut keys: Vec<String> = state
            .index
            .keys()
            .filter(|key| {
                state.index.content_length(key).is_some()
                    || state
                        .contents
                        .get(*key)
                        .map_or(false, |content| !content.spans.is_empty())
            })
            .map(str::to_string)
            .collect();
        keys.sort();
        keys
    }

    fn cached_bytes(&self, key: &str, position: u64, length: Option<u64>) -> u64 {
        let state = self.state.lock();
        let Some(content) = state.contents.get(key) else {
            return 0;
        };
        let limit = length.map(|len| position.saturating_add(len));

        let mut end = position;
        while let Some((start, entry)) = content.span_containing(end) {
            end = start + entry.length;
            if limit.map_or(false, |limit| end >= limit) {
                break;
            }
        }

        let cached = end - position;
        length.map_or(cached, |len| cached.min(len))
    }

    async fn remove_span(&self, span: &CacheSpan) -> Result<()> {
        let file = {
            let mut state = self.state.lock();
            state.ensure_initialized()?;
            state.remove_span(&span.key, span.position)
        };
        if let Some(file) = file {
            delete_file(&file).await;
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn remove_content(&self, key: &str) -> Result<()> {
        let (files, snapshot) = {
            let mut guard = self.state.lock();
            guard.ensure_initialized()?;
            let state = &mut *guard;

            let held = state
                .contents
                .get(key)
                .map_or(0, |content| content.holes.len());
            if held > 0 {
                return Err(CacheError::InvalidState(format!(
                    "{} has {} hole span(s) held by readers",
                    key, held
                )));
            }

            let positions: Vec<u64> = state
                .contents
                .get(key)
                .map(|content| content.spans.keys().copied().collect())
                .unwrap_or_default();
            let files: Vec<PathBuf> = positions
                .into_iter()
                .filter_map(|position| state.remove_span(key, position))
                .collect();
            state.contents.remove(key);
            state.index.remove(key);
            (files, state.snapshot_index())
        };

        for file in &files {
            delete_file(file).await;
        }
        if let Some(snapshot) = snapshot {
            self.persist(snapshot).await;
        }
        info!(spans = files.len(), "Content removed");
        self.changed.notify_waiters();
        Ok(())
    }
}

fn span_file_name(id: u32, position: u64) -> String {
    format!(
        "{}.{}.{}.{}",
        id,
        position,
        Uuid::new_v4().simple(),
        SPAN_FILE_SUFFIX
    )
}

/// Parses `<id>.<position>.<uuid>.span` into `(id, position)`.
fn parse_span_file_name(path: &Path) -> Option<(u32, u64)> {
    let name = path.file_name()?.to_str()?;
    let mut parts = name.split('.');
    let id = parts.next()?.parse().ok()?;
    let position = parts.next()?.parse().ok()?;
    let unique = parts.next()?;
    let suffix = parts.next()?;
    if unique.is_empty() || suffix != SPAN_FILE_SUFFIX || parts.next().is_some() {
        return None;
    }
    Some((id, position))
}

async fn delete_file(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
    }
}
