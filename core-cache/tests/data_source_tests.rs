mod common;

use bridge_traits::{DataSource, DataSourceFactory, ReadOutcome};
use common::{
    is_interrupted, new_cache, read_range, read_to_end, spec, test_data, CountingCache,
    FakeUpstream, KEY, URI,
};
use core_cache::{
    Cache, CacheConfig, CacheDataSource, CacheDataSourceFactory, CacheError, CacheEventListener,
    CacheFlags, CacheSpan, Result, SimpleCache,
};
use mockall::mock;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const MAX_FILE_SIZE: u64 = 64 * 1024;

mock! {
    pub CacheStore {}

    #[async_trait::async_trait]
    impl Cache for CacheStore {
        fn content_length(&self, key: &str) -> Option<u64>;
        async fn set_content_length(&self, key: &str, length: u64) -> bool;
        async fn start_read_write(&self, key: &str, position: u64) -> Result<CacheSpan>;
        async fn start_read_write_non_blocking(&self, key: &str, position: u64) -> Result<Option<CacheSpan>>;
        fn release_hole_span(&self, span: &CacheSpan);
        fn cache_space_bytes(&self) -> u64;
        async fn start_file(&self, key: &str, position: u64, max_length: u64) -> Result<PathBuf>;
        async fn commit_file(&self, file: &Path) -> Result<()>;
        fn cached_spans(&self, key: &str) -> Vec<CacheSpan>;
        fn keys(&self) -> Vec<String>;
        fn cached_bytes(&self, key: &str, position: u64, length: Option<u64>) -> u64;
        async fn remove_span(&self, span: &CacheSpan) -> Result<()>;
        async fn remove_content(&self, key: &str) -> Result<()>;
    }
}

mock! {
    pub Listener {}

    impl CacheEventListener for Listener {
        fn on_cached_bytes_read(&self, cache_size_bytes: u64, cached_bytes_read: u64);
    }
}

fn source_with(
    cache: Arc<dyn Cache>,
    upstream: &FakeUpstream,
    flags: CacheFlags,
) -> CacheDataSource {
    CacheDataSource::new(cache, Box::new(upstream.clone()), flags, MAX_FILE_SIZE)
}

#[tokio::test]
async fn test_v1_first_read_writes_whole_range() {
    let dir = tempfile::tempdir().unwrap();
    let span_file = dir.path().join("0.0.test.span");
    let data = test_data(1000);
    let upstream = FakeUpstream::new(data.clone());

    let mut cache = MockCacheStore::new();
    cache.expect_content_length().return_const(None);
    cache.expect_cache_space_bytes().return_const(0u64);
    cache
        .expect_start_read_write_non_blocking()
        .withf(|key: &str, position: &u64| key == KEY && *position == 0)
        .times(1)
        .returning(|key, position| Ok(Some(CacheSpan::hole(key, position, Some(1000)))));
    {
        let span_file = span_file.clone();
        cache
            .expect_start_file()
            .withf(|key: &str, position: &u64, max_length: &u64| {
                key == KEY && *position == 0 && *max_length == 1000
            })
            .times(1)
            .returning(move |_, _, _| Ok(span_file.clone()));
    }
    {
        let span_file = span_file.clone();
        cache
            .expect_commit_file()
            .withf(move |file: &Path| file == span_file.as_path())
            .times(1)
            .returning(|_| Ok(()));
    }
    cache
        .expect_release_hole_span()
        .withf(|span: &CacheSpan| span.key == KEY && span.position == 0 && span.is_hole())
        .times(1)
        .return_const(());
    cache.expect_set_content_length().never();
    cache.expect_start_read_write().never();

    let mut source = source_with(Arc::new(cache), &upstream, CacheFlags::default());
    assert_eq!(source.open(&spec(0, Some(1000))).await.unwrap(), Some(1000));
    let read = read_to_end(&mut source, 100).await.unwrap();
    source.close().await.unwrap();

    assert_eq!(read, data);
    assert_eq!(std::fs::read(&span_file).unwrap(), data);
    let opens = upstream.opens();
    assert_eq!(opens.len(), 1);
    assert_eq!((opens[0].position, opens[0].length), (0, Some(1000)));
}

#[tokio::test]
async fn test_stitches_cached_spans_around_hole() {
    let dir = tempfile::tempdir().unwrap();
    let cache = new_cache(dir.path()).await;
    let data = test_data(200);
    let upstream = FakeUpstream::new(data.clone());
    let mut source = source_with(cache.clone(), &upstream, CacheFlags::default());

    read_range(&mut source, &spec(0, Some(100))).await.unwrap();
    read_range(&mut source, &spec(150, Some(50))).await.unwrap();
    assert_eq!(cache.cached_spans(KEY).len(), 2);
    upstream.clear_log();

    let read = read_range(&mut source, &spec(0, Some(200))).await.unwrap();
    assert_eq!(read, data);

    let opens = upstream.opens();
    assert_eq!(opens.len(), 1);
    assert_eq!((opens[0].position, opens[0].length), (100, Some(50)));
    assert_eq!(upstream.bytes_served(), 50);
    assert!(cache.is_cached(KEY, 0, 200));
}

#[tokio::test]
async fn test_single_read_spans_segments() {
    let dir = tempfile::tempdir().unwrap();
    let cache = new_cache(dir.path()).await;
    let data = test_data(200);
    let upstream = FakeUpstream::new(data.clone());
    let mut source = source_with(cache.clone(), &upstream, CacheFlags::default());
    read_range(&mut source, &spec(0, Some(100))).await.unwrap();

    source.open(&spec(0, Some(200))).await.unwrap();
    let mut buf = vec![0u8; 100];
    assert_eq!(source.read(&mut buf).await.unwrap(), ReadOutcome::Bytes(100));
    // The cached segment ends here; the next read continues from upstream.
    assert_eq!(source.read(&mut buf).await.unwrap(), ReadOutcome::Bytes(100));
    assert_eq!(buf, data[100..]);
    assert!(source.read(&mut buf).await.unwrap().is_end_of_input());
    source.close().await.unwrap();
}

#[tokio::test]
async fn test_unbounded_request_bypasses_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache = new_cache(dir.path()).await;
    let data = test_data(300);
    let upstream = FakeUpstream::new(data.clone()).without_length();
    let mut source = source_with(cache.clone(), &upstream, CacheFlags::default());

    assert_eq!(source.open(&spec(0, None)).await.unwrap(), None);
    let read = read_to_end(&mut source, 64).await.unwrap();
    source.close().await.unwrap();

    assert_eq!(read, data);
    assert!(cache.cached_spans(KEY).is_empty());
    assert_eq!(cache.stats().held_holes, 0);
    // Reaching the end of an unbounded read reveals the length.
    assert_eq!(cache.content_length(KEY), Some(300));
}

#[tokio::test]
async fn test_unbounded_request_cached_when_enabled() {
    let dir = tempfile::tempdir().unwrap();
    let cache = new_cache(dir.path()).await;
    let data = test_data(300);
    let upstream = FakeUpstream::new(data.clone()).without_length();
    let flags = CacheFlags {
        cache_unbounded_requests: true,
        ..CacheFlags::default()
    };
    let mut source = source_with(cache.clone(), &upstream, flags);

    let read = read_range(&mut source, &spec(0, None)).await.unwrap();
    assert_eq!(read, data);
    assert_eq!(cache.cached_bytes(KEY, 0, None), 300);
    assert_eq!(cache.content_length(KEY), Some(300));

    // Now the length is known, an open-ended request is bounded.
    upstream.clear_log();
    assert_eq!(source.open(&spec(100, None)).await.unwrap(), Some(200));
    assert_eq!(read_to_end(&mut source, 64).await.unwrap(), data[100..]);
    source.close().await.unwrap();
    assert!(upstream.opens().is_empty());
}

#[tokio::test]
async fn test_resolved_length_is_recorded_when_writing() {
    let dir = tempfile::tempdir().unwrap();
    let cache = new_cache(dir.path()).await;
    let upstream = FakeUpstream::new(test_data(300));
    let flags = CacheFlags {
        cache_unbounded_requests: true,
        ..CacheFlags::default()
    };
    let mut source = source_with(cache.clone(), &upstream, flags);

    assert_eq!(source.open(&spec(50, None)).await.unwrap(), Some(250));
    assert_eq!(cache.content_length(KEY), Some(300));
    source.close().await.unwrap();
}

#[tokio::test]
async fn test_end_of_stream_discovered_on_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let cache = new_cache(dir.path()).await;
    let data = test_data(100);
    let upstream = FakeUpstream::new(data.clone()).without_length();
    let flags = CacheFlags {
        cache_unbounded_requests: true,
        ..CacheFlags::default()
    };
    let mut source = source_with(cache.clone(), &upstream, flags);

    // Cache the whole resource without learning its length.
    read_range(&mut source, &spec(0, Some(100))).await.unwrap();
    assert_eq!(cache.content_length(KEY), None);
    upstream.clear_log();

    assert_eq!(source.open(&spec(0, None)).await.unwrap(), None);
    let read = read_to_end(&mut source, 64).await.unwrap();
    source.close().await.unwrap();

    assert_eq!(read, data);
    let opens = upstream.opens();
    assert_eq!(opens.len(), 1);
    assert_eq!((opens[0].position, opens[0].length), (100, None));
    assert_eq!(cache.content_length(KEY), Some(100));
    assert_eq!(cache.stats().held_holes, 0);
}

#[tokio::test]
async fn test_out_of_range_on_initial_open_is_reported() {
    let dir = tempfile::tempdir().unwrap();
    let cache = new_cache(dir.path()).await;
    let upstream = FakeUpstream::new(test_data(100));
    let mut source = source_with(cache.clone(), &upstream, CacheFlags::default());

    let err = source.open(&spec(100, None)).await.unwrap_err();
    assert!(err.is_position_out_of_range());

    assert!(cache.set_content_length(KEY, 100).await);
    let flags = CacheFlags {
        cache_unbounded_requests: true,
        ..CacheFlags::default()
    };
    let mut source = source_with(cache.clone(), &upstream, flags);
    let err = source.open(&spec(150, None)).await.unwrap_err();
    assert!(err.is_position_out_of_range());
    assert_eq!(source.open(&spec(100, None)).await.unwrap(), Some(0));
    assert!(source.read(&mut [0u8; 8]).await.unwrap().is_end_of_input());
    source.close().await.unwrap();
}

#[tokio::test]
async fn test_empty_read_and_zero_length() {
    let dir = tempfile::tempdir().unwrap();
    let cache = new_cache(dir.path()).await;
    let upstream = FakeUpstream::new(test_data(100));
    let mut source = source_with(cache.clone(), &upstream, CacheFlags::default());

    assert_eq!(source.open(&spec(10, Some(0))).await.unwrap(), Some(0));
    assert_eq!(source.read(&mut []).await.unwrap(), ReadOutcome::Bytes(0));
    assert!(source.read(&mut [0u8; 8]).await.unwrap().is_end_of_input());
    source.close().await.unwrap();
    assert!(upstream.opens().is_empty());
}

#[tokio::test]
async fn test_lock_released_when_upstream_fails() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CountingCache::new(new_cache(dir.path()).await));
    let upstream = FakeUpstream::new(test_data(200)).failing_at(120);
    let mut source = source_with(cache.clone(), &upstream, CacheFlags::default());

    source.open(&spec(0, Some(200))).await.unwrap();
    let err = read_to_end(&mut source, 50).await.unwrap_err();
    assert!(!err.is_cache_error());
    assert!(!source.has_seen_cache_error());
    source.close().await.unwrap();

    assert_eq!(cache.acquired(), 1);
    assert_eq!(cache.released(), cache.acquired());
    assert_eq!(cache.inner().stats().held_holes, 0);
    // Bytes received before the failure are kept.
    assert_eq!(cache.cached_bytes(KEY, 0, None), 120);
}

#[tokio::test]
async fn test_cache_write_failure_releases_lock_and_bypasses_next_open() {
    let dir = tempfile::tempdir().unwrap();
    let data = test_data(300);
    let upstream = FakeUpstream::new(data.clone());
    let acquired = Arc::new(AtomicUsize::new(0));
    let released = Arc::new(AtomicUsize::new(0));

    let mut cache = MockCacheStore::new();
    cache.expect_content_length().return_const(None);
    cache.expect_cache_space_bytes().return_const(0u64);
    cache.expect_set_content_length().return_const(true);
    {
        let acquired = acquired.clone();
        cache
            .expect_start_read_write_non_blocking()
            .times(1)
            .returning(move |key, position| {
                acquired.fetch_add(1, Ordering::SeqCst);
                Ok(Some(CacheSpan::hole(key, position, Some(300))))
            });
    }
    {
        let released = released.clone();
        cache
            .expect_release_hole_span()
            .times(1)
            .returning(move |_| {
                released.fetch_add(1, Ordering::SeqCst);
            });
    }
    {
        let dir = dir.path().to_path_buf();
        cache
            .expect_start_file()
            .times(2)
            .returning(move |_, position, _| Ok(dir.join(format!("0.{}.test.span", position))));
    }
    let mut commits = 0;
    cache.expect_commit_file().times(2).returning(move |_| {
        commits += 1;
        if commits == 1 {
            Ok(())
        } else {
            Err(CacheError::CacheIo("disk full".to_string()))
        }
    });

    let flags = CacheFlags {
        ignore_cache_on_error: true,
        ..CacheFlags::default()
    };
    let mut source = CacheDataSource::new(Arc::new(cache), Box::new(upstream.clone()), flags, 100);

    source.open(&spec(0, Some(300))).await.unwrap();
    let mut buf = [0u8; 50];
    let mut read = 0;
    let err = loop {
        match source.read(&mut buf).await {
            Ok(ReadOutcome::Bytes(n)) => read += n,
            Ok(ReadOutcome::EndOfInput) => panic!("read past a failed commit"),
            Err(e) => break e,
        }
    };
    // The second file is committed when the write of bytes [200, 250) rolls over.
    assert_eq!(read, 200);
    assert!(err.is_cache_error());
    assert!(source.has_seen_cache_error());
    source.close().await.unwrap();
    assert_eq!(acquired.load(Ordering::SeqCst), 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);

    upstream.clear_log();
    assert_eq!(source.open(&spec(0, Some(300))).await.unwrap(), Some(300));
    assert_eq!(source.uri(), Some(URI.to_string()));
    assert_eq!(read_to_end(&mut source, 64).await.unwrap(), data);
    source.close().await.unwrap();

    assert_eq!(acquired.load(Ordering::SeqCst), 1);
    assert_eq!(released.load(Ordering::SeqCst), 1);
    let opens = upstream.opens();
    assert_eq!(opens.len(), 1);
    assert_eq!((opens[0].position, opens[0].length), (0, Some(300)));
}

#[tokio::test]
async fn test_lock_released_when_source_dropped() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CountingCache::new(new_cache(dir.path()).await));
    let upstream = FakeUpstream::new(test_data(200));

    {
        let mut source = source_with(cache.clone(), &upstream, CacheFlags::default());
        source.open(&spec(0, Some(200))).await.unwrap();
        source.read(&mut [0u8; 10]).await.unwrap();
    }

    assert_eq!(cache.acquired(), 1);
    assert_eq!(cache.released(), 1);
    assert!(cache
        .start_read_write_non_blocking(KEY, 0)
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_lock_accounting_across_segments() {
    let dir = tempfile::tempdir().unwrap();
    let cache = Arc::new(CountingCache::new(new_cache(dir.path()).await));
    let data = test_data(400);
    let upstream = FakeUpstream::new(data.clone());
    let mut source = source_with(cache.clone(), &upstream, CacheFlags::default());

    read_range(&mut source, &spec(100, Some(100))).await.unwrap();
    read_range(&mut source, &spec(300, Some(50))).await.unwrap();
    let read = read_range(&mut source, &spec(0, Some(400))).await.unwrap();

    assert_eq!(read, data);
    assert_eq!(cache.acquired(), 5);
    assert_eq!(cache.released(), 5);
    assert!(cache.is_cached(KEY, 0, 400));
}

#[tokio::test]
async fn test_ignore_cache_after_cache_read_error() {
    let dir = tempfile::tempdir().unwrap();
    let cache = new_cache(dir.path()).await;
    let data = test_data(100);
    let upstream = FakeUpstream::new(data.clone());
    let flags = CacheFlags {
        ignore_cache_on_error: true,
        ..CacheFlags::default()
    };
    let mut source = source_with(cache.clone(), &upstream, flags);
    read_range(&mut source, &spec(0, Some(100))).await.unwrap();

    for span in cache.cached_spans(KEY) {
        std::fs::remove_file(span.file.unwrap()).unwrap();
    }
    let err = source.open(&spec(0, Some(100))).await.unwrap_err();
    assert!(matches!(err, CacheError::Source(_)));
    assert!(source.has_seen_cache_error());

    upstream.clear_log();
    let read = read_range(&mut source, &spec(0, Some(100))).await.unwrap();
    assert_eq!(read, data);
    assert_eq!(upstream.opens().len(), 1);
    assert_eq!(cache.stats().held_holes, 0);

    source.clear_cache_error();
    assert!(!source.has_seen_cache_error());
}

#[tokio::test]
async fn test_cache_error_without_ignore_flag_keeps_using_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache = new_cache(dir.path()).await;
    let upstream = FakeUpstream::new(test_data(100));
    let mut source = source_with(cache.clone(), &upstream, CacheFlags::default());
    read_range(&mut source, &spec(0, Some(100))).await.unwrap();

    for span in cache.cached_spans(KEY) {
        std::fs::remove_file(span.file.unwrap()).unwrap();
    }
    assert!(source.open(&spec(0, Some(100))).await.is_err());
    assert!(source.has_seen_cache_error());
    assert!(source.open(&spec(0, Some(100))).await.is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readers_never_double_cache() {
    let dir = tempfile::tempdir().unwrap();
    let cache = new_cache(dir.path()).await;
    let data = test_data(64 * 1024);
    let upstream = FakeUpstream::new(data.clone());
    let flags = CacheFlags {
        block_on_cache: true,
        ..CacheFlags::default()
    };
    let factory = CacheDataSourceFactory::new(cache.clone(), upstream.factory(), flags, 4096);

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let factory = factory.clone();
        tasks.push(tokio::spawn(async move {
            let mut source = factory.create_cache_data_source();
            read_range(&mut source, &spec(0, Some(64 * 1024))).await.unwrap()
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), data);
    }

    assert_eq!(upstream.bytes_served(), 64 * 1024);
    assert_eq!(cache.cache_space_bytes(), 64 * 1024);
    let spans = cache.cached_spans(KEY);
    for pair in spans.windows(2) {
        assert!(pair[0].end().unwrap() <= pair[1].position);
    }
    assert_eq!(cache.stats().held_holes, 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_non_blocking_readers_bypass_locked_holes() {
    let dir = tempfile::tempdir().unwrap();
    let cache = new_cache(dir.path()).await;
    let data = test_data(32 * 1024);
    let upstream = FakeUpstream::new(data.clone());
    let factory =
        CacheDataSourceFactory::new(cache.clone(), upstream.factory(), CacheFlags::default(), 1024);

    let mut tasks = Vec::new();
    for i in 0..4u64 {
        let factory = factory.clone();
        tasks.push(tokio::spawn(async move {
            let mut source = factory.create_cache_data_source();
            let position = i * 1024;
            read_range(&mut source, &spec(position, Some(16 * 1024))).await.unwrap()
        }));
    }
    for (i, task) in tasks.into_iter().enumerate() {
        let start = i * 1024;
        assert_eq!(task.await.unwrap(), data[start..start + 16 * 1024]);
    }

    let spans = cache.cached_spans(KEY);
    for pair in spans.windows(2) {
        assert!(pair[0].end().unwrap() <= pair[1].position);
    }
    let total: u64 = spans.iter().map(|s| s.length.unwrap()).sum();
    assert_eq!(total, cache.cache_space_bytes());
    assert!(total <= 19 * 1024);
}

#[tokio::test]
async fn test_listener_receives_cached_bytes_on_close() {
    let dir = tempfile::tempdir().unwrap();
    let cache = new_cache(dir.path()).await;
    let upstream = FakeUpstream::new(test_data(200));
    let mut source = source_with(cache.clone(), &upstream, CacheFlags::default());
    read_range(&mut source, &spec(0, Some(100))).await.unwrap();

    let mut listener = MockListener::new();
    listener
        .expect_on_cached_bytes_read()
        .withf(|cache_size: &u64, bytes: &u64| *cache_size == 200 && *bytes == 100)
        .times(1)
        .return_const(());

    let mut source =
        source_with(cache.clone(), &upstream, CacheFlags::default()).with_listener(Arc::new(listener));
    read_range(&mut source, &spec(0, Some(200))).await.unwrap();
    // Nothing more was read from the cache.
    source.close().await.unwrap();
}

#[tokio::test]
async fn test_uri_reports_upstream_only_when_bypassing() {
    let dir = tempfile::tempdir().unwrap();
    let cache = new_cache(dir.path()).await;
    let mirror = "https://mirror.example.com/v1.mp4";
    let upstream = FakeUpstream::new(test_data(100)).redirected_to(mirror);
    let mut source = source_with(cache.clone(), &upstream, CacheFlags::default());
    assert_eq!(source.uri(), None);

    source.open(&spec(0, None)).await.unwrap();
    assert_eq!(source.uri(), Some(mirror.to_string()));
    source.close().await.unwrap();
    assert_eq!(source.uri(), None);

    source.open(&spec(0, Some(100))).await.unwrap();
    assert_eq!(source.uri(), Some(URI.to_string()));
    source.close().await.unwrap();
}

#[tokio::test]
async fn test_blocking_wait_cancelled() {
    let dir = tempfile::tempdir().unwrap();
    let cache = new_cache(dir.path()).await;
    let upstream = FakeUpstream::new(test_data(100));
    let hole = cache.start_read_write(KEY, 0).await.unwrap();

    let token = CancellationToken::new();
    let flags = CacheFlags {
        block_on_cache: true,
        ..CacheFlags::default()
    };
    let mut source = source_with(cache.clone(), &upstream, flags).with_cancellation(token.clone());

    let cancel = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        token.cancel();
    });
    let err = source.open(&spec(0, Some(100))).await.unwrap_err();
    cancel.await.unwrap();

    assert!(is_interrupted(&err));
    assert!(!source.has_seen_cache_error());
    cache.release_hole_span(&hole);
}

#[tokio::test]
async fn test_blocking_wait_timeout_surfaces_from_open() {
    let dir = tempfile::tempdir().unwrap();
    let config = CacheConfig::new(dir.path()).with_lock_wait_timeout(Duration::from_millis(20));
    let cache = SimpleCache::create(config).await.unwrap();
    let upstream = FakeUpstream::new(test_data(100));
    let _hole = cache.start_read_write(KEY, 0).await.unwrap();

    let flags = CacheFlags {
        block_on_cache: true,
        ..CacheFlags::default()
    };
    let mut source = source_with(cache.clone(), &upstream, flags);
    let err = source.open(&spec(0, Some(100))).await.unwrap_err();
    assert!(is_interrupted(&err));
}

#[tokio::test]
async fn test_open_twice_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let cache = new_cache(dir.path()).await;
    let upstream = FakeUpstream::new(test_data(100));
    let mut source = source_with(cache.clone(), &upstream, CacheFlags::default());

    source.open(&spec(0, Some(10))).await.unwrap();
    let err = source.open(&spec(0, Some(10))).await.unwrap_err();
    assert!(matches!(err, CacheError::InvalidState(_)));
    source.close().await.unwrap();
}

#[tokio::test]
async fn test_factory_creates_trait_object_sources() {
    let dir = tempfile::tempdir().unwrap();
    let cache = new_cache(dir.path()).await;
    let data = test_data(100);
    let upstream = FakeUpstream::new(data.clone());
    let factory =
        CacheDataSourceFactory::new(cache.clone(), upstream.factory(), CacheFlags::default(), 16);

    let mut source: Box<dyn DataSource> = factory.create();
    assert_eq!(source.open(&spec(0, Some(100))).await.unwrap(), Some(100));
    let mut read = Vec::new();
    let mut buf = [0u8; 7];
    while let ReadOutcome::Bytes(n) = source.read(&mut buf).await.unwrap() {
        read.extend_from_slice(&buf[..n]);
    }
    source.close().await.unwrap();

    assert_eq!(read, data);
    // 16-byte span files.
    assert_eq!(cache.cached_spans(KEY).len(), 7);
}
