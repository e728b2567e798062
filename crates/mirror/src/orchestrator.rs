//! # Download Orchestrator
//!
//! Entry point for each tarball request. Serves committed entries straight
//! from disk; on a miss it either joins the fetch already running for the key
//! or leads a new one through the upstream fetcher and the cache populator.

use std::fmt;
use std::sync::Arc;

use reqwest::StatusCode;
use tokio::io;
use tracing::{debug, info, instrument, warn};

use crate::flight::{FlightGuard, FlightOutcome, InFlight, Join};
use crate::key::CacheKey;
use crate::populate::CachePopulator;
use crate::storage::{self, CacheLayout};
use crate::stream::{ByteStream, file_stream};
use crate::upstream::{FetchOutcome, RegistryUpstream, Upstream};
use crate::{MirrorConfig, MirrorError};

/// Result of a tarball request
pub enum Download {
    /// Served from the local cache
    Cached { body: ByteStream, len: u64 },
    /// Streamed from upstream while being written to the cache
    Fetched {
        body: ByteStream,
        content_length: Option<u64>,
    },
    /// The registry refused the download
    Forbidden,
    /// The download location answered with a non-200 status
    Unavailable(StatusCode),
}

impl Download {
    /// The tarball stream, or `None` for an empty result
    pub fn into_body(self) -> Option<ByteStream> {
        match self {
            Download::Cached { body, .. } | Download::Fetched { body, .. } => Some(body),
            Download::Forbidden | Download::Unavailable(_) => None,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Download::Cached { .. })
    }

    /// Body length when known up front
    pub fn content_length(&self) -> Option<u64> {
        match self {
            Download::Cached { len, .. } => Some(*len),
            Download::Fetched { content_length, .. } => *content_length,
            Download::Forbidden | Download::Unavailable(_) => None,
        }
    }
}

impl fmt::Debug for Download {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Download::Cached { len, .. } => f.debug_struct("Cached").field("len", len).finish(),
            Download::Fetched { content_length, .. } => f
                .debug_struct("Fetched")
                .field("content_length", content_length)
                .finish(),
            Download::Forbidden => f.write_str("Forbidden"),
            Download::Unavailable(status) => f.debug_tuple("Unavailable").field(status).finish(),
        }
    }
}

/// Composes the storage probe, upstream fetcher and cache populator
pub struct DownloadOrchestrator {
    layout: CacheLayout,
    upstream: Arc<dyn Upstream>,
    populator: CachePopulator,
    flights: Arc<InFlight>,
    read_buffer_size: usize,
}

impl DownloadOrchestrator {
    /// Create an orchestrator fetching from the configured registry
    pub fn new(config: &MirrorConfig) -> Result<Self, MirrorError> {
        let upstream = RegistryUpstream::new(config)?;
        Ok(Self::with_upstream(config, Arc::new(upstream)))
    }

    /// Create an orchestrator with a custom upstream
    pub fn with_upstream(config: &MirrorConfig, upstream: Arc<dyn Upstream>) -> Self {
        let layout = CacheLayout::new(&config.cache_root);
        Self {
            populator: CachePopulator::new(layout.clone(), config.channel_capacity)
                .with_stall_timeout(config.client_stall_timeout),
            layout,
            upstream,
            flights: Arc::new(InFlight::new()),
            read_buffer_size: config.read_buffer_size,
        }
    }

    pub fn layout(&self) -> &CacheLayout {
        &self.layout
    }

    /// Number of upstream fetches currently running
    pub fn in_flight(&self) -> usize {
        self.flights.len()
    }

    /// Fetch the tarball for `name`/`version`, from cache when possible
    pub async fn get(&self, name: &str, version: &str) -> Result<Download, MirrorError> {
        let key = CacheKey::new(name, version)?;
        self.get_key(&key).await
    }

    #[instrument(skip(self, key), fields(key = %key), level = "debug")]
    pub async fn get_key(&self, key: &CacheKey) -> Result<Download, MirrorError> {
        let entry = self.layout.entry_path(key);

        loop {
            if storage::exists(&entry).await {
                match self.serve_cached(key).await {
                    Ok(download) => return Ok(download),
                    // Entry vanished between the probe and the open
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }

            match self.flights.join(key) {
                Join::Follower(follower) => {
                    debug!("Waiting for in-flight fetch");
                    match follower.wait().await {
                        Some(FlightOutcome::Stored) | None => continue,
                        Some(FlightOutcome::Forbidden) => return Ok(Download::Forbidden),
                        Some(FlightOutcome::Unavailable(status)) => {
                            return Ok(Download::Unavailable(status));
                        }
                        Some(FlightOutcome::Failed { message, timed_out }) => {
                            return Err(MirrorError::Upstream { message, timed_out });
                        }
                    }
                }
                Join::Leader(guard) => {
                    // Another leader may have committed the entry since the probe
                    if storage::exists(&entry).await {
                        drop(guard);
                        continue;
                    }
                    return self.fetch(key, guard).await;
                }
            }
        }
    }

    async fn serve_cached(&self, key: &CacheKey) -> io::Result<Download> {
        let (file, len) = self.layout.open_entry(key).await?;
        debug!(size = len, "Serving tarball from cache");
        Ok(Download::Cached {
            body: file_stream(file, self.read_buffer_size),
            len,
        })
    }

    async fn fetch(&self, key: &CacheKey, guard: FlightGuard) -> Result<Download, MirrorError> {
        info!("Cache miss, fetching from upstream");

        match self.upstream.fetch(key).await {
            Ok(FetchOutcome::Found(body)) => {
                let content_length = body.content_length;
                let body = self.populator.populate(key, body, guard).await;
                Ok(Download::Fetched {
                    body,
                    content_length,
                })
            }
            Ok(FetchOutcome::Forbidden) => {
                guard.complete(FlightOutcome::Forbidden);
                Ok(Download::Forbidden)
            }
            Ok(FetchOutcome::Unavailable(status)) => {
                guard.complete(FlightOutcome::Unavailable(status));
                Ok(Download::Unavailable(status))
            }
            Err(e) => {
                warn!(error = %e, "Upstream fetch failed");
                guard.complete(FlightOutcome::Failed {
                    message: e.to_string(),
                    timed_out: e.is_timeout(),
                });
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::upstream::UpstreamBody;
    use async_trait::async_trait;
    use bytes::Bytes;
    use futures::{StreamExt, TryStreamExt, stream};
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Upstream that must never be reached
    struct Unreachable;

    #[async_trait]
    impl Upstream for Unreachable {
        async fn fetch(&self, key: &CacheKey) -> Result<FetchOutcome, MirrorError> {
            panic!("upstream contacted for {key}");
        }
    }

    /// Upstream answering every key the same way, counting calls
    struct Scripted {
        calls: AtomicUsize,
        answer: fn() -> FetchOutcome,
        delay: Duration,
    }

    impl Scripted {
        fn new(answer: fn() -> FetchOutcome) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                answer,
                delay: Duration::ZERO,
            }
        }

        fn slow(answer: fn() -> FetchOutcome, delay: Duration) -> Self {
            Self {
                delay,
                ..Self::new(answer)
            }
        }
    }

    #[async_trait]
    impl Upstream for Scripted {
        async fn fetch(&self, _key: &CacheKey) -> Result<FetchOutcome, MirrorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            Ok((self.answer)())
        }
    }

    /// Upstream whose fetch fails after a pause
    struct Failing {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Upstream for Failing {
        async fn fetch(&self, _key: &CacheKey) -> Result<FetchOutcome, MirrorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(50)).await;
            Err(MirrorError::InvalidRedirect("bad location".to_string()))
        }
    }

    fn large_tarball() -> FetchOutcome {
        let parts: Vec<io::Result<Bytes>> = (0..64u8)
            .map(|i| Ok(Bytes::from(vec![i; 1024])))
            .collect();
        FetchOutcome::Found(UpstreamBody::new(stream::iter(parts).boxed(), Some(64 * 1024)))
    }

    fn tarball() -> FetchOutcome {
        let parts: Vec<io::Result<Bytes>> = vec![
            Ok(Bytes::from_static(b"crate-")),
            Ok(Bytes::from_static(b"bytes")),
        ];
        FetchOutcome::Found(UpstreamBody::new(stream::iter(parts).boxed(), Some(11)))
    }

    fn config(root: &Path) -> MirrorConfig {
        MirrorConfig::builder().with_cache_root(root).build()
    }

    async fn body_of(download: Download) -> Vec<u8> {
        let chunks: Vec<Bytes> = download
            .into_body()
            .expect("expected a body")
            .try_collect()
            .await
            .unwrap();
        chunks.concat()
    }

    #[tokio::test]
    async fn test_hit_never_touches_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let crate_dir = dir.path().join("foo");
        tokio::fs::create_dir_all(&crate_dir).await.unwrap();
        tokio::fs::write(crate_dir.join("foo@1.0.0"), b"cached bytes")
            .await
            .unwrap();

        let mirror = DownloadOrchestrator::with_upstream(&config(dir.path()), Arc::new(Unreachable));
        for _ in 0..3 {
            let download = mirror.get("foo", "1.0.0").await.unwrap();
            assert!(download.is_hit());
            assert_eq!(download.content_length(), Some(12));
            assert_eq!(body_of(download).await, b"cached bytes");
        }
    }

    #[tokio::test]
    async fn test_miss_then_hit() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = Arc::new(Scripted::new(tarball));
        let mirror = DownloadOrchestrator::with_upstream(&config(dir.path()), upstream.clone());

        let first = mirror.get("foo", "1.0.0").await.unwrap();
        assert!(!first.is_hit());
        assert_eq!(body_of(first).await, b"crate-bytes");

        let second = mirror.get("foo", "1.0.0").await.unwrap();
        assert!(second.is_hit());
        assert_eq!(body_of(second).await, b"crate-bytes");
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_forbidden_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = DownloadOrchestrator::with_upstream(
            &config(dir.path()),
            Arc::new(Scripted::new(|| FetchOutcome::Forbidden)),
        );

        let download = mirror.get("foo", "1.0.0").await.unwrap();
        assert!(matches!(download, Download::Forbidden));
        assert!(download.into_body().is_none());
        assert!(!dir.path().join("foo").join("foo@1.0.0").exists());
    }

    #[tokio::test]
    async fn test_invalid_key_rejected_before_upstream() {
        let dir = tempfile::tempdir().unwrap();
        let mirror = DownloadOrchestrator::with_upstream(&config(dir.path()), Arc::new(Unreachable));
        assert!(matches!(
            mirror.get("..", "1.0.0").await,
            Err(MirrorError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn test_concurrent_misses_share_one_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = Arc::new(Scripted::slow(tarball, Duration::from_millis(100)));
        let mirror = Arc::new(DownloadOrchestrator::with_upstream(
            &config(dir.path()),
            upstream.clone(),
        ));

        let mut handles = Vec::new();
        for _ in 0..5 {
            let mirror = Arc::clone(&mirror);
            handles.push(tokio::spawn(async move {
                let download = mirror.get("foo", "1.0.0").await.unwrap();
                body_of(download).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap(), b"crate-bytes");
        }

        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
        assert_eq!(mirror.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_followers_share_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = Arc::new(Scripted::slow(
            || FetchOutcome::Unavailable(StatusCode::NOT_FOUND),
            Duration::from_millis(50),
        ));
        let mirror = Arc::new(DownloadOrchestrator::with_upstream(
            &config(dir.path()),
            upstream.clone(),
        ));

        let (a, b) = tokio::join!(mirror.get("foo", "9.9.9"), mirror.get("foo", "9.9.9"));
        for download in [a.unwrap(), b.unwrap()] {
            assert!(matches!(
                download,
                Download::Unavailable(StatusCode::NOT_FOUND)
            ));
        }
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_followers_share_forbidden() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = Arc::new(Scripted::slow(
            || FetchOutcome::Forbidden,
            Duration::from_millis(50),
        ));
        let mirror = DownloadOrchestrator::with_upstream(&config(dir.path()), upstream.clone());

        let (a, b) = tokio::join!(mirror.get("foo", "1.0.0"), mirror.get("foo", "1.0.0"));
        assert!(matches!(a.unwrap(), Download::Forbidden));
        assert!(matches!(b.unwrap(), Download::Forbidden));
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
        assert!(!dir.path().join("foo").join("foo@1.0.0").exists());
    }

    #[tokio::test]
    async fn test_followers_share_failure() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = Arc::new(Failing {
            calls: AtomicUsize::new(0),
        });
        let mirror = DownloadOrchestrator::with_upstream(&config(dir.path()), upstream.clone());

        let (leader, follower) =
            tokio::join!(mirror.get("foo", "1.0.0"), mirror.get("foo", "1.0.0"));
        assert!(matches!(leader, Err(MirrorError::InvalidRedirect(_))));
        match follower {
            Err(MirrorError::Upstream { message, timed_out }) => {
                assert!(message.contains("bad location"));
                assert!(!timed_out);
            }
            other => panic!("unexpected follower result: {other:?}"),
        }
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
        assert_eq!(mirror.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_follower_takes_over_when_leader_vanishes() {
        let dir = tempfile::tempdir().unwrap();
        let upstream = Arc::new(Scripted::new(tarball));
        let mirror = Arc::new(DownloadOrchestrator::with_upstream(
            &config(dir.path()),
            upstream.clone(),
        ));

        let key = CacheKey::new("foo", "1.0.0").unwrap();
        let Join::Leader(guard) = mirror.flights.join(&key) else {
            panic!("expected to lead");
        };

        let follower = {
            let mirror = Arc::clone(&mirror);
            tokio::spawn(async move { body_of(mirror.get("foo", "1.0.0").await.unwrap()).await })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 0);

        // Leader gives up without an outcome
        drop(guard);

        assert_eq!(follower.await.unwrap(), b"crate-bytes");
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
        assert!(dir.path().join("foo").join("foo@1.0.0").is_file());
    }

    #[tokio::test]
    async fn test_unread_leader_body_does_not_block_followers() {
        let dir = tempfile::tempdir().unwrap();
        let config = MirrorConfig::builder()
            .with_cache_root(dir.path())
            .with_channel_capacity(1)
            .with_client_stall_timeout(Duration::from_millis(50))
            .build();
        let upstream = Arc::new(Scripted::new(large_tarball));
        let mirror = DownloadOrchestrator::with_upstream(&config, upstream.clone());

        let leader = mirror.get("foo", "1.0.0").await.unwrap();
        assert!(!leader.is_hit());

        let follower = tokio::time::timeout(Duration::from_secs(5), mirror.get("foo", "1.0.0"))
            .await
            .expect("follower must not wait on the leader's client")
            .unwrap();
        assert!(follower.is_hit());
        assert_eq!(follower.content_length(), Some(64 * 1024));
        assert_eq!(body_of(follower).await.len(), 64 * 1024);
        assert_eq!(upstream.calls.load(Ordering::SeqCst), 1);
        drop(leader);
    }
}
