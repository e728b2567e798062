//! # Cache Populator
//!
//! Write-through of a single upstream body: every chunk read from upstream is
//! appended to a partial file and forwarded to the client over a bounded
//! channel. The partial file is renamed onto the entry path only after the
//! whole body arrived, so a cache hit always sees a complete tarball.
//!
//! The transfer runs on its own task. A client that goes away stops receiving
//! chunks but does not stop the cache fill. Neither does a client that stays
//! connected without reading: once its buffer has been full for the stall
//! timeout it is cut off, and its stream ends with an error instead of looking
//! complete.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::Bytes;
use futures::{StreamExt, future, stream};
use tokio::fs::{self, File};
use tokio::io::{self, AsyncWriteExt, BufWriter};
use tokio::sync::mpsc;
use tokio::time;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info, warn};

use crate::flight::{FlightGuard, FlightOutcome};
use crate::key::CacheKey;
use crate::storage::{self, CacheLayout};
use crate::stream::ByteStream;
use crate::upstream::UpstreamBody;

const WRITE_BUFFER_SIZE: usize = 64 * 1024;
const DEFAULT_STALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Persists upstream bodies while relaying them
#[derive(Debug, Clone)]
pub struct CachePopulator {
    layout: CacheLayout,
    channel_capacity: usize,
    stall_timeout: Duration,
}

impl CachePopulator {
    pub fn new(layout: CacheLayout, channel_capacity: usize) -> Self {
        Self {
            layout,
            channel_capacity: channel_capacity.max(1),
            stall_timeout: DEFAULT_STALL_TIMEOUT,
        }
    }

    /// How long a full client buffer may hold up the cache fill
    pub fn with_stall_timeout(mut self, stall_timeout: Duration) -> Self {
        self.stall_timeout = stall_timeout;
        self
    }

    /// Start the write-through of `body` for `key` and return the live stream
    /// for the client. `flight` is completed once the entry is committed or
    /// the transfer failed.
    pub async fn populate(
        &self,
        key: &CacheKey,
        body: UpstreamBody,
        flight: FlightGuard,
    ) -> ByteStream {
        let dir = self.layout.crate_dir(key);
        if let Err(e) = storage::ensure_dir(&dir).await {
            // Best effort; creating the partial file below fails if it matters
            warn!(dir = ?dir, error = %e, "Failed to create crate directory");
        }

        let partial = self.layout.partial_path(key);
        let sink = match File::create(&partial).await {
            Ok(file) => Some(CacheSink {
                writer: BufWriter::with_capacity(WRITE_BUFFER_SIZE, file),
                partial,
                entry: self.layout.entry_path(key),
                written: 0,
            }),
            Err(e) => {
                warn!(path = ?partial, error = %e, "Cannot open cache file, relaying without caching");
                None
            }
        };

        let (tx, rx) = mpsc::channel(self.channel_capacity);
        let relay = Relay {
            tx,
            stall_timeout: self.stall_timeout,
            cut_off: Arc::new(AtomicBool::new(false)),
        };

        // A client that was cut off sees an error after its buffered chunks
        let cut_off = Arc::clone(&relay.cut_off);
        let tail = stream::once(async move {
            cut_off.load(Ordering::Acquire).then(|| {
                Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "client fell behind the upstream transfer",
                ))
            })
        })
        .filter_map(future::ready);

        tokio::spawn(write_through(key.clone(), body, sink, relay, flight));

        ReceiverStream::new(rx).chain(tail).boxed()
    }
}

/// Sending half of the client stream
struct Relay {
    tx: mpsc::Sender<io::Result<Bytes>>,
    stall_timeout: Duration,
    cut_off: Arc<AtomicBool>,
}

impl Relay {
    /// Forward `item`; `false` once the client is gone or was cut off
    async fn send(&self, key: &CacheKey, item: io::Result<Bytes>) -> bool {
        match time::timeout(self.stall_timeout, self.tx.send(item)).await {
            Ok(Ok(())) => true,
            Ok(Err(_)) => {
                debug!(key = %key, "Client went away, continuing cache fill");
                false
            }
            Err(_) => {
                warn!(
                    key = %key,
                    stall_timeout = ?self.stall_timeout,
                    "Client stopped reading, continuing cache fill without it"
                );
                self.cut_off.store(true, Ordering::Release);
                false
            }
        }
    }
}

async fn write_through(
    key: CacheKey,
    body: UpstreamBody,
    mut sink: Option<CacheSink>,
    relay: Relay,
    flight: FlightGuard,
) {
    let UpstreamBody {
        mut stream,
        content_length,
    } = body;
    let mut client = Some(relay);

    while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(key = %key, error = %e, "Upstream body failed mid-transfer");
                if let Some(sink) = sink.take() {
                    sink.discard().await;
                }
                let outcome = FlightOutcome::Failed {
                    message: e.to_string(),
                    timed_out: is_timeout(&e),
                };
                flight.complete(outcome);
                if let Some(relay) = client.take() {
                    relay.send(&key, Err(e)).await;
                }
                return;
            }
        };

        if let Some(writer) = sink.as_mut() {
            if let Err(e) = writer.write(&bytes).await {
                warn!(key = %key, error = %e, "Cache write failed, relaying without caching");
                if let Some(sink) = sink.take() {
                    sink.discard().await;
                }
            }
        }

        if let Some(relay) = client.as_ref() {
            if !relay.send(&key, Ok(bytes)).await {
                client = None;
            }
        }

        if sink.is_none() && client.is_none() {
            debug!(key = %key, "No cache file and no client left, abandoning transfer");
            return;
        }
    }

    match sink {
        Some(sink) => match sink.commit(content_length).await {
            Ok(size) => {
                info!(key = %key, size, "Cached tarball");
                flight.complete(FlightOutcome::Stored);
            }
            Err(e) => {
                warn!(key = %key, error = %e, "Failed to commit cache entry");
                drop(flight);
            }
        },
        None => drop(flight),
    }

    // Closing the client stream last means a finished response implies a
    // committed entry
    drop(client);
}

fn is_timeout(error: &io::Error) -> bool {
    error.kind() == io::ErrorKind::TimedOut
        || error
            .get_ref()
            .and_then(|inner| inner.downcast_ref::<reqwest::Error>())
            .is_some_and(reqwest::Error::is_timeout)
}

/// Partial file being filled for one entry
struct CacheSink {
    writer: BufWriter<File>,
    partial: PathBuf,
    entry: PathBuf,
    written: u64,
}

impl CacheSink {
    async fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        self.writer.write_all(bytes).await?;
        self.written += bytes.len() as u64;
        Ok(())
    }

    /// Flush, sync and move the partial file onto the entry path
    async fn commit(mut self, expected: Option<u64>) -> io::Result<u64> {
        match self.finish(expected).await {
            Ok(size) => Ok(size),
            Err(e) => {
                self.discard().await;
                Err(e)
            }
        }
    }

    async fn finish(&mut self, expected: Option<u64>) -> io::Result<u64> {
        if let Some(expected) = expected {
            if expected != self.written {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    format!("expected {expected} bytes, received {}", self.written),
                ));
            }
        }
        self.writer.flush().await?;
        self.writer.get_ref().sync_all().await?;
        fs::rename(&self.partial, &self.entry).await?;
        Ok(self.written)
    }

    async fn discard(self) {
        drop(self.writer);
        if let Err(e) = fs::remove_file(&self.partial).await {
            debug!(path = ?self.partial, error = %e, "Failed to remove partial cache file");
        }
    }
}
