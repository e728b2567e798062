//! In-process registry used by the integration tests.
//!
//! Serves the two-hop download flow of a crates.io-style registry:
//! - `/api/v1/crates/{name}/{version}/download` answers 403 for forbidden
//!   crates and otherwise redirects (relative `Location`) to `/files/...`
//! - `/files/{name}/{version}` streams the registered tarball in chunks, 404
//!   for unknown keys, aborts halfway for crates marked as broken and fails
//!   before any byte for crates marked as reset
//!
//! Every request is counted per path so tests can assert on upstream traffic.

use std::collections::{HashMap, HashSet};
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use bytes::Bytes;
use futures::stream::{self, StreamExt};

const CHUNK_SIZE: usize = 16 * 1024;

#[derive(Default)]
pub struct RegistryFixtureBuilder {
    tarballs: HashMap<(String, String), Bytes>,
    forbidden: HashSet<String>,
    broken: HashSet<String>,
    reset: HashSet<String>,
    hanging: HashSet<String>,
    chunk_delay: Duration,
}

impl RegistryFixtureBuilder {
    pub fn tarball(mut self, name: &str, version: &str, bytes: impl Into<Bytes>) -> Self {
        self.tarballs
            .insert((name.to_string(), version.to_string()), bytes.into());
        self
    }

    /// Registry answers 403 for every version of `name`
    pub fn forbidden(mut self, name: &str) -> Self {
        self.forbidden.insert(name.to_string());
        self
    }

    /// Body for `name` breaks off after half of the bytes
    pub fn broken(mut self, name: &str) -> Self {
        self.broken.insert(name.to_string());
        self
    }

    /// Body for `name` fails before the response head is written
    pub fn reset(mut self, name: &str) -> Self {
        self.reset.insert(name.to_string());
        self
    }

    /// Registry endpoint for `name` never answers in time
    pub fn hanging(mut self, name: &str) -> Self {
        self.hanging.insert(name.to_string());
        self
    }

    /// Pause between body chunks
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = delay;
        self
    }

    pub async fn start(self) -> RegistryFixture {
        let state = Arc::new(FixtureState {
            tarballs: self.tarballs,
            forbidden: self.forbidden,
            broken: self.broken,
            reset: self.reset,
            hanging: self.hanging,
            chunk_delay: self.chunk_delay,
            request_counts: Mutex::new(HashMap::new()),
        });

        let router = Router::new()
            .route("/api/v1/crates/{name}/{version}/download", get(download))
            .route("/files/{name}/{version}", get(file))
            .with_state(Arc::clone(&state));

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind fixture registry");
        let addr = listener.local_addr().expect("fixture address");
        tokio::spawn(async move {
            axum::serve(listener, router).await.expect("fixture server");
        });

        RegistryFixture {
            base_url: format!("http://{addr}"),
            state,
        }
    }
}

pub struct RegistryFixture {
    pub base_url: String,
    state: Arc<FixtureState>,
}

impl RegistryFixture {
    pub fn builder() -> RegistryFixtureBuilder {
        RegistryFixtureBuilder::default()
    }

    /// Requests seen for `/api/v1/crates/{name}/{version}/download`
    pub fn download_requests(&self, name: &str, version: &str) -> u64 {
        self.count(&format!("download:{name}@{version}"))
    }

    /// Requests seen for the redirect target of `name`/`version`
    pub fn file_requests(&self, name: &str, version: &str) -> u64 {
        self.count(&format!("file:{name}@{version}"))
    }

    pub fn total_requests(&self) -> u64 {
        self.state.request_counts.lock().unwrap().values().sum()
    }

    fn count(&self, key: &str) -> u64 {
        self.state
            .request_counts
            .lock()
            .unwrap()
            .get(key)
            .copied()
            .unwrap_or(0)
    }
}

struct FixtureState {
    tarballs: HashMap<(String, String), Bytes>,
    forbidden: HashSet<String>,
    broken: HashSet<String>,
    reset: HashSet<String>,
    hanging: HashSet<String>,
    chunk_delay: Duration,
    request_counts: Mutex<HashMap<String, u64>>,
}

impl FixtureState {
    fn record(&self, key: String) {
        *self.request_counts.lock().unwrap().entry(key).or_insert(0) += 1;
    }
}

async fn download(
    State(state): State<Arc<FixtureState>>,
    Path((name, version)): Path<(String, String)>,
) -> Response {
    state.record(format!("download:{name}@{version}"));

    if state.hanging.contains(&name) {
        tokio::time::sleep(Duration::from_secs(10)).await;
    }
    if state.forbidden.contains(&name) {
        return StatusCode::FORBIDDEN.into_response();
    }

    (
        StatusCode::FOUND,
        [(header::LOCATION, format!("/files/{name}/{version}"))],
    )
        .into_response()
}

async fn file(
    State(state): State<Arc<FixtureState>>,
    Path((name, version)): Path<(String, String)>,
) -> Response {
    state.record(format!("file:{name}@{version}"));

    let Some(bytes) = state.tarballs.get(&(name.clone(), version)).cloned() else {
        return StatusCode::NOT_FOUND.into_response();
    };

    if state.reset.contains(&name) {
        let body = stream::once(async {
            Err::<Bytes, _>(io::Error::new(io::ErrorKind::ConnectionReset, "fixture reset"))
        });
        return Response::new(Body::from_stream(body));
    }

    let broken = state.broken.contains(&name);
    let limit = if broken { bytes.len() / 2 } else { bytes.len() };
    let delay = state.chunk_delay;

    let chunks: Vec<Bytes> = (0..limit)
        .step_by(CHUNK_SIZE)
        .map(|start| bytes.slice(start..(start + CHUNK_SIZE).min(limit)))
        .collect();
    let mut body = stream::iter(chunks)
        .then(move |chunk| async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            Ok::<_, io::Error>(chunk)
        })
        .boxed();

    if broken {
        body = body
            .chain(stream::once(async {
                // Let the head and the first chunks reach the client
                tokio::time::sleep(Duration::from_millis(50)).await;
                Err(io::Error::new(io::ErrorKind::ConnectionReset, "fixture abort"))
            }))
            .boxed();
        return Response::new(Body::from_stream(body));
    }

    Response::builder()
        .header(header::CONTENT_LENGTH, bytes.len())
        .body(Body::from_stream(body))
        .expect("fixture response")
}

/// Deterministic tarball-sized payload
pub fn payload(len: usize, seed: u8) -> Bytes {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect::<Vec<u8>>()
        .into()
}
