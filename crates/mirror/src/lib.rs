//! # Crates Mirror Engine
//!
//! A caching mirror for registry tarball downloads. A request for a
//! `(name, version)` pair is served from the local cache when an entry exists;
//! otherwise the tarball is fetched from the upstream registry (following its
//! redirect to the download location) and written to the cache while it is
//! streamed back to the caller.
//!
//! ## Features
//!
//! - Write-through of a single upstream read to disk and to the client
//! - Atomic commit of cache entries: partial downloads are never served
//! - Coalescing of concurrent misses for the same key
//! - Distinct outcomes for refused, unavailable and failed downloads

pub mod builder;
pub mod client;
pub mod config;
pub mod error;
pub mod flight;
pub mod key;
pub mod orchestrator;
pub mod populate;
pub mod proxy;
pub mod storage;
pub mod stream;
pub mod upstream;

pub use builder::MirrorConfigBuilder;
pub use config::MirrorConfig;
pub use error::MirrorError;
pub use key::CacheKey;
pub use orchestrator::{Download, DownloadOrchestrator};
pub use storage::CacheLayout;
pub use stream::ByteStream;
pub use upstream::{FetchOutcome, RegistryUpstream, Upstream, UpstreamBody};

// Re-export proxy utilities
pub use proxy::{ProxyAuth, ProxyConfig, ProxyType};
